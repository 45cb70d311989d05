//! Utility functions and types for the SEOS CLI

use std::fs;
use std::path::Path;

use anyhow::Context;
use clap::ValueEnum;
use derive_more::Display;
use seos::{CipherSuite, Credential, FacilityKeys, HashAlgorithm};

/// Cipher suite selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Display)]
pub enum CipherArg {
    /// Two-key triple DES
    #[display("des")]
    Des,
    /// AES-128
    #[display("aes")]
    Aes,
}

impl From<CipherArg> for CipherSuite {
    fn from(arg: CipherArg) -> Self {
        match arg {
            CipherArg::Des => Self::TripleDes,
            CipherArg::Aes => Self::Aes128,
        }
    }
}

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Display)]
pub enum HashArg {
    /// SHA-1
    #[display("sha1")]
    Sha1,
    /// SHA-256
    #[display("sha256")]
    Sha256,
}

impl From<HashArg> for HashAlgorithm {
    fn from(arg: HashArg) -> Self {
        match arg {
            HashArg::Sha1 => Self::Sha1,
            HashArg::Sha256 => Self::Sha256,
        }
    }
}

/// Load a Seos credential file
pub fn load_credential(path: &Path) -> anyhow::Result<Credential> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read credential file {}", path.display()))?;
    Credential::parse(&text)
        .with_context(|| format!("Invalid credential file {}", path.display()))
}

/// Load a facility keys file
pub fn load_facility_keys(path: &Path) -> anyhow::Result<FacilityKeys> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read keys file {}", path.display()))?;
    FacilityKeys::parse(&text).with_context(|| format!("Invalid keys file {}", path.display()))
}

/// Decode a hex argument, ignoring spaces and an optional 0x prefix
pub fn parse_hex(input: &str) -> anyhow::Result<Vec<u8>> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = compact.strip_prefix("0x").unwrap_or(&compact);
    hex::decode(digits).with_context(|| format!("Invalid hex string: {input}"))
}

/// Upper-case hex with a space between bytes
pub fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0x0102").unwrap(), vec![0x01, 0x02]);
        assert_eq!(parse_hex("02 00A4 0400").unwrap(), vec![0x02, 0x00, 0xA4, 0x04, 0x00]);
        assert!(parse_hex("0G").is_err());
        assert!(parse_hex("012").is_err());
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x90, 0x00, 0x0a]), "90 00 0A");
        assert_eq!(format_hex(&[]), "");
    }

    #[test]
    fn test_value_names() {
        assert_eq!(CipherArg::Aes.to_string(), "aes");
        assert_eq!(CipherSuite::from(CipherArg::Des), CipherSuite::TripleDes);
        assert_eq!(HashAlgorithm::from(HashArg::Sha256), HashAlgorithm::Sha256);
    }
}
