//! Line oriented `Key: Value` files
//!
//! Credential and facility key files share one syntax: a `Filetype` and a
//! `Version` header followed by order-independent entries. Byte strings are
//! written as space separated upper-case hex. Lines starting with `#` are
//! comments.

use std::fmt;

use crate::crypto::{KEY_LEN, Key};
use crate::{Error, Result};

const FILETYPE: &str = "Filetype";
const VERSION: &str = "Version";

/// A parsed or to-be-written key/value file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct KeyValueFile {
    entries: Vec<(String, String)>,
}

impl KeyValueFile {
    /// Start a file with the given header
    pub(crate) fn new(filetype: &str, version: u32) -> Self {
        let mut file = Self::default();
        file.push(FILETYPE, filetype);
        file.push_u32(VERSION, version);
        file
    }

    /// Parse the textual form
    pub(crate) fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                Error::configuration(format!("line {}: expected `Key: Value`", number + 1))
            })?;
            entries.push((key.trim().to_string(), value.trim().to_string()));
        }
        Ok(Self { entries })
    }

    /// Check the `Filetype` and `Version` header
    pub(crate) fn expect_header(&self, filetype: &str, version: u32) -> Result<()> {
        let found = self.require(FILETYPE)?;
        if found != filetype {
            return Err(Error::configuration(format!(
                "unexpected filetype `{found}`, expected `{filetype}`"
            )));
        }
        let found = self.u32(VERSION)?;
        if found != version {
            return Err(Error::configuration(format!(
                "unsupported version {found}, expected {version}"
            )));
        }
        Ok(())
    }

    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::configuration(format!("missing `{key}`")))
    }

    pub(crate) fn u32(&self, key: &str) -> Result<u32> {
        let value = self.require(key)?;
        value
            .parse()
            .map_err(|_| Error::configuration(format!("`{key}` is not a number: `{value}`")))
    }

    /// Read a hex byte string
    pub(crate) fn bytes(&self, key: &str) -> Result<Vec<u8>> {
        decode_hex(self.require(key)?)
    }

    /// Read a hex byte string that may be absent
    pub(crate) fn optional_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get(key).map(decode_hex).transpose()
    }

    /// Read a byte string together with its declared `<name> Length` entry
    pub(crate) fn sized_bytes(&self, key: &str, max: usize) -> Result<Vec<u8>> {
        let declared = self.u32(&format!("{key} Length"))? as usize;
        if declared > max {
            return Err(Error::configuration(format!(
                "`{key} Length` of {declared} exceeds {max}"
            )));
        }
        let bytes = self.bytes(key)?;
        if bytes.len() != declared {
            return Err(Error::configuration(format!(
                "`{key}` holds {} bytes, `{key} Length` says {declared}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Read a 16 byte key
    pub(crate) fn key(&self, key: &str) -> Result<Key> {
        let bytes = self.bytes(key)?;
        Key::try_from(bytes.as_slice()).map_err(|_| {
            Error::configuration(format!(
                "`{key}` must be {KEY_LEN} bytes, found {}",
                bytes.len()
            ))
        })
    }

    pub(crate) fn push(&mut self, key: &str, value: impl Into<String>) {
        self.entries.push((key.to_string(), value.into()));
    }

    pub(crate) fn push_u32(&mut self, key: &str, value: u32) {
        self.push(key, value.to_string());
    }

    pub(crate) fn push_bytes(&mut self, key: &str, bytes: &[u8]) {
        self.push(key, encode_hex(bytes));
    }

    /// Push `<name> Length` followed by `<name>`
    pub(crate) fn push_sized_bytes(&mut self, key: &str, bytes: &[u8]) {
        self.push_u32(&format!("{key} Length"), bytes.len() as u32);
        self.push_bytes(key, bytes);
    }
}

impl fmt::Display for KeyValueFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{key}: {value}")?;
        }
        Ok(())
    }
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let compact: String = value.split_whitespace().collect();
    Ok(hex::decode(compact)?)
}

/// Space separated upper-case hex
pub(crate) fn encode_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
