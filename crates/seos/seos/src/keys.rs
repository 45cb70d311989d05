//! Facility keys and per-credential key diversification
//!
//! A facility is identified by the object identifier of its ADF and holds
//! three master keys: the private encryption and MAC keys protecting the ADF
//! selection response, and the read key from which each credential's
//! authentication keys are diversified.

use std::fmt;

use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, CipherSuite, HashAlgorithm, Key};
use crate::file::KeyValueFile;
use crate::{Error, Result};

const KEYS_FILETYPE: &str = "Seos Facility Keys";
const KEYS_VERSION: u32 = 1;

/// Largest object identifier accepted in a keys or credential file
pub const MAX_OID_LEN: usize = 32;

/// Output length of the derivation, in bits
const DERIVED_KEY_BITS: [u8; 2] = [0x00, 0x80];
/// Counter of the single derivation round
const DERIVATION_COUNTER: u8 = 0x01;

/// Which of the two authentication keys to derive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyPurpose {
    /// Private key, encrypts the authentication cryptograms
    Encryption = 0x04,
    /// Authentication key, MACs the authentication cryptograms
    Mac = 0x06,
}

impl KeyPurpose {
    /// Derivation label
    pub const fn label(self) -> u8 {
        self as u8
    }
}

/// Master keys of a facility
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct FacilityKeys {
    /// Object identifier of the facility ADF
    pub adf_oid: Vec<u8>,
    /// Encrypts the ADF selection response
    pub priv_enc: Key,
    /// MACs the ADF selection response and derives its synthetic IV
    pub priv_mac: Key,
    /// Master key for credential key diversification
    pub read_key: Key,
}

impl fmt::Debug for FacilityKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FacilityKeys")
            .field("adf_oid", &hex::encode(&self.adf_oid))
            .finish_non_exhaustive()
    }
}

impl FacilityKeys {
    /// Create facility keys from their parts
    pub fn new(adf_oid: impl Into<Vec<u8>>, priv_enc: Key, priv_mac: Key, read_key: Key) -> Self {
        Self {
            adf_oid: adf_oid.into(),
            priv_enc,
            priv_mac,
            read_key,
        }
    }

    /// Parse a facility keys file
    pub fn parse(text: &str) -> Result<Self> {
        let file = KeyValueFile::parse(text)?;
        file.expect_header(KEYS_FILETYPE, KEYS_VERSION)?;

        let adf_oid = file.bytes("ADF OID")?;
        if adf_oid.is_empty() || adf_oid.len() > MAX_OID_LEN {
            return Err(Error::configuration(format!(
                "`ADF OID` must hold 1 to {MAX_OID_LEN} bytes"
            )));
        }

        Ok(Self {
            adf_oid,
            priv_enc: file.key("Priv Enc")?,
            priv_mac: file.key("Priv Mac")?,
            read_key: file.key("Read Key")?,
        })
    }

    /// Serialize to the facility keys file format
    pub fn to_file_string(&self) -> String {
        let mut file = KeyValueFile::new(KEYS_FILETYPE, KEYS_VERSION);
        file.push_bytes("ADF OID", &self.adf_oid);
        file.push_bytes("Priv Enc", &self.priv_enc);
        file.push_bytes("Priv Mac", &self.priv_mac);
        file.push_bytes("Read Key", &self.read_key);
        file.to_string()
    }

    /// Derive the authentication keys of a credential
    pub fn derive_keys(
        &self,
        diversifier: &[u8],
        cipher: CipherSuite,
        hash: HashAlgorithm,
        key_index: u8,
    ) -> Result<AuthKeys> {
        derive_keys(
            &self.read_key,
            diversifier,
            &self.adf_oid,
            cipher,
            hash,
            key_index,
        )
    }
}

/// The private and authentication keys of one credential
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AuthKeys {
    /// Encrypts the General Authenticate cryptograms
    pub priv_key: Key,
    /// MACs the General Authenticate cryptograms
    pub auth_key: Key,
}

impl fmt::Debug for AuthKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthKeys").finish_non_exhaustive()
    }
}

impl AuthKeys {
    /// Pair up a private and an authentication key
    pub const fn new(priv_key: Key, auth_key: Key) -> Self {
        Self { priv_key, auth_key }
    }
}

/// Diversify one credential key from a facility master key
///
/// This is a single round of the NIST SP 800-108 counter mode KDF with
/// AES-CMAC as the PRF, whatever cipher the resulting key is used with.
pub fn diversify_key(
    master: &Key,
    diversifier: &[u8],
    oid: &[u8],
    cipher: CipherSuite,
    hash: HashAlgorithm,
    key_index: u8,
    purpose: KeyPurpose,
) -> Result<Key> {
    let mut input = Vec::with_capacity(18 + oid.len() + diversifier.len() + 1);
    input.extend_from_slice(&[0u8; 11]);
    input.push(purpose.label());
    input.push(0x00);
    input.extend_from_slice(&DERIVED_KEY_BITS);
    input.push(DERIVATION_COUNTER);
    input.push(cipher.id());
    input.push(hash.id());
    input.extend_from_slice(oid);
    input.extend_from_slice(diversifier);
    input.push(key_index);

    let mut derived = crypto::full_cmac(CipherSuite::Aes128, master, &input)?;
    input.zeroize();

    let mut key = Key::default();
    key.copy_from_slice(&derived);
    derived.zeroize();
    Ok(key)
}

/// Derive both authentication keys of a credential
pub fn derive_keys(
    master: &Key,
    diversifier: &[u8],
    oid: &[u8],
    cipher: CipherSuite,
    hash: HashAlgorithm,
    key_index: u8,
) -> Result<AuthKeys> {
    debug!(
        diversifier = %hex::encode(diversifier),
        ?cipher,
        key_index,
        "Diversifying credential keys"
    );
    Ok(AuthKeys {
        priv_key: diversify_key(
            master,
            diversifier,
            oid,
            cipher,
            hash,
            key_index,
            KeyPurpose::Encryption,
        )?,
        auth_key: diversify_key(
            master,
            diversifier,
            oid,
            cipher,
            hash,
            key_index,
            KeyPurpose::Mac,
        )?,
    })
}

#[cfg(test)]
impl FacilityKeys {
    /// Deterministic facility keys for tests
    pub(crate) fn test_keys() -> Self {
        Self::new(
            hex_literal::hex!("2B0601040181E438010102011801010202"),
            hex_literal::hex!("000102030405060708090A0B0C0D0E0F"),
            hex_literal::hex!("101112131415161718191A1B1C1D1E1F"),
            hex_literal::hex!("202122232425262728292A2B2C2D2E2F"),
        )
    }
}
