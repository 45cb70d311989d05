//! The credential record and its file format
//!
//! A credential is what the emulator impersonates: the diversifier that keys
//! it, the SIO it hands out once a reader authenticates, and optionally the
//! keys and ADF response captured from the genuine card. Captured material
//! lets the emulator answer without knowing the facility keys.

use std::fmt;

use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::tags;
use crate::crypto::{KEY_LEN, Key, MAC_LEN};
use crate::file::{KeyValueFile, encode_hex};
use crate::keys::{AuthKeys, MAX_OID_LEN};
use crate::{Error, Result};

const CREDENTIAL_FILETYPE: &str = "Flipper Seos Credential";
const CREDENTIAL_VERSION: u32 = 1;
const SEADER_FILETYPE: &str = "Flipper Seader Credential";
const SEADER_VERSION: u32 = 1;

/// Largest diversifier a credential may carry
pub const MAX_DIVERSIFIER_LEN: usize = 16;
/// Largest SIO a credential may carry
pub const MAX_SIO_LEN: usize = 128;
/// Size of the stored, zero-filled ADF response
pub const MAX_ADF_RESPONSE_LEN: usize = 80;
/// Diversifier size in Seader files
const SEADER_DIVERSIFIER_LEN: usize = 8;

/// A SEOS credential
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    /// Per-credential diversification data
    pub diversifier: Vec<u8>,
    /// Service Information Object
    pub sio: Vec<u8>,
    /// Captured private key
    pub priv_key: Option<Key>,
    /// Captured authentication key
    pub auth_key: Option<Key>,
    /// Captured ADF selection response, trimmed to its encoded length
    pub adf_response: Option<Vec<u8>>,
    /// Object identifier the ADF response was captured under
    pub adf_oid: Vec<u8>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("diversifier", &hex::encode(&self.diversifier))
            .field("sio_len", &self.sio.len())
            .field("cached_keys", &self.has_cached_keys())
            .field("adf_response", &self.adf_response.is_some())
            .field("adf_oid", &hex::encode(&self.adf_oid))
            .finish()
    }
}

impl Credential {
    /// Create a credential that has no captured material
    pub fn new(diversifier: impl Into<Vec<u8>>, sio: impl Into<Vec<u8>>) -> Result<Self> {
        let credential = Self {
            diversifier: diversifier.into(),
            sio: sio.into(),
            priv_key: None,
            auth_key: None,
            adf_response: None,
            adf_oid: Vec::new(),
        };
        credential.validate()?;
        Ok(credential)
    }

    /// Parse a Seos credential file
    pub fn parse(text: &str) -> Result<Self> {
        let file = KeyValueFile::parse(text)?;
        file.expect_header(CREDENTIAL_FILETYPE, CREDENTIAL_VERSION)?;

        let diversifier = file.sized_bytes("Diversifier", MAX_DIVERSIFIER_LEN)?;
        let sio = file.sized_bytes("SIO", MAX_SIO_LEN)?;

        let priv_key = optional_key(&file, "Priv Key")?;
        let auth_key = optional_key(&file, "Auth Key")?;

        let adf_response = match file.optional_bytes("ADF Response")? {
            Some(raw) if raw.len() > MAX_ADF_RESPONSE_LEN => {
                return Err(Error::configuration(format!(
                    "`ADF Response` exceeds {MAX_ADF_RESPONSE_LEN} bytes"
                )));
            }
            Some(raw) => trim_adf_response(&raw),
            None => None,
        };

        let adf_oid = if file.get("ADF OID Length").is_some() {
            file.sized_bytes("ADF OID", MAX_OID_LEN)?
        } else {
            Vec::new()
        };

        let credential = Self {
            diversifier,
            sio,
            priv_key,
            auth_key,
            adf_response,
            adf_oid,
        };
        credential.validate()?;

        info!(
            diversifier = %hex::encode(&credential.diversifier),
            sio_len = credential.sio.len(),
            cached_keys = credential.has_cached_keys(),
            adf_response = credential.adf_response.is_some(),
            "Loaded credential"
        );
        Ok(credential)
    }

    /// Import a credential captured by Seader
    pub fn from_seader(text: &str) -> Result<Self> {
        let file = KeyValueFile::parse(text)?;
        file.expect_header(SEADER_FILETYPE, SEADER_VERSION)?;

        let mut raw_sio = file.bytes("SIO")?;
        let declared = raw_sio
            .get(1)
            .map(|len| usize::from(*len) + 4)
            .ok_or_else(|| Error::configuration("`SIO` is too short"))?;
        if declared > MAX_SIO_LEN {
            return Err(Error::configuration(format!(
                "SIO of {declared} bytes exceeds {MAX_SIO_LEN}"
            )));
        }
        // The two trailing zero bytes are not always written out
        raw_sio.resize(declared, 0x00);

        let raw_diversifier = file.bytes("Diversifier")?;
        let diversifier: Vec<u8> = raw_diversifier
            .iter()
            .take(SEADER_DIVERSIFIER_LEN)
            .take_while(|&&b| b != 0x00)
            .copied()
            .collect();

        debug!(
            sio = %hex::encode(&raw_sio),
            diversifier = %hex::encode(&diversifier),
            "Imported Seader credential"
        );
        Self::new(diversifier, raw_sio)
    }

    /// Serialize to the Seos credential file format
    pub fn to_file_string(&self) -> String {
        let mut file = KeyValueFile::new(CREDENTIAL_FILETYPE, CREDENTIAL_VERSION);
        file.push_sized_bytes("Diversifier", &self.diversifier);
        file.push_sized_bytes("SIO", &self.sio);
        file.push_bytes("Priv Key", &self.priv_key.unwrap_or_default());
        file.push_bytes("Auth Key", &self.auth_key.unwrap_or_default());
        if let Some(response) = &self.adf_response {
            let mut stored = response.clone();
            stored.resize(MAX_ADF_RESPONSE_LEN, 0x00);
            file.push_bytes("ADF Response", &stored);
            file.push_sized_bytes("ADF OID", &self.adf_oid);
        }
        file.to_string()
    }

    /// Both captured keys, when present
    pub fn cached_keys(&self) -> Option<AuthKeys> {
        match (self.priv_key, self.auth_key) {
            (Some(priv_key), Some(auth_key)) => Some(AuthKeys::new(priv_key, auth_key)),
            _ => None,
        }
    }

    /// Whether both keys were captured
    pub const fn has_cached_keys(&self) -> bool {
        self.priv_key.is_some() && self.auth_key.is_some()
    }

    /// Human readable summary
    pub fn summary(&self) -> String {
        format!(
            "Diversifier: {}\nSIO ({} bytes): {}\nCached keys: {}\nADF response: {}",
            encode_hex(&self.diversifier),
            self.sio.len(),
            encode_hex(&self.sio),
            if self.has_cached_keys() { "yes" } else { "no" },
            match &self.adf_response {
                Some(_) => format!("yes (OID {})", encode_hex(&self.adf_oid)),
                None => "no".to_string(),
            }
        )
    }

    fn validate(&self) -> Result<()> {
        if self.diversifier.is_empty() || self.diversifier.len() > MAX_DIVERSIFIER_LEN {
            return Err(Error::configuration(format!(
                "diversifier must hold 1 to {MAX_DIVERSIFIER_LEN} bytes"
            )));
        }
        if self.sio.is_empty() || self.sio.len() > MAX_SIO_LEN {
            return Err(Error::configuration(format!(
                "SIO must hold 1 to {MAX_SIO_LEN} bytes"
            )));
        }
        if self.adf_response.is_some() && self.adf_oid.is_empty() {
            return Err(Error::configuration("`ADF Response` without `ADF OID`"));
        }
        Ok(())
    }
}

/// An all-zero key means the key was never captured
fn optional_key(file: &KeyValueFile, name: &str) -> Result<Option<Key>> {
    if file.get(name).is_none() {
        return Ok(None);
    }
    let key = file.key(name)?;
    Ok((key != [0u8; KEY_LEN]).then_some(key))
}

/// Cut a zero-filled ADF response down to its encoded length
///
/// The response is the algorithm header (4 bytes), the cryptogram header
/// (2 bytes), the cryptogram and the MAC object (10 bytes).
fn trim_adf_response(raw: &[u8]) -> Option<Vec<u8>> {
    if raw.first() != Some(&tags::ADF_ALGORITHMS) {
        return None;
    }
    let len = 4 + 2 + usize::from(*raw.get(5)?) + 2 + MAC_LEN;
    raw.get(..len).map(<[u8]>::to_vec)
}
