//! Cryptographic primitives used by SEOS
//!
//! SEOS negotiates one of two block ciphers, two-key triple DES or AES-128,
//! together with a hash algorithm. Every key is 16 bytes long regardless of the
//! cipher. Message authentication codes are CMACs truncated to eight bytes on
//! the wire.

use aes::Aes128;
use cipher::{
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
    block_padding::{Iso7816, NoPadding, Padding},
};
use cmac::{Cmac, Mac as _};
use des::TdesEde2;
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::{Error, Result};

/// Length of every SEOS key
pub const KEY_LEN: usize = 16;
/// Length of a MAC as it is transmitted
pub const MAC_LEN: usize = 8;

/// A 16 byte symmetric key
pub type Key = [u8; KEY_LEN];
/// A CMAC truncated to its transmitted length
pub type Mac = [u8; MAC_LEN];

/// Block cipher negotiated for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CipherSuite {
    /// Two-key triple DES (EDE)
    #[default]
    TripleDes = 0x02,
    /// AES with a 128 bit key
    Aes128 = 0x09,
}

impl CipherSuite {
    /// Identifier used on the wire and in the ADF response
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Cipher block size in bytes
    pub const fn block_size(self) -> usize {
        match self {
            Self::TripleDes => 8,
            Self::Aes128 => 16,
        }
    }
}

impl TryFrom<u8> for CipherSuite {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        match id {
            0x02 => Ok(Self::TripleDes),
            0x09 => Ok(Self::Aes128),
            other => Err(Error::UnsupportedCipher(other)),
        }
    }
}

/// Hash algorithm negotiated for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum HashAlgorithm {
    /// SHA-1
    #[default]
    Sha1 = 0x06,
    /// SHA-256
    Sha256 = 0x07,
}

impl HashAlgorithm {
    /// Identifier used on the wire and in the ADF response
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Hash `data` in one shot
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

impl TryFrom<u8> for HashAlgorithm {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        match id {
            0x06 => Ok(Self::Sha1),
            0x07 => Ok(Self::Sha256),
            other => Err(Error::UnsupportedHash(other)),
        }
    }
}

/// Append ISO/IEC 7816-4 padding (0x80 then zeros) up to the next block boundary
pub fn pad_iso7816(buf: &mut Vec<u8>, block_size: usize) {
    buf.push(0x80);
    while buf.len() % block_size != 0 {
        buf.push(0x00);
    }
}

/// CBC encrypt block aligned data without padding
pub fn encrypt(suite: CipherSuite, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    check_aligned(suite, data)?;
    match suite {
        CipherSuite::TripleDes => encrypt_with::<cbc::Encryptor<TdesEde2>, NoPadding>(key, iv, data),
        CipherSuite::Aes128 => encrypt_with::<cbc::Encryptor<Aes128>, NoPadding>(key, iv, data),
    }
}

/// CBC decrypt block aligned data without removing any padding
pub fn decrypt(suite: CipherSuite, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    check_aligned(suite, data)?;
    match suite {
        CipherSuite::TripleDes => decrypt_with::<cbc::Decryptor<TdesEde2>, NoPadding>(key, iv, data),
        CipherSuite::Aes128 => decrypt_with::<cbc::Decryptor<Aes128>, NoPadding>(key, iv, data),
    }
}

/// CBC encrypt arbitrary data after applying ISO/IEC 7816-4 padding
pub fn encrypt_padded(suite: CipherSuite, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    match suite {
        CipherSuite::TripleDes => encrypt_with::<cbc::Encryptor<TdesEde2>, Iso7816>(key, iv, data),
        CipherSuite::Aes128 => encrypt_with::<cbc::Encryptor<Aes128>, Iso7816>(key, iv, data),
    }
}

/// CBC decrypt and strip ISO/IEC 7816-4 padding
pub fn decrypt_padded(suite: CipherSuite, key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    check_aligned(suite, data)?;
    match suite {
        CipherSuite::TripleDes => decrypt_with::<cbc::Decryptor<TdesEde2>, Iso7816>(key, iv, data),
        CipherSuite::Aes128 => decrypt_with::<cbc::Decryptor<Aes128>, Iso7816>(key, iv, data),
    }
}

/// Full length CMAC (one cipher block)
pub fn full_cmac(suite: CipherSuite, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    match suite {
        CipherSuite::TripleDes => cmac_with::<Cmac<TdesEde2>>(key, data),
        CipherSuite::Aes128 => cmac_with::<Cmac<Aes128>>(key, data),
    }
}

/// CMAC truncated to the transmitted length
pub fn cmac(suite: CipherSuite, key: &[u8], data: &[u8]) -> Result<Mac> {
    let full = full_cmac(suite, key, data)?;
    let mut mac = Mac::default();
    mac.copy_from_slice(&full[..MAC_LEN]);
    Ok(mac)
}

/// Check a truncated CMAC in constant time
pub fn verify_cmac(suite: CipherSuite, key: &[u8], data: &[u8], mac: &[u8]) -> Result<()> {
    let verified = match suite {
        CipherSuite::TripleDes => verify_with::<Cmac<TdesEde2>>(key, data, mac)?,
        CipherSuite::Aes128 => verify_with::<Cmac<Aes128>>(key, data, mac)?,
    };

    if verified {
        Ok(())
    } else {
        Err(Error::IntegrityFailure("cmac mismatch"))
    }
}

const fn check_aligned(suite: CipherSuite, data: &[u8]) -> Result<()> {
    if data.len() % suite.block_size() == 0 {
        Ok(())
    } else {
        Err(Error::Unaligned(data.len()))
    }
}

fn encrypt_with<E, P>(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>>
where
    E: KeyIvInit + BlockEncryptMut,
    P: Padding<E::BlockSize>,
{
    let encryptor = E::new_from_slices(key, iv).map_err(|_| Error::InvalidKeyLength)?;
    Ok(encryptor.encrypt_padded_vec_mut::<P>(data))
}

fn decrypt_with<D, P>(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>>
where
    D: KeyIvInit + BlockDecryptMut,
    P: Padding<D::BlockSize>,
{
    let decryptor = D::new_from_slices(key, iv).map_err(|_| Error::InvalidKeyLength)?;
    Ok(decryptor.decrypt_padded_vec_mut::<P>(data)?)
}

fn cmac_with<M>(key: &[u8], data: &[u8]) -> Result<Vec<u8>>
where
    M: cmac::Mac + cipher::KeyInit,
{
    let mut mac = <M as cmac::Mac>::new_from_slice(key).map_err(|_| Error::InvalidKeyLength)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn verify_with<M>(key: &[u8], data: &[u8], tag: &[u8]) -> Result<bool>
where
    M: cmac::Mac + cipher::KeyInit,
{
    if tag.len() != MAC_LEN {
        return Ok(false);
    }
    let mut mac = <M as cmac::Mac>::new_from_slice(key).map_err(|_| Error::InvalidKeyLength)?;
    mac.update(data);
    Ok(mac.verify_truncated_left(tag).is_ok())
}
