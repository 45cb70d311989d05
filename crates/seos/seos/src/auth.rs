//! General Authenticate cryptograms
//!
//! Mutual authentication is a two step exchange. In the first step the reader
//! asks for the card challenge (rndICC). In the second it sends
//! `enc(UID ‖ rndICC ‖ cNonce) ‖ cmac` and the card answers with
//! `enc(rndICC ‖ UID ‖ rNonce) ‖ cmac`, both under the credential's private
//! and authentication keys. The exchanged nonces seed the secure messaging
//! keys.

use iso7816_tlv::ber::{Tag, Tlv, Value};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::tags;
use crate::crypto::{self, CipherSuite, HashAlgorithm, MAC_LEN};
use crate::keys::AuthKeys;
use crate::{Error, Result};

/// Length of the card challenge
pub const RND_ICC_LEN: usize = 8;
/// Length of the reader UID
pub const UID_LEN: usize = 8;
/// Length of the reader and card nonces
pub const NONCE_LEN: usize = 16;
/// Length of an encrypted cryptogram
pub const CRYPTOGRAM_LEN: usize = RND_ICC_LEN + UID_LEN + NONCE_LEN;
/// Length of an encrypted cryptogram followed by its MAC
pub const SEALED_LEN: usize = CRYPTOGRAM_LEN + MAC_LEN;
/// Length of the General Authenticate 2 data field (`7C 2A 82 28 ...`)
pub const GENERAL_AUTHENTICATE_2_DATA_LEN: usize = 4 + SEALED_LEN;

/// Card challenge
pub type RndIcc = [u8; RND_ICC_LEN];
/// Reader UID
pub type Uid = [u8; UID_LEN];
/// Reader (cNonce) or card (rNonce) nonce
pub type Nonce = [u8; NONCE_LEN];
/// Cleartext of a cryptogram
pub type Cryptogram = [u8; CRYPTOGRAM_LEN];
/// Encrypted and MACed cryptogram
pub type Sealed = [u8; SEALED_LEN];

/// The cryptogram a reader sends in General Authenticate 2
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ReaderCryptogram {
    /// Reader UID
    pub uid: Uid,
    /// Echo of the card challenge
    pub rnd_icc: RndIcc,
    /// Reader nonce
    pub c_nonce: Nonce,
}

impl ReaderCryptogram {
    /// Cleartext layout: `UID ‖ rndICC ‖ cNonce`
    pub fn to_bytes(&self) -> Cryptogram {
        let mut out = [0u8; CRYPTOGRAM_LEN];
        out[..8].copy_from_slice(&self.uid);
        out[8..16].copy_from_slice(&self.rnd_icc);
        out[16..].copy_from_slice(&self.c_nonce);
        out
    }

    /// Split a decrypted cryptogram
    pub fn from_bytes(clear: &Cryptogram) -> Self {
        let mut cryptogram = Self {
            uid: [0; UID_LEN],
            rnd_icc: [0; RND_ICC_LEN],
            c_nonce: [0; NONCE_LEN],
        };
        cryptogram.uid.copy_from_slice(&clear[..8]);
        cryptogram.rnd_icc.copy_from_slice(&clear[8..16]);
        cryptogram.c_nonce.copy_from_slice(&clear[16..]);
        cryptogram
    }
}

/// The cryptogram a card answers General Authenticate 2 with
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CardCryptogram {
    /// Card challenge
    pub rnd_icc: RndIcc,
    /// Echo of the reader UID
    pub uid: Uid,
    /// Card nonce
    pub r_nonce: Nonce,
}

impl CardCryptogram {
    /// Cleartext layout: `rndICC ‖ UID ‖ rNonce`
    pub fn to_bytes(&self) -> Cryptogram {
        let mut out = [0u8; CRYPTOGRAM_LEN];
        out[..8].copy_from_slice(&self.rnd_icc);
        out[8..16].copy_from_slice(&self.uid);
        out[16..].copy_from_slice(&self.r_nonce);
        out
    }

    /// Split a decrypted cryptogram
    pub fn from_bytes(clear: &Cryptogram) -> Self {
        let mut cryptogram = Self {
            rnd_icc: [0; RND_ICC_LEN],
            uid: [0; UID_LEN],
            r_nonce: [0; NONCE_LEN],
        };
        cryptogram.rnd_icc.copy_from_slice(&clear[..8]);
        cryptogram.uid.copy_from_slice(&clear[8..16]);
        cryptogram.r_nonce.copy_from_slice(&clear[16..]);
        cryptogram
    }
}

/// Encrypt a cryptogram under the private key and MAC it under the auth key
pub fn seal(suite: CipherSuite, keys: &AuthKeys, clear: &Cryptogram) -> Result<Sealed> {
    let iv = vec![0u8; suite.block_size()];
    let encrypted = crypto::encrypt(suite, &keys.priv_key, &iv, clear)?;
    let mac = crypto::cmac(suite, &keys.auth_key, &encrypted)?;

    let mut sealed = [0u8; SEALED_LEN];
    sealed[..CRYPTOGRAM_LEN].copy_from_slice(&encrypted);
    sealed[CRYPTOGRAM_LEN..].copy_from_slice(&mac);
    Ok(sealed)
}

/// Check the MAC of a sealed cryptogram, then decrypt it
pub fn open(suite: CipherSuite, keys: &AuthKeys, sealed: &[u8]) -> Result<Cryptogram> {
    if sealed.len() != SEALED_LEN {
        return Err(Error::TransportDesync {
            expected: SEALED_LEN,
            actual: sealed.len(),
        });
    }
    let (encrypted, mac) = sealed.split_at(CRYPTOGRAM_LEN);
    crypto::verify_cmac(suite, &keys.auth_key, encrypted, mac)
        .map_err(|_| Error::IntegrityFailure("cryptogram mac"))?;

    let iv = vec![0u8; suite.block_size()];
    let mut decrypted = crypto::decrypt(suite, &keys.priv_key, &iv, encrypted)?;
    let mut clear = [0u8; CRYPTOGRAM_LEN];
    clear.copy_from_slice(&decrypted);
    decrypted.zeroize();
    Ok(clear)
}

/// Wrap a sealed cryptogram in the dynamic authentication template
pub fn encode_authentication_data(sealed: &Sealed) -> Result<Vec<u8>> {
    Ok(Tlv::new(
        Tag::try_from(tags::DYNAMIC_AUTH)?,
        Value::Constructed(vec![Tlv::new(
            Tag::try_from(tags::RESPONSE)?,
            Value::Primitive(sealed.to_vec()),
        )?]),
    )?
    .to_vec())
}

/// Extract the sealed cryptogram from a dynamic authentication template
pub fn decode_authentication_data(data: &[u8]) -> Result<Vec<u8>> {
    let template = Tlv::from_bytes(data)?;
    if template.tag() != &Tag::try_from(tags::DYNAMIC_AUTH)? {
        return Err(Error::ProtocolMismatch("expected dynamic authentication template"));
    }
    let Value::Constructed(inner) = template.value() else {
        return Err(Error::ProtocolMismatch("primitive authentication template"));
    };

    let response_tag = Tag::try_from(tags::RESPONSE)?;
    match inner
        .iter()
        .find(|tlv| tlv.tag() == &response_tag)
        .map(Tlv::value)
    {
        Some(Value::Primitive(sealed)) => Ok(sealed.clone()),
        _ => Err(Error::ProtocolMismatch("no authentication cryptogram")),
    }
}

/// Encode the General Authenticate 1 answer (`7C 0A 81 08 rndICC`)
pub fn encode_challenge(rnd_icc: &RndIcc) -> Result<Vec<u8>> {
    Ok(Tlv::new(
        Tag::try_from(tags::DYNAMIC_AUTH)?,
        Value::Constructed(vec![Tlv::new(
            Tag::try_from(tags::CHALLENGE)?,
            Value::Primitive(rnd_icc.to_vec()),
        )?]),
    )?
    .to_vec())
}

/// Extract rndICC from a General Authenticate 1 answer
pub fn decode_challenge(data: &[u8]) -> Result<RndIcc> {
    let template = Tlv::from_bytes(data)?;
    let challenge_tag = Tag::try_from(tags::CHALLENGE)?;
    let challenge = match template.value() {
        Value::Constructed(inner) => inner
            .iter()
            .find(|tlv| tlv.tag() == &challenge_tag)
            .map(Tlv::value),
        Value::Primitive(_) => None,
    };
    match challenge {
        Some(Value::Primitive(rnd_icc)) => RndIcc::try_from(rnd_icc.as_slice())
            .map_err(|_| Error::ProtocolMismatch("challenge has the wrong size")),
        _ => Err(Error::ProtocolMismatch("no challenge in authentication template")),
    }
}

/// Everything both sides know once mutual authentication succeeded
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionMaterial {
    /// Negotiated cipher
    #[zeroize(skip)]
    pub cipher: CipherSuite,
    /// Negotiated hash
    #[zeroize(skip)]
    pub hash: HashAlgorithm,
    /// Card challenge
    pub rnd_icc: RndIcc,
    /// Reader UID
    pub uid: Uid,
    /// Reader nonce
    pub c_nonce: Nonce,
    /// Card nonce
    pub r_nonce: Nonce,
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn keys() -> AuthKeys {
        AuthKeys::new(
            hex!("00112233445566778899AABBCCDDEEFF"),
            hex!("FFEEDDCCBBAA99887766554433221100"),
        )
    }

    fn reader_cryptogram() -> ReaderCryptogram {
        ReaderCryptogram {
            uid: hex!("0102030405060708"),
            rnd_icc: hex!("A1A2A3A4A5A6A7A8"),
            c_nonce: hex!("C0C1C2C3C4C5C6C7C8C9CACBCCCDCECF"),
        }
    }

    #[test]
    fn test_cryptogram_layouts() {
        let reader = reader_cryptogram();
        let clear = reader.to_bytes();
        assert_eq!(&clear[..8], &reader.uid);
        assert_eq!(&clear[8..16], &reader.rnd_icc);
        assert_eq!(ReaderCryptogram::from_bytes(&clear), reader);

        let card = CardCryptogram {
            rnd_icc: reader.rnd_icc,
            uid: reader.uid,
            r_nonce: [0x42; NONCE_LEN],
        };
        let clear = card.to_bytes();
        assert_eq!(&clear[..8], &card.rnd_icc);
        assert_eq!(CardCryptogram::from_bytes(&clear), card);
    }

    #[test]
    fn test_seal_then_open() {
        for suite in [CipherSuite::TripleDes, CipherSuite::Aes128] {
            let clear = reader_cryptogram().to_bytes();
            let sealed = seal(suite, &keys(), &clear).unwrap();
            assert_ne!(&sealed[..CRYPTOGRAM_LEN], &clear[..]);
            assert_eq!(open(suite, &keys(), &sealed).unwrap(), clear);
        }
    }

    #[test]
    fn test_open_rejects_every_single_bit_flip() {
        let suite = CipherSuite::TripleDes;
        let sealed = seal(suite, &keys(), &reader_cryptogram().to_bytes()).unwrap();
        for byte in 0..SEALED_LEN {
            for bit in 0..8 {
                let mut tampered = sealed;
                tampered[byte] ^= 1 << bit;
                assert!(
                    matches!(
                        open(suite, &keys(), &tampered),
                        Err(Error::IntegrityFailure(_))
                    ),
                    "bit {bit} of byte {byte} accepted"
                );
            }
        }
    }

    #[test]
    fn test_open_wrong_size() {
        assert!(matches!(
            open(CipherSuite::Aes128, &keys(), &[0u8; 39]),
            Err(Error::TransportDesync {
                expected: 40,
                actual: 39
            })
        ));
    }

    #[test]
    fn test_authentication_data_encoding() {
        let sealed = [0x5Au8; SEALED_LEN];
        let data = encode_authentication_data(&sealed).unwrap();
        assert_eq!(data.len(), GENERAL_AUTHENTICATE_2_DATA_LEN);
        assert_eq!(&data[..4], &hex!("7C2A8228"));
        assert_eq!(decode_authentication_data(&data).unwrap(), sealed.to_vec());

        assert!(matches!(
            decode_authentication_data(&hex!("7C028100")),
            Err(Error::ProtocolMismatch(_))
        ));
    }

    #[test]
    fn test_challenge_encoding() {
        let rnd_icc = hex!("A1A2A3A4A5A6A7A8");
        let data = encode_challenge(&rnd_icc).unwrap();
        assert_eq!(data, hex!("7C0A8108A1A2A3A4A5A6A7A8"));
        assert_eq!(decode_challenge(&data).unwrap(), rnd_icc);
        assert!(decode_challenge(&hex!("7C03810101")).is_err());
    }
}
