//! ADF selection response
//!
//! When a reader selects the facility ADF the card reveals which object
//! identifier it matched and its diversifier, encrypted and MACed under the
//! facility private keys:
//!
//! ```text
//! CD 02 <cipher> <hash>
//! 85 <len> <IV> enc(06 <oid> CF <diversifier> 00..)
//! 8E 08 <cmac>
//! ```
//!
//! The IV is synthetic: half a block of random bytes followed by their CMAC
//! under the facility MAC key.

use iso7816_tlv::ber::{Tag, Tlv, Value};
use rand::RngCore;
use tracing::{debug, trace};

use crate::constants::tags;
use crate::crypto::{self, CipherSuite, HashAlgorithm, MAC_LEN};
use crate::keys::FacilityKeys;
use crate::{Error, Result};

/// Size of the encrypted OID and diversifier block
const CLEAR_LEN: usize = 0x30;
/// Size of the algorithm header (`CD 02 <cipher> <hash>`)
const HEADER_LEN: usize = 4;
/// Size of the trailing MAC object (`8E 08 <cmac>`)
const MAC_OBJECT_LEN: usize = 2 + MAC_LEN;

/// What a reader learns from a verified ADF response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdfInfo {
    /// Cipher the card selected
    pub cipher: CipherSuite,
    /// Hash the card selected
    pub hash: HashAlgorithm,
    /// Object identifier the card matched
    pub oid: Vec<u8>,
    /// Credential diversifier
    pub diversifier: Vec<u8>,
}

/// Whether `oid` occurs anywhere in the OID list sent with SELECT ADF
pub fn contains_oid(oid_list: &[u8], oid: &[u8]) -> bool {
    !oid.is_empty() && oid_list.windows(oid.len()).any(|window| window == oid)
}

/// Read the algorithm identifiers heading an ADF response
pub fn algorithms(response: &[u8]) -> Result<(CipherSuite, HashAlgorithm)> {
    match response {
        [tags::ADF_ALGORITHMS, 0x02, cipher, hash, ..] => Ok((
            CipherSuite::try_from(*cipher)?,
            HashAlgorithm::try_from(*hash)?,
        )),
        _ => Err(Error::ProtocolMismatch("ADF response header")),
    }
}

/// Build a fresh ADF response for a credential
pub fn build_response<R: RngCore + ?Sized>(
    keys: &FacilityKeys,
    cipher: CipherSuite,
    hash: HashAlgorithm,
    diversifier: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>> {
    let mut clear = Tlv::new(
        Tag::try_from(tags::OID)?,
        Value::Primitive(keys.adf_oid.clone()),
    )?
    .to_vec();
    clear.extend(
        Tlv::new(
            Tag::try_from(tags::DIVERSIFIER)?,
            Value::Primitive(diversifier.to_vec()),
        )?
        .to_vec(),
    );
    if clear.len() > CLEAR_LEN {
        return Err(Error::configuration(format!(
            "OID and diversifier take {} bytes, at most {CLEAR_LEN} fit the ADF response",
            clear.len()
        )));
    }
    clear.resize(CLEAR_LEN, 0x00);

    let iv = synthetic_iv(keys, cipher, rng)?;
    let encrypted = crypto::encrypt(cipher, &keys.priv_enc, &iv, &clear)?;

    let mut cryptogram = iv;
    cryptogram.extend(encrypted);

    let mut response = vec![tags::ADF_ALGORITHMS, 0x02, cipher.id(), hash.id()];
    response.extend(
        Tlv::new(
            Tag::try_from(tags::CRYPTOGRAM)?,
            Value::Primitive(cryptogram),
        )?
        .to_vec(),
    );

    let mac = crypto::cmac(cipher, &keys.priv_mac, &response)?;
    response.extend_from_slice(&[tags::MAC, MAC_LEN as u8]);
    response.extend_from_slice(&mac);

    trace!(response = %hex::encode(&response), "Built ADF response");
    Ok(response)
}

/// Verify and decrypt an ADF response with the facility keys
pub fn parse_response(keys: &FacilityKeys, response: &[u8]) -> Result<AdfInfo> {
    let (cipher, hash) = algorithms(response)?;
    if response.len() < HEADER_LEN + MAC_OBJECT_LEN {
        return Err(Error::ProtocolMismatch("ADF response too short"));
    }

    let (authenticated, mac_object) = response.split_at(response.len() - MAC_OBJECT_LEN);
    if mac_object[..2] != [tags::MAC, MAC_LEN as u8] {
        return Err(Error::ProtocolMismatch("ADF response without mac"));
    }
    crypto::verify_cmac(cipher, &keys.priv_mac, authenticated, &mac_object[2..])
        .map_err(|_| Error::IntegrityFailure("ADF response mac"))?;

    let (cryptogram, _) = Tlv::parse(&authenticated[HEADER_LEN..]);
    let cryptogram = cryptogram?;
    let cryptogram = match (cryptogram.tag(), cryptogram.value()) {
        (tag, Value::Primitive(value)) if tag == &Tag::try_from(tags::CRYPTOGRAM)? => value,
        _ => return Err(Error::ProtocolMismatch("ADF response cryptogram")),
    };

    let block_size = cipher.block_size();
    if cryptogram.len() <= block_size {
        return Err(Error::ProtocolMismatch("ADF response cryptogram too short"));
    }
    let (iv, encrypted) = cryptogram.split_at(block_size);
    let clear = crypto::decrypt(cipher, &keys.priv_enc, iv, encrypted)?;

    let (oid, rest) = Tlv::parse(&clear);
    let oid = primitive(oid?, tags::OID)?;
    let (diversifier, _) = Tlv::parse(rest);
    let diversifier = primitive(diversifier?, tags::DIVERSIFIER)?;

    debug!(
        oid = %hex::encode(&oid),
        diversifier = %hex::encode(&diversifier),
        ?cipher,
        "Parsed ADF response"
    );
    Ok(AdfInfo {
        cipher,
        hash,
        oid,
        diversifier,
    })
}

/// Half a block of randomness followed by its CMAC
fn synthetic_iv<R: RngCore + ?Sized>(
    keys: &FacilityKeys,
    cipher: CipherSuite,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let half = cipher.block_size() / 2;
    let mut iv = vec![0u8; half];
    rng.fill_bytes(&mut iv);
    let mac = crypto::cmac(cipher, &keys.priv_mac, &iv)?;
    iv.extend_from_slice(&mac[..half]);
    Ok(iv)
}

fn primitive(tlv: Tlv, tag: u8) -> Result<Vec<u8>> {
    match tlv.value() {
        Value::Primitive(value) if tlv.tag() == &Tag::try_from(tag)? => Ok(value.clone()),
        _ => Err(Error::ProtocolMismatch("unexpected object in ADF response")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use rand::{SeedableRng, rngs::StdRng};

    const DIVERSIFIER: [u8; 8] = hex!("0102030405060708");

    #[test]
    fn test_response_layout() {
        let keys = FacilityKeys::test_keys();
        let mut rng = StdRng::seed_from_u64(7);

        let des = build_response(
            &keys,
            CipherSuite::TripleDes,
            HashAlgorithm::Sha1,
            &DIVERSIFIER,
            &mut rng,
        )
        .unwrap();
        assert_eq!(&des[..6], &hex!("CD020206 8538"));
        assert_eq!(des.len(), 4 + 2 + 56 + 10);
        assert_eq!(&des[des.len() - 10..des.len() - 8], &hex!("8E08"));

        let aes = build_response(
            &keys,
            CipherSuite::Aes128,
            HashAlgorithm::Sha256,
            &DIVERSIFIER,
            &mut rng,
        )
        .unwrap();
        assert_eq!(&aes[..6], &hex!("CD020907 8540"));
        assert_eq!(aes.len(), 4 + 2 + 64 + 10);
    }

    #[test]
    fn test_synthetic_iv() {
        let keys = FacilityKeys::test_keys();
        let mut rng = StdRng::seed_from_u64(1);
        let response = build_response(
            &keys,
            CipherSuite::Aes128,
            HashAlgorithm::Sha1,
            &DIVERSIFIER,
            &mut rng,
        )
        .unwrap();
        let iv = &response[6..22];
        let mac = crypto::cmac(CipherSuite::Aes128, &keys.priv_mac, &iv[..8]).unwrap();
        assert_eq!(&iv[8..], &mac[..]);
    }

    #[test]
    fn test_parse_built_response() {
        let keys = FacilityKeys::test_keys();
        let mut rng = StdRng::seed_from_u64(3);
        for cipher in [CipherSuite::TripleDes, CipherSuite::Aes128] {
            let response =
                build_response(&keys, cipher, HashAlgorithm::Sha1, &DIVERSIFIER, &mut rng)
                    .unwrap();
            let info = parse_response(&keys, &response).unwrap();
            assert_eq!(
                info,
                AdfInfo {
                    cipher,
                    hash: HashAlgorithm::Sha1,
                    oid: keys.adf_oid.clone(),
                    diversifier: DIVERSIFIER.to_vec(),
                }
            );
        }
    }

    #[test]
    fn test_parse_rejects_tampering() {
        let keys = FacilityKeys::test_keys();
        let mut rng = StdRng::seed_from_u64(5);
        let response = build_response(
            &keys,
            CipherSuite::TripleDes,
            HashAlgorithm::Sha1,
            &DIVERSIFIER,
            &mut rng,
        )
        .unwrap();

        let mut tampered = response.clone();
        tampered[20] ^= 0x80;
        assert!(matches!(
            parse_response(&keys, &tampered),
            Err(Error::IntegrityFailure(_))
        ));

        let mut other_keys = FacilityKeys::test_keys();
        other_keys.priv_mac[0] ^= 0x01;
        assert!(parse_response(&other_keys, &response).is_err());
    }

    #[test]
    fn test_oversized_contents() {
        let keys = FacilityKeys::new(
            vec![0x2B; 32],
            [0x00; 16],
            [0x01; 16],
            [0x02; 16],
        );
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            build_response(
                &keys,
                CipherSuite::Aes128,
                HashAlgorithm::Sha1,
                &[0x55; 16],
                &mut rng
            ),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_contains_oid() {
        let list = hex!("0611 2B0601040181E438010102011801010202 0603 2B0601");
        assert!(contains_oid(&list, &hex!("2B0601040181E438010102011801010202")));
        assert!(contains_oid(&list, &hex!("E43801")));
        assert!(!contains_oid(&list, &hex!("2B0602")));
        assert!(!contains_oid(&list, &[]));
        assert!(!contains_oid(&hex!("06"), &hex!("0611")));
    }

    #[test]
    fn test_algorithms() {
        assert_eq!(
            algorithms(&hex!("CD020906")).unwrap(),
            (CipherSuite::Aes128, HashAlgorithm::Sha1)
        );
        assert!(matches!(
            algorithms(&hex!("CD020106")),
            Err(Error::UnsupportedCipher(0x01))
        ));
        assert!(algorithms(&hex!("6F02")).is_err());
    }
}
