//! Secure messaging session
//!
//! Once mutual authentication succeeds both sides derive a privacy key and a
//! MAC key from the exchanged nonces. Every protected command and response
//! carries the encrypted data object (`85`), a status or expected length
//! object and a truncated CMAC (`8E 08`). The MAC covers a send sequence
//! counter that both sides increment before every wrap and unwrap.

use bytes::Bytes;
use iso7816_tlv::ber::{Tag, Tlv, Value};
use seos_apdu_core::{Command, Header};
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::auth::SessionMaterial;
use crate::constants::{header, tags};
use crate::crypto::{self, CipherSuite, KEY_LEN, Key, MAC_LEN};
use crate::{Error, Result};

/// Largest cleartext that still fits a short APDU once protected
pub const MAX_PAYLOAD_LEN: usize = 239;

/// Processing status reported inside protected responses
const PROCESSING_STATUS_OK: [u8; 2] = [0x90, 0x00];

/// Which side of the exchange a session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Unwraps commands and wraps responses
    Card,
    /// Wraps commands and unwraps responses
    Reader,
}

/// Secure messaging state for one authenticated peer
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecureMessaging {
    #[zeroize(skip)]
    role: Role,
    #[zeroize(skip)]
    cipher: CipherSuite,
    privacy_key: Key,
    mac_key: Key,
    /// Send sequence counter, one cipher block wide
    ssc: Vec<u8>,
}

impl std::fmt::Debug for SecureMessaging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureMessaging")
            .field("role", &self.role)
            .field("cipher", &self.cipher)
            .field("ssc", &hex::encode(&self.ssc))
            .finish_non_exhaustive()
    }
}

impl SecureMessaging {
    /// Derive the session keys and the initial counter
    pub fn new(material: &SessionMaterial, role: Role) -> Self {
        let cipher = material.cipher;

        let mut input = Vec::with_capacity(4 + 8 + 8 + 2 + 8 + 8);
        input.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        input.extend_from_slice(&material.c_nonce[..8]);
        input.extend_from_slice(&material.r_nonce[..8]);
        input.push(cipher.id());
        input.push(cipher.id());
        input.extend_from_slice(&material.rnd_icc);
        input.extend_from_slice(&material.uid);

        let mut accumulator = Vec::with_capacity(2 * KEY_LEN + 32);
        let mut counter = 1u8;
        while accumulator.len() < 2 * KEY_LEN {
            input[3] = counter;
            accumulator.extend_from_slice(&material.hash.digest(&input));
            counter += 1;
        }

        let mut privacy_key = Key::default();
        let mut mac_key = Key::default();
        privacy_key.copy_from_slice(&accumulator[..KEY_LEN]);
        mac_key.copy_from_slice(&accumulator[KEY_LEN..2 * KEY_LEN]);
        accumulator.zeroize();
        input.zeroize();

        let ssc = match cipher {
            CipherSuite::Aes128 => [&material.rnd_icc[..], &material.uid[..]].concat(),
            CipherSuite::TripleDes => [&material.rnd_icc[..4], &material.uid[..4]].concat(),
        };

        debug!(?role, ?cipher, "Secure messaging established");
        Self {
            role,
            cipher,
            privacy_key,
            mac_key,
            ssc,
        }
    }

    /// The role this session was created for
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Protect an outbound payload according to the session role
    ///
    /// A reader session produces a protected GET DATA command; a card session
    /// produces the data field of a protected response.
    pub fn wrap(&mut self, clear: &[u8]) -> Result<Bytes> {
        match self.role {
            Role::Card => self.wrap_response(clear),
            Role::Reader => self.wrap_command(header::SECURE_GET_DATA, clear),
        }
    }

    /// Check and decrypt an inbound message according to the session role
    pub fn unwrap(&mut self, protected: &[u8]) -> Result<Vec<u8>> {
        match self.role {
            Role::Card => self.unwrap_command(protected),
            Role::Reader => self.unwrap_response(protected),
        }
    }

    /// Build a protected command APDU
    pub fn wrap_command(&mut self, header: Header, clear: &[u8]) -> Result<Bytes> {
        let cryptogram = self.encrypt_object(clear)?;

        let mut authenticated = cryptogram;
        authenticated.extend_from_slice(&[tags::EXPECTED_LENGTH, 0x00]);

        let mut mac_input = self.ssc.clone();
        let mut padded_header = header.to_bytes().to_vec();
        crypto::pad_iso7816(&mut padded_header, self.cipher.block_size());
        mac_input.extend_from_slice(&padded_header);
        mac_input.extend_from_slice(&authenticated);
        let mac = self.mac(mac_input)?;

        let mut body = authenticated;
        body.extend_from_slice(&[tags::MAC, MAC_LEN as u8]);
        body.extend_from_slice(&mac);

        Ok(Command::with_header(header, body).with_le(0x00).to_bytes())
    }

    /// Check and decrypt a protected command APDU
    pub fn unwrap_command(&mut self, apdu: &[u8]) -> Result<Vec<u8>> {
        let command = Command::from_bytes(apdu)?;
        self.increment_ssc();

        let objects = ProtectedObjects::parse(command.data())?;

        let mut mac_input = self.ssc.clone();
        let mut padded_header = command.header().to_bytes().to_vec();
        crypto::pad_iso7816(&mut padded_header, self.cipher.block_size());
        mac_input.extend_from_slice(&padded_header);
        mac_input.extend_from_slice(objects.authenticated);
        self.verify(mac_input, &objects.mac)?;

        self.decrypt_object(objects.cryptogram.as_deref())
    }

    /// Build the data field of a protected response
    pub fn wrap_response(&mut self, clear: &[u8]) -> Result<Bytes> {
        let cryptogram = self.encrypt_object(clear)?;

        let mut authenticated = cryptogram;
        authenticated.extend_from_slice(&[tags::PROCESSING_STATUS, 0x02]);
        authenticated.extend_from_slice(&PROCESSING_STATUS_OK);

        let mut mac_input = self.ssc.clone();
        mac_input.extend_from_slice(&authenticated);
        let mac = self.mac(mac_input)?;

        let mut body = authenticated;
        body.extend_from_slice(&[tags::MAC, MAC_LEN as u8]);
        body.extend_from_slice(&mac);
        Ok(Bytes::from(body))
    }

    /// Check and decrypt the data field of a protected response
    pub fn unwrap_response(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.increment_ssc();

        let objects = ProtectedObjects::parse(data)?;

        let mut mac_input = self.ssc.clone();
        mac_input.extend_from_slice(objects.authenticated);
        self.verify(mac_input, &objects.mac)?;

        if let Some(status) = &objects.status {
            if status.as_slice() != PROCESSING_STATUS_OK {
                debug!(status = %hex::encode(status), "Protected response reports failure");
                return Err(Error::ProtocolMismatch("protected response status"));
            }
        }

        self.decrypt_object(objects.cryptogram.as_deref())
    }

    fn increment_ssc(&mut self) {
        for byte in self.ssc.iter_mut().rev() {
            *byte = byte.wrapping_add(1);
            if *byte != 0 {
                break;
            }
        }
    }

    /// Increment the counter, pad and encrypt, and encode the `85` object
    fn encrypt_object(&mut self, clear: &[u8]) -> Result<Vec<u8>> {
        if clear.len() > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge(clear.len()));
        }
        self.increment_ssc();
        trace!(clear = %hex::encode(clear), ssc = %hex::encode(&self.ssc), "Wrapping");

        let iv = vec![0u8; self.cipher.block_size()];
        let encrypted = crypto::encrypt_padded(self.cipher, &self.privacy_key, &iv, clear)?;
        Ok(Tlv::new(
            Tag::try_from(tags::CRYPTOGRAM)?,
            Value::Primitive(encrypted),
        )?
        .to_vec())
    }

    fn decrypt_object(&self, encrypted: Option<&[u8]>) -> Result<Vec<u8>> {
        let Some(encrypted) = encrypted else {
            return Ok(Vec::new());
        };
        let iv = vec![0u8; self.cipher.block_size()];
        let clear = crypto::decrypt_padded(self.cipher, &self.privacy_key, &iv, encrypted)?;
        trace!(clear = %hex::encode(&clear), ssc = %hex::encode(&self.ssc), "Unwrapped");
        Ok(clear)
    }

    fn mac(&self, mut input: Vec<u8>) -> Result<[u8; MAC_LEN]> {
        crypto::pad_iso7816(&mut input, self.cipher.block_size());
        crypto::cmac(self.cipher, &self.mac_key, &input)
    }

    fn verify(&self, mut input: Vec<u8>, mac: &[u8]) -> Result<()> {
        crypto::pad_iso7816(&mut input, self.cipher.block_size());
        crypto::verify_cmac(self.cipher, &self.mac_key, &input, mac)
            .map_err(|_| Error::IntegrityFailure("secure messaging mac"))
    }
}

/// Data objects of a protected message
#[derive(Debug)]
struct ProtectedObjects<'a> {
    /// Raw encoding of every object ahead of the MAC
    authenticated: &'a [u8],
    cryptogram: Option<Vec<u8>>,
    status: Option<Vec<u8>>,
    mac: Vec<u8>,
}

impl<'a> ProtectedObjects<'a> {
    fn parse(data: &'a [u8]) -> Result<Self> {
        let cryptogram_tag = Tag::try_from(tags::CRYPTOGRAM)?;
        let status_tag = Tag::try_from(tags::PROCESSING_STATUS)?;
        let mac_tag = Tag::try_from(tags::MAC)?;

        let mut cryptogram = None;
        let mut status = None;
        let mut rest = data;
        while !rest.is_empty() {
            let offset = data.len() - rest.len();
            let (tlv, remaining) = Tlv::parse(rest);
            let tlv = tlv?;
            let Value::Primitive(value) = tlv.value() else {
                return Err(Error::ProtocolMismatch("constructed secure messaging object"));
            };

            if tlv.tag() == &mac_tag {
                return Ok(Self {
                    authenticated: &data[..offset],
                    cryptogram,
                    status,
                    mac: value.clone(),
                });
            } else if tlv.tag() == &cryptogram_tag {
                cryptogram = Some(value.clone());
            } else if tlv.tag() == &status_tag {
                status = Some(value.clone());
            }
            rest = remaining;
        }

        Err(Error::IntegrityFailure("missing secure messaging mac"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::REQUEST_SIO;
    use crate::crypto::HashAlgorithm;
    use hex_literal::hex;

    fn material(cipher: CipherSuite, hash: HashAlgorithm) -> SessionMaterial {
        SessionMaterial {
            cipher,
            hash,
            rnd_icc: hex!("A1A2A3A4A5A6A7A8"),
            uid: hex!("0102030405060708"),
            c_nonce: hex!("C0C1C2C3C4C5C6C7C8C9CACBCCCDCECF"),
            r_nonce: hex!("D0D1D2D3D4D5D6D7D8D9DADBDCDDDEDF"),
        }
    }

    fn pair(cipher: CipherSuite) -> (SecureMessaging, SecureMessaging) {
        let material = material(cipher, HashAlgorithm::Sha1);
        (
            SecureMessaging::new(&material, Role::Reader),
            SecureMessaging::new(&material, Role::Card),
        )
    }

    #[test]
    fn test_initial_counter() {
        let (reader, _) = pair(CipherSuite::Aes128);
        assert_eq!(reader.ssc, hex!("A1A2A3A4A5A6A7A80102030405060708"));

        let (reader, _) = pair(CipherSuite::TripleDes);
        assert_eq!(reader.ssc, hex!("A1A2A3A401020304"));
    }

    #[test]
    fn test_counter_carries() {
        let (mut reader, _) = pair(CipherSuite::TripleDes);
        reader.ssc = hex!("00000000000000FF").to_vec();
        reader.increment_ssc();
        assert_eq!(reader.ssc, hex!("0000000000000100"));

        reader.ssc = vec![0xFF; 8];
        reader.increment_ssc();
        assert_eq!(reader.ssc, vec![0x00; 8]);
    }

    #[test]
    fn test_key_schedule_depends_on_hash() {
        let sha1 = SecureMessaging::new(
            &material(CipherSuite::Aes128, HashAlgorithm::Sha1),
            Role::Card,
        );
        let sha256 = SecureMessaging::new(
            &material(CipherSuite::Aes128, HashAlgorithm::Sha256),
            Role::Card,
        );
        assert_ne!(sha1.privacy_key, sha256.privacy_key);
        assert_ne!(sha1.privacy_key, sha1.mac_key);
    }

    #[test]
    fn test_wrap_unwrap_identity() {
        for cipher in [CipherSuite::TripleDes, CipherSuite::Aes128] {
            let (mut reader, mut card) = pair(cipher);
            for len in [0, 1, 8, 16, 127, 128, MAX_PAYLOAD_LEN] {
                let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();

                let command = reader.wrap(&payload).unwrap();
                assert!(header::SECURE_GET_DATA.matches(&command));
                assert_eq!(card.unwrap(&command).unwrap(), payload);

                let response = card.wrap(&payload).unwrap();
                assert_eq!(reader.unwrap(&response).unwrap(), payload);
            }
        }
    }

    #[test]
    fn test_command_layout() {
        let (mut reader, _) = pair(CipherSuite::TripleDes);
        let command = reader.wrap(&REQUEST_SIO).unwrap();
        // 4 bytes of cleartext pad to a single DES block
        assert_eq!(&command[..7], &hex!("0CCB3FFF16 8508"));
        assert_eq!(&command[15..19], &hex!("9700 8E08"));
        assert_eq!(command.len(), 5 + 0x16 + 1);
        assert_eq!(command[command.len() - 1], 0x00);
    }

    #[test]
    fn test_response_layout() {
        let (_, mut card) = pair(CipherSuite::Aes128);
        let response = card.wrap(&[0x42; 16]).unwrap();
        // Aligned cleartext still gains a full block of padding
        assert_eq!(&response[..2], &hex!("8520"));
        assert_eq!(&response[34..38], &hex!("99029000"));
        assert_eq!(&response[38..40], &hex!("8E08"));
        assert_eq!(response.len(), 48);
    }

    #[test]
    fn test_long_payload_uses_extended_length() {
        let (mut reader, mut card) = pair(CipherSuite::Aes128);
        let command = reader.wrap(&[0u8; 200]).unwrap();
        assert_eq!(&command[5..8], &hex!("8181D0"));
        assert_eq!(card.unwrap(&command).unwrap(), vec![0u8; 200]);
    }

    #[test]
    fn test_payload_too_large() {
        let (mut reader, _) = pair(CipherSuite::Aes128);
        assert!(matches!(
            reader.wrap(&[0u8; MAX_PAYLOAD_LEN + 1]),
            Err(Error::PayloadTooLarge(240))
        ));
    }

    #[test]
    fn test_tampered_command_is_rejected() {
        let (mut reader, mut card) = pair(CipherSuite::TripleDes);
        let mut command = reader.wrap(&REQUEST_SIO).unwrap().to_vec();
        command[8] ^= 0x01;
        assert!(matches!(
            card.unwrap(&command),
            Err(Error::IntegrityFailure(_))
        ));
    }

    #[test]
    fn test_replayed_command_is_rejected() {
        let (mut reader, mut card) = pair(CipherSuite::Aes128);
        let command = reader.wrap(&REQUEST_SIO).unwrap();
        assert_eq!(card.unwrap(&command).unwrap(), REQUEST_SIO);
        assert!(matches!(
            card.unwrap(&command),
            Err(Error::IntegrityFailure(_))
        ));
    }

    #[test]
    fn test_missing_mac_is_rejected() {
        let (_, mut card) = pair(CipherSuite::Aes128);
        assert!(matches!(
            card.unwrap(&hex!("0CCB3FFF02 9700 00")),
            Err(Error::IntegrityFailure(_))
        ));
    }
}
