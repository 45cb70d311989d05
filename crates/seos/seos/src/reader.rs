//! Reader side of the SEOS exchange
//!
//! A [`Reader`] holds the facility keys, builds the commands a door reader
//! sends and checks every card answer. It is used to capture credentials
//! from a card and to drive an [`Emulator`](crate::Emulator) end to end.

use bytes::Bytes;
use rand::RngCore;
use seos_apdu_core::{Command, Response};
use tracing::{debug, info, instrument};

use crate::adf::{self, AdfInfo};
use crate::auth::{self, CardCryptogram, Nonce, ReaderCryptogram, RndIcc, SessionMaterial, Uid};
use crate::constants::{DEFAULT_KEY_INDEX, GENERAL_AUTHENTICATE_1_DATA, REQUEST_SIO, aid, header, tags};
use crate::credential::Credential;
use crate::keys::{AuthKeys, FacilityKeys};
use crate::secure_messaging::{Role, SecureMessaging};
use crate::{Error, Result};

/// Reader state for one card session
#[derive(Debug)]
pub struct Reader {
    facility: FacilityKeys,
    key_index: u8,
    uid: Uid,
    c_nonce: Nonce,
    adf: Option<AdfInfo>,
    adf_response: Option<Vec<u8>>,
    keys: Option<AuthKeys>,
    rnd_icc: Option<RndIcc>,
    secure_messaging: Option<SecureMessaging>,
}

impl Reader {
    /// Create a reader with nonces from the thread RNG
    pub fn new(facility: FacilityKeys) -> Self {
        Self::with_rng(facility, &mut rand::rng())
    }

    /// Create a reader drawing its UID and nonce from `rng`
    pub fn with_rng<R: RngCore + ?Sized>(facility: FacilityKeys, rng: &mut R) -> Self {
        let mut uid = Uid::default();
        let mut c_nonce = Nonce::default();
        rng.fill_bytes(&mut uid);
        rng.fill_bytes(&mut c_nonce);
        Self {
            facility,
            key_index: DEFAULT_KEY_INDEX,
            uid,
            c_nonce,
            adf: None,
            adf_response: None,
            keys: None,
            rnd_icc: None,
            secure_messaging: None,
        }
    }

    /// Authenticate against another key index
    pub fn with_key_index(mut self, key_index: u8) -> Self {
        self.key_index = key_index;
        self
    }

    /// The ADF the card revealed, once accepted
    pub const fn adf(&self) -> Option<&AdfInfo> {
        self.adf.as_ref()
    }

    /// Whether mutual authentication completed
    pub const fn is_authenticated(&self) -> bool {
        self.secure_messaging.is_some()
    }

    /// SELECT the SEOS applet
    pub fn select_aid_command() -> Command {
        Command::with_header(header::SELECT, Bytes::from_static(&aid::SEOS)).with_le(0x00)
    }

    /// SELECT ADF listing the facility object identifier
    pub fn select_adf_command(&self) -> Command {
        let oid = &self.facility.adf_oid;
        let mut data = Vec::with_capacity(2 + oid.len());
        data.push(tags::OID);
        data.push(oid.len() as u8);
        data.extend_from_slice(oid);
        Command::with_header(header::SELECT_ADF, data).with_le(0x00)
    }

    /// Verify the ADF response and derive the credential keys from it
    pub fn accept_adf_response(&mut self, response: &[u8]) -> Result<&AdfInfo> {
        let info = adf::parse_response(&self.facility, response)?;
        if info.oid != self.facility.adf_oid {
            return Err(Error::ProtocolMismatch("card selected another ADF"));
        }
        let keys = self.facility.derive_keys(
            &info.diversifier,
            info.cipher,
            info.hash,
            self.key_index,
        )?;

        self.keys = Some(keys);
        self.adf_response = Some(response.to_vec());
        self.secure_messaging = None;
        Ok(self.adf.insert(info))
    }

    /// Ask the card for its challenge
    pub fn general_authenticate_1_command() -> Command {
        Command::with_header(
            header::general_authenticate(DEFAULT_KEY_INDEX),
            Bytes::from_static(&GENERAL_AUTHENTICATE_1_DATA),
        )
        .with_le(0x00)
    }

    /// Answer the card challenge with the sealed reader cryptogram
    pub fn general_authenticate_2_command(&mut self, rnd_icc: &RndIcc) -> Result<Command> {
        let (adf, keys) = self.negotiated()?;
        let cryptogram = ReaderCryptogram {
            uid: self.uid,
            rnd_icc: *rnd_icc,
            c_nonce: self.c_nonce,
        };
        let sealed = auth::seal(adf.cipher, keys, &cryptogram.to_bytes())?;
        let data = auth::encode_authentication_data(&sealed)?;

        self.rnd_icc = Some(*rnd_icc);
        Ok(Command::with_header(header::general_authenticate(self.key_index), data).with_le(0x00))
    }

    /// Check the card cryptogram and open the secure messaging session
    pub fn verify_card_cryptogram(&mut self, data: &[u8]) -> Result<()> {
        let (adf, keys) = self.negotiated()?;
        let rnd_icc = self
            .rnd_icc
            .ok_or(Error::ProtocolMismatch("no challenge answered"))?;

        let sealed = auth::decode_authentication_data(data)?;
        let card = CardCryptogram::from_bytes(&auth::open(adf.cipher, keys, &sealed)?);
        if card.rnd_icc != rnd_icc || card.uid != self.uid {
            return Err(Error::IntegrityFailure("card cryptogram does not echo the session"));
        }

        let material = SessionMaterial {
            cipher: adf.cipher,
            hash: adf.hash,
            rnd_icc,
            uid: self.uid,
            c_nonce: self.c_nonce,
            r_nonce: card.r_nonce,
        };
        self.secure_messaging = Some(SecureMessaging::new(&material, Role::Reader));
        info!("Card authenticated");
        Ok(())
    }

    /// Protected GET DATA for the SIO
    pub fn request_sio_command(&mut self) -> Result<Bytes> {
        self.session()?.wrap(&REQUEST_SIO)
    }

    /// Unwrap the SIO from a protected response data field
    pub fn parse_sio_response(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let clear = self.session()?.unwrap(data)?;
        match clear.as_slice() {
            [_, _, len, rest @ ..] if rest.len() >= usize::from(*len) => {
                Ok(rest[..usize::from(*len)].to_vec())
            }
            _ => Err(Error::ProtocolMismatch("truncated SIO file")),
        }
    }

    /// Credential holding the SIO and everything needed to replay this session
    pub fn captured_credential(&self, sio: Vec<u8>) -> Result<Credential> {
        let (adf, keys) = self.negotiated()?;
        let mut credential = Credential::new(adf.diversifier.clone(), sio)?;
        credential.priv_key = Some(keys.priv_key);
        credential.auth_key = Some(keys.auth_key);
        credential.adf_response = self.adf_response.clone();
        credential.adf_oid = adf.oid.clone();
        Ok(credential)
    }

    /// Run the whole exchange over `transmit` and capture the credential
    ///
    /// `transmit` sends one command APDU and returns the raw answer, status
    /// word included.
    #[instrument(skip_all, fields(key_index = self.key_index))]
    pub fn read_credential<F>(&mut self, mut transmit: F) -> Result<Credential>
    where
        F: FnMut(&[u8]) -> Result<Bytes>,
    {
        exchange(&mut transmit, &Self::select_aid_command().to_bytes())?;

        let response = exchange(&mut transmit, &self.select_adf_command().to_bytes())?;
        self.accept_adf_response(&response)?;

        let challenge = exchange(
            &mut transmit,
            &Self::general_authenticate_1_command().to_bytes(),
        )?;
        let rnd_icc = auth::decode_challenge(&challenge)?;

        let command = self.general_authenticate_2_command(&rnd_icc)?;
        let cryptogram = exchange(&mut transmit, &command.to_bytes())?;
        self.verify_card_cryptogram(&cryptogram)?;

        let command = self.request_sio_command()?;
        let protected = exchange(&mut transmit, &command)?;
        let sio = self.parse_sio_response(&protected)?;
        debug!(sio = %hex::encode(&sio), "Read SIO");

        self.captured_credential(sio)
    }

    fn negotiated(&self) -> Result<(&AdfInfo, &AuthKeys)> {
        match (&self.adf, &self.keys) {
            (Some(adf), Some(keys)) => Ok((adf, keys)),
            _ => Err(Error::ProtocolMismatch("no ADF selected")),
        }
    }

    fn session(&mut self) -> Result<&mut SecureMessaging> {
        self.secure_messaging
            .as_mut()
            .ok_or(Error::ProtocolMismatch("not authenticated"))
    }
}

/// Send one command and return the payload of a successful answer
fn exchange<F>(transmit: &mut F, command: &[u8]) -> Result<Vec<u8>>
where
    F: FnMut(&[u8]) -> Result<Bytes>,
{
    let raw = transmit(command)?;
    let response = Response::from_bytes(&raw)?;
    if !response.is_success() {
        return Err(seos_apdu_core::Error::status(response.status()).into());
    }
    Ok(response.payload().map(<[u8]>::to_vec).unwrap_or_default())
}
