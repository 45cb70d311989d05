//! Card-side APDU engine
//!
//! The [`Emulator`] answers one contactless frame at a time. It walks the
//! reader through applet selection, ADF selection and mutual authentication,
//! then serves the SIO over secure messaging:
//!
//! ```text
//! Idle -> AidSelected -> AdfSelected -> Authenticating -> SecureSession
//! ```
//!
//! Selecting any applet, losing the field or failing authentication returns
//! the engine to `Idle`.

use std::fmt;

use bytes::Bytes;
use iso7816_tlv::ber::{Tag, Tlv, Value};
use rand::{RngCore, SeedableRng, rngs::StdRng};
use seos_apdu_core::{Command, Frame, Header, Response, StatusWord, response::status::common};
use tracing::{Level, debug, info, instrument, trace, warn};

use crate::adf;
use crate::auth::{
    self, CardCryptogram, GENERAL_AUTHENTICATE_2_DATA_LEN, Nonce, ReaderCryptogram, RndIcc,
    SessionMaterial,
};
use crate::constants::{GENERAL_AUTHENTICATE_1_DATA, INSPECTION_TEMPLATE, REQUEST_SIO, aid, cla, header, ins, tags};
use crate::credential::Credential;
use crate::crypto::{CipherSuite, HashAlgorithm};
use crate::event::{Event, EventSink, NullSink};
use crate::keys::{AuthKeys, FacilityKeys};
use crate::secure_messaging::{Role, SecureMessaging};
use crate::{Error, Result};

/// What the emulator pretends to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmulatorMode {
    /// Emulate the credential
    #[default]
    Credential,
    /// Only answer the operation selector, to see what a reader asks for
    Inspect,
}

/// Emulator settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmulatorConfig {
    /// Cipher offered in freshly built ADF responses
    pub cipher: CipherSuite,
    /// Hash offered in freshly built ADF responses
    pub hash: HashAlgorithm,
    /// Emulation mode
    pub mode: EmulatorMode,
}

/// Protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// Nothing selected
    #[default]
    Idle,
    /// The SEOS applet is selected
    AidSelected,
    /// An ADF matched
    AdfSelected,
    /// The card challenge was handed out
    Authenticating,
    /// Mutual authentication succeeded
    SecureSession,
}

/// Whether the transport should keep the contactless session open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    /// Keep listening
    Continue,
    /// Stop emulating this session
    Stop,
}

/// Outcome of one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Frame to transmit, prologue included and CRC excluded
    pub frame: Option<Bytes>,
    /// Session control for the transport
    pub session: SessionControl,
}

/// Answer to one APDU, before the prologue is added
#[derive(Debug)]
struct Answer {
    response: Option<Response>,
    session: SessionControl,
}

impl Answer {
    const fn respond(response: Response) -> Self {
        Self {
            response: Some(response),
            session: SessionControl::Continue,
        }
    }

    fn status(status: StatusWord) -> Self {
        Self::respond(Response::error(status))
    }

    fn success(payload: impl Into<Bytes>) -> Self {
        Self::respond(Response::success(Some(payload.into())))
    }

    const fn silent() -> Self {
        Self {
            response: None,
            session: SessionControl::Continue,
        }
    }
}

/// Negotiated parameters of the current ADF selection
#[derive(Debug, Clone, Copy)]
struct AuthSession {
    cipher: CipherSuite,
    hash: HashAlgorithm,
    /// Whether the captured ADF response was served, so captured keys apply
    captured: bool,
}

/// SEOS credential emulator
pub struct Emulator {
    credential: Credential,
    facility: Option<FacilityKeys>,
    config: EmulatorConfig,
    sink: Box<dyn EventSink + Send>,
    rng: StdRng,
    state: State,
    rnd_icc: RndIcc,
    r_nonce: Nonce,
    session: Option<AuthSession>,
    secure_messaging: Option<SecureMessaging>,
}

impl fmt::Debug for Emulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emulator")
            .field("credential", &self.credential)
            .field("config", &self.config)
            .field("state", &self.state)
            .field("session", &self.session)
            .field("secure_messaging", &self.secure_messaging.is_some())
            .finish_non_exhaustive()
    }
}

impl Emulator {
    /// Create an emulator seeded from the thread RNG
    ///
    /// Facility keys are needed unless the credential carries a captured ADF
    /// response and captured keys.
    pub fn new(
        credential: Credential,
        facility: Option<FacilityKeys>,
        config: EmulatorConfig,
    ) -> Self {
        Self::with_rng(
            credential,
            facility,
            config,
            StdRng::from_rng(&mut rand::rng()),
        )
    }

    /// Create an emulator with an explicit RNG
    pub fn with_rng(
        credential: Credential,
        facility: Option<FacilityKeys>,
        config: EmulatorConfig,
        rng: StdRng,
    ) -> Self {
        let mut emulator = Self {
            credential,
            facility,
            config,
            sink: Box::new(NullSink),
            rng,
            state: State::Idle,
            rnd_icc: [0; auth::RND_ICC_LEN],
            r_nonce: [0; auth::NONCE_LEN],
            session: None,
            secure_messaging: None,
        };
        emulator.power_up();
        emulator
    }

    /// Report milestones to `sink`
    pub fn with_sink(mut self, sink: impl EventSink + Send + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Current protocol state
    pub const fn state(&self) -> State {
        self.state
    }

    /// The emulated credential
    pub const fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Whether a secure messaging session is live
    pub const fn has_secure_session(&self) -> bool {
        self.secure_messaging.is_some()
    }

    /// The field came up: reset and draw fresh card nonces
    pub fn power_up(&mut self) {
        self.field_lost();
        self.rng.fill_bytes(&mut self.rnd_icc);
        self.rng.fill_bytes(&mut self.r_nonce);
        trace!(rnd_icc = %hex::encode(self.rnd_icc), "Powered up");
    }

    /// The field was lost: drop every session
    pub fn field_lost(&mut self) {
        self.reset();
        self.state = State::Idle;
    }

    /// Handle one inbound ISO 14443-4 block
    #[instrument(skip_all, fields(len = raw.len(), state = ?self.state))]
    pub fn handle_frame(&mut self, raw: &[u8]) -> Reply {
        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "Dropping malformed frame");
                return Reply {
                    frame: None,
                    session: SessionControl::Continue,
                };
            }
        };
        if frame.is_empty() {
            debug!("No contents in frame");
            return Reply {
                frame: None,
                session: SessionControl::Continue,
            };
        }
        trace!(frame = %hex::encode(raw), "NFC received");

        let answer = match self.config.mode {
            EmulatorMode::Credential => self.process(frame.inf),
            EmulatorMode::Inspect => self.inspect(frame.inf),
        };

        let frame_out = answer.response.map(|response| {
            log_status(response.status());
            frame.prologue.wrap(&response.to_bytes())
        });
        if let Some(out) = &frame_out {
            trace!(frame = %hex::encode(out), "NFC transmit");
        }
        Reply {
            frame: frame_out,
            session: answer.session,
        }
    }

    fn process(&mut self, apdu: &[u8]) -> Answer {
        let Ok(header) = Header::from_bytes(apdu) else {
            return self.unknown(apdu);
        };

        if header == header::SELECT {
            self.select_aid(apdu)
        } else if header == header::SELECT_ADF {
            self.select_adf(apdu)
        } else if header.cla == cla::ISO7816 && header.ins == ins::GENERAL_AUTHENTICATE {
            self.general_authenticate(apdu)
        } else if header == header::SECURE_GET_DATA {
            self.secure_get_data(apdu)
        } else {
            self.unknown(apdu)
        }
    }

    fn unknown(&mut self, apdu: &[u8]) -> Answer {
        debug!(apdu = %hex::encode(apdu), "Unhandled APDU");
        if self.secure_messaging.is_none() {
            self.sink.notify(Event::Listening);
        }
        Answer::status(common::INVALID_INSTRUCTION)
    }

    fn select_aid(&mut self, apdu: &[u8]) -> Answer {
        self.reset();
        self.state = State::Idle;

        let command = match Command::from_bytes(apdu) {
            Ok(command) => command,
            Err(error) => {
                debug!(%error, "Malformed SELECT");
                return Answer::status(common::WRONG_LENGTH);
            }
        };

        match command.data() {
            selected if selected == aid::SEOS => match fci(&aid::SEOS) {
                Ok(fci) => {
                    info!("SEOS applet selected");
                    self.state = State::AidSelected;
                    self.sink.notify(Event::AidSelected);
                    Answer::success(fci)
                }
                Err(error) => {
                    warn!(%error, "Could not encode FCI");
                    Answer::status(common::FILE_NOT_FOUND)
                }
            },
            selected if selected == aid::OPERATION_SELECTOR_POST_RESET => {
                info!("Operation selector (post reset) selected");
                Answer::status(common::FILE_NOT_FOUND)
            }
            selected if selected == aid::OPERATION_SELECTOR => {
                info!("Operation selector selected");
                Answer::status(common::FILE_NOT_FOUND)
            }
            selected if selected == aid::MOBILE_SEOS_ADMIN => {
                info!("Mobile SEOS admin card selected");
                Answer::status(common::FILE_NOT_FOUND)
            }
            other => {
                debug!(aid = %hex::encode(other), "Reject select");
                Answer::status(common::FILE_NOT_FOUND)
            }
        }
    }

    fn select_adf(&mut self, apdu: &[u8]) -> Answer {
        if self.state == State::Idle {
            debug!("SELECT ADF without a selected applet");
            return Answer::status(common::FILE_NOT_FOUND);
        }
        let command = match Command::from_bytes(apdu) {
            Ok(command) => command,
            Err(error) => {
                debug!(%error, "Malformed SELECT ADF");
                return Answer::status(common::WRONG_LENGTH);
            }
        };
        let oid_list = command.data();
        self.reset();
        self.state = State::AidSelected;

        if let Some(response) = self.captured_adf_response(oid_list) {
            return response;
        }

        let Some(facility) = &self.facility else {
            warn!("Failed to match any ADF OID, no facility keys");
            return Answer::status(common::FILE_NOT_FOUND);
        };
        if !adf::contains_oid(oid_list, &facility.adf_oid) {
            warn!(oids = %hex::encode(oid_list), "Failed to match any ADF OID");
            return Answer::status(common::FILE_NOT_FOUND);
        }
        debug!(oid = %hex::encode(&facility.adf_oid), "Select ADF OID (keys)");

        let (cipher, hash) = (self.config.cipher, self.config.hash);
        match adf::build_response(
            facility,
            cipher,
            hash,
            &self.credential.diversifier,
            &mut self.rng,
        ) {
            Ok(response) => {
                self.adf_selected(AuthSession {
                    cipher,
                    hash,
                    captured: false,
                });
                Answer::success(response)
            }
            Err(error) => {
                warn!(%error, "Could not build ADF response");
                Answer::status(common::FILE_NOT_FOUND)
            }
        }
    }

    /// Serve the captured ADF response when it applies to this selection
    ///
    /// The captured response is matched on OID and cipher only. A credential
    /// whose diversifier was edited after capture keeps serving the response
    /// holding the old diversifier.
    fn captured_adf_response(&mut self, oid_list: &[u8]) -> Option<Answer> {
        let credential = &self.credential;
        if !adf::contains_oid(oid_list, &credential.adf_oid) {
            return None;
        }
        let response = credential.adf_response.as_ref()?;
        debug!(oid = %hex::encode(&credential.adf_oid), "Select ADF OID (credential)");

        let (cipher, hash) = match adf::algorithms(response) {
            Ok(algorithms) => algorithms,
            Err(error) => {
                warn!(%error, "Ignoring captured ADF response");
                return None;
            }
        };
        if cipher != self.config.cipher {
            debug!(?cipher, "Captured ADF response uses another cipher");
            return None;
        }

        info!("Using captured ADF response");
        let response = Bytes::copy_from_slice(response);
        self.adf_selected(AuthSession {
            cipher,
            hash,
            captured: true,
        });
        Some(Answer::success(response))
    }

    fn adf_selected(&mut self, session: AuthSession) {
        self.session = Some(session);
        self.state = State::AdfSelected;
        self.sink.notify(Event::AdfMatched);
    }

    fn general_authenticate(&mut self, apdu: &[u8]) -> Answer {
        let is_step_one = apdu.get(5..5 + GENERAL_AUTHENTICATE_1_DATA.len())
            == Some(&GENERAL_AUTHENTICATE_1_DATA[..]);
        if is_step_one {
            return self.general_authenticate_1();
        }

        match self.general_authenticate_2(apdu) {
            Ok(data) => Answer::success(data),
            Err(error) => {
                warn!(%error, "Failure in General Authenticate 2");
                self.reset();
                self.state = State::Idle;
                self.sink.notify(Event::ReaderError);
                Answer {
                    response: Some(Response::error(common::SECURITY_CONDITION_NOT_SATISFIED)),
                    session: SessionControl::Stop,
                }
            }
        }
    }

    fn general_authenticate_1(&mut self) -> Answer {
        if self.session.is_none() {
            debug!("General Authenticate without a selected ADF");
            return Answer::status(common::SECURITY_CONDITION_NOT_SATISFIED);
        }
        match auth::encode_challenge(&self.rnd_icc) {
            Ok(challenge) => {
                self.state = State::Authenticating;
                Answer::success(challenge)
            }
            Err(error) => {
                warn!(%error, "Could not encode challenge");
                Answer::status(common::SECURITY_CONDITION_NOT_SATISFIED)
            }
        }
    }

    fn general_authenticate_2(&mut self, apdu: &[u8]) -> Result<Vec<u8>> {
        let session = self
            .session
            .ok_or(Error::ProtocolMismatch("General Authenticate without a selected ADF"))?;
        let command = Command::from_bytes(apdu).map_err(|_| Error::TransportDesync {
            expected: 5 + GENERAL_AUTHENTICATE_2_DATA_LEN + 1,
            actual: apdu.len(),
        })?;
        if command.data().len() != GENERAL_AUTHENTICATE_2_DATA_LEN {
            return Err(Error::TransportDesync {
                expected: GENERAL_AUTHENTICATE_2_DATA_LEN,
                actual: command.data().len(),
            });
        }

        let key_index = command.p2;
        let keys = self.authentication_keys(session, key_index)?;
        let sealed = auth::decode_authentication_data(command.data())?;
        let reader = ReaderCryptogram::from_bytes(&auth::open(session.cipher, &keys, &sealed)?);
        if reader.rnd_icc != self.rnd_icc {
            return Err(Error::IntegrityFailure("incorrect rndICC returned"));
        }

        let card = CardCryptogram {
            rnd_icc: self.rnd_icc,
            uid: reader.uid,
            r_nonce: self.r_nonce,
        };
        let response = auth::encode_authentication_data(&auth::seal(
            session.cipher,
            &keys,
            &card.to_bytes(),
        )?)?;

        let material = SessionMaterial {
            cipher: session.cipher,
            hash: session.hash,
            rnd_icc: self.rnd_icc,
            uid: reader.uid,
            c_nonce: reader.c_nonce,
            r_nonce: self.r_nonce,
        };
        self.secure_messaging = Some(SecureMessaging::new(&material, Role::Card));
        self.state = State::SecureSession;
        info!(key_index, uid = %hex::encode(reader.uid), "Reader authenticated");
        self.sink.notify(Event::Authenticated);
        Ok(response)
    }

    fn authentication_keys(&self, session: AuthSession, key_index: u8) -> Result<AuthKeys> {
        if session.captured {
            if let Some(keys) = self.credential.cached_keys() {
                debug!("Using captured keys");
                return Ok(keys);
            }
        }
        let facility = self
            .facility
            .as_ref()
            .ok_or_else(|| Error::configuration("no facility keys to derive credential keys"))?;
        facility.derive_keys(
            &self.credential.diversifier,
            session.cipher,
            session.hash,
            key_index,
        )
    }

    fn secure_get_data(&mut self, apdu: &[u8]) -> Answer {
        let Some(secure_messaging) = self.secure_messaging.as_mut() else {
            debug!("Protected command without secure messaging");
            return Answer::status(common::NO_SECURE_MESSAGING);
        };

        let clear = match secure_messaging.unwrap(apdu) {
            Ok(clear) => clear,
            Err(error) => {
                warn!(%error, "Could not unwrap protected command");
                self.reset();
                self.state = State::Idle;
                self.sink.notify(Event::ReaderError);
                return Answer::status(common::NO_SECURE_MESSAGING);
            }
        };
        trace!(clear = %hex::encode(&clear), "NFC received (clear)");

        if !clear.starts_with(&REQUEST_SIO) {
            debug!(clear = %hex::encode(&clear), "Unsupported protected GET DATA");
            return Answer::status(common::REFERENCED_DATA_NOT_FOUND);
        }

        info!("SIO requested");
        self.sink.notify(Event::SioRequested);
        let sio = &self.credential.sio;
        let mut file = Vec::with_capacity(3 + sio.len());
        file.extend_from_slice(&clear[2..4]);
        file.push(sio.len() as u8);
        file.extend_from_slice(sio);

        match secure_messaging.wrap(&file) {
            Ok(protected) => Answer::success(protected),
            Err(error) => {
                warn!(%error, "Could not wrap SIO");
                Answer::status(common::NO_SECURE_MESSAGING)
            }
        }
    }

    fn inspect(&mut self, apdu: &[u8]) -> Answer {
        if header::SELECT.matches(apdu) {
            let selected = Command::from_bytes(apdu).ok();
            if selected.as_ref().map(Command::data) == Some(&aid::OPERATION_SELECTOR[..]) {
                info!("Operation selector selected, inspecting reader");
                self.state = State::AidSelected;
                self.sink.notify(Event::AidSelected);
                return Answer::success(Bytes::from_static(&INSPECTION_TEMPLATE));
            }
            return Answer::status(common::FILE_NOT_FOUND);
        }

        if apdu.len() > 2 {
            info!(len = apdu.len(), apdu = %hex::encode(apdu), "Reader moved on, stopping");
            self.sink.notify(Event::ReaderError);
            return Answer {
                response: None,
                session: SessionControl::Stop,
            };
        }
        Answer::silent()
    }

    fn reset(&mut self) {
        self.session = None;
        self.secure_messaging = None;
    }
}

/// File Control Information for an applet: `6F <len> 84 <len> <aid>`
fn fci(aid: &[u8]) -> Result<Vec<u8>> {
    Ok(Tlv::new(
        Tag::try_from(tags::FCI_TEMPLATE)?,
        Value::Constructed(vec![Tlv::new(
            Tag::try_from(tags::DF_NAME)?,
            Value::Primitive(aid.to_vec()),
        )?]),
    )?
    .to_vec())
}

fn log_status(status: StatusWord) {
    match status.tracing_level() {
        Level::DEBUG => debug!(%status, "Responding"),
        Level::INFO => info!(%status, description = status.description(), "Responding"),
        _ => warn!(%status, description = status.description(), "Responding"),
    }
}
