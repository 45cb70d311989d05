//! SEOS exchange over the BLE characteristic
//!
//! [`SeosLink`] is the [`LinkHandler`] that runs SEOS on a connection. It
//! joins ACL fragments into attribute protocol PDUs, lets the [`AttBearer`]
//! answer discovery, and hands every characteristic value to the local side
//! of the exchange:
//!
//! - a credential feeds the value to an [`Emulator`] and sends back its answer
//! - a reader sends SELECT once the link is ready and walks the card through
//!   ADF selection, mutual authentication and the SIO read
//!
//! Every value starts with [`BLE_START`], which stands in for the ISO 14443-4
//! block prologue the emulator expects on the contactless interface.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use seos::{
    Credential, Emulator, Event, EventSink, FacilityKeys, NullSink, Reader, Response, auth,
};
use tracing::{debug, info, warn};

use crate::att::{AttBearer, Delivery, Side};
use crate::config::DEFAULT_DEVICE_NAME;
use crate::controller::{AclQueue, LinkHandler};
use crate::l2cap::{self, Reassembler};
use crate::packet::LinkRole;

/// First byte of every SEOS message on the characteristic
pub const BLE_START: u8 = 0xC0;

/// First byte of peer messages that carry no APDU
const BLE_IGNORED: u8 = 0xE1;

/// Slot receiving the credential a reader link captures
///
/// Clones share the slot, keep one to collect the result.
#[derive(Debug, Clone, Default)]
pub struct CapturedCredential(Arc<Mutex<Option<Credential>>>);

impl CapturedCredential {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the captured credential, leaving the slot empty
    pub fn take(&self) -> Option<Credential> {
        self.0.lock().take()
    }

    /// Whether a credential is waiting
    pub fn is_captured(&self) -> bool {
        self.0.lock().is_some()
    }

    fn store(&self, credential: Credential) {
        *self.0.lock() = Some(credential);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    SelectAid,
    SelectAdf,
    Challenge,
    Cryptogram,
    Sio,
}

/// Reader side of one exchange
#[derive(Debug)]
struct ReaderFlow {
    facility: FacilityKeys,
    reader: Reader,
    phase: Phase,
    captured: CapturedCredential,
}

impl ReaderFlow {
    fn new(facility: FacilityKeys, captured: CapturedCredential) -> Self {
        Self {
            reader: Reader::new(facility.clone()),
            facility,
            phase: Phase::Idle,
            captured,
        }
    }

    /// Fresh session, starting with SELECT
    fn start(&mut self) -> Vec<u8> {
        self.reader = Reader::new(self.facility.clone());
        self.phase = Phase::SelectAid;
        Reader::select_aid_command().to_bytes().to_vec()
    }

    /// Check one card answer and build the next command
    fn advance(
        &mut self,
        answer: &[u8],
        sink: &mut dyn EventSink,
    ) -> seos::Result<Option<Vec<u8>>> {
        let response = Response::from_bytes(answer)?;
        if !response.is_success() {
            warn!(status = ?response.status(), phase = ?self.phase, "Card refused the command");
            return Err(seos::Error::ProtocolMismatch("card refused the command"));
        }
        let payload = response.payload().unwrap_or_default();

        let next = match self.phase {
            Phase::Idle => {
                debug!("No exchange running, ignoring answer");
                return Ok(None);
            }
            Phase::SelectAid => {
                self.phase = Phase::SelectAdf;
                self.reader.select_adf_command().to_bytes()
            }
            Phase::SelectAdf => {
                let adf = self.reader.accept_adf_response(payload)?;
                debug!(cipher = ?adf.cipher, "ADF accepted");
                self.phase = Phase::Challenge;
                Reader::general_authenticate_1_command().to_bytes()
            }
            Phase::Challenge => {
                let rnd_icc = auth::decode_challenge(payload)?;
                let command = self.reader.general_authenticate_2_command(&rnd_icc)?;
                self.phase = Phase::Cryptogram;
                command.to_bytes()
            }
            Phase::Cryptogram => {
                self.reader.verify_card_cryptogram(payload)?;
                sink.notify(Event::Authenticated);
                let command = self.reader.request_sio_command()?;
                sink.notify(Event::SioRequested);
                self.phase = Phase::Sio;
                command
            }
            Phase::Sio => {
                let sio = self.reader.parse_sio_response(payload)?;
                let credential = self.reader.captured_credential(sio)?;
                info!(credential = %credential.summary(), "Credential captured");
                self.captured.store(credential);
                sink.notify(Event::CredentialCaptured);
                self.phase = Phase::Idle;
                return Ok(None);
            }
        };
        Ok(Some(next.to_vec()))
    }
}

#[derive(Debug)]
enum Flow {
    Credential(Box<Emulator>),
    Reader(Box<ReaderFlow>),
}

/// [`LinkHandler`] running one side of the SEOS exchange
pub struct SeosLink {
    bearer: AttBearer,
    reassembler: Reassembler,
    flow: Flow,
    sink: Box<dyn EventSink + Send>,
}

impl fmt::Debug for SeosLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeosLink")
            .field("bearer", &self.bearer)
            .field("flow", &self.flow)
            .finish_non_exhaustive()
    }
}

impl SeosLink {
    /// Answer readers with `emulator`
    pub fn credential(emulator: Emulator) -> Self {
        Self::with_flow(Side::Credential, Flow::Credential(Box::new(emulator)))
    }

    /// Read credentials with `facility`, storing each capture in `captured`
    pub fn reader(facility: FacilityKeys, captured: CapturedCredential) -> Self {
        Self::with_flow(
            Side::Reader,
            Flow::Reader(Box::new(ReaderFlow::new(facility, captured))),
        )
    }

    fn with_flow(side: Side, flow: Flow) -> Self {
        Self {
            bearer: AttBearer::new(side, DEFAULT_DEVICE_NAME),
            reassembler: Reassembler::new(),
            flow,
            sink: Box::new(NullSink),
        }
    }

    /// Serve `name` as the GAP device name
    pub fn with_device_name(mut self, name: &str) -> Self {
        self.bearer = AttBearer::new(self.bearer.side(), name);
        self
    }

    /// Report reader milestones to `sink`
    ///
    /// A credential link reports through the emulator sink instead.
    pub fn with_sink(mut self, sink: impl EventSink + Send + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Side of the exchange this link runs
    pub const fn side(&self) -> Side {
        self.bearer.side()
    }

    /// The attribute bearer
    pub const fn bearer(&self) -> &AttBearer {
        &self.bearer
    }

    fn connected(&mut self, role: LinkRole, queue: &mut AclQueue) {
        info!(?role, side = ?self.side(), "SEOS link up");
        self.reassembler.reset();
        match &mut self.flow {
            Flow::Credential(emulator) => emulator.power_up(),
            Flow::Reader(flow) => flow.phase = Phase::Idle,
        }
        let mut out = Vec::new();
        self.bearer.connected(role, &mut out);
        send(out, queue);
    }

    /// Message to send once values can flow
    fn ready(&mut self) -> Option<Vec<u8>> {
        let apdu = match &mut self.flow {
            Flow::Credential(_) => {
                debug!("Characteristic ready, waiting for the reader");
                None
            }
            Flow::Reader(flow) => {
                info!("Characteristic ready, selecting the credential");
                Some(flow.start())
            }
        };
        apdu.map(|apdu| message(&apdu))
    }

    /// Answer to one characteristic value
    fn value(&mut self, value: &[u8]) -> Option<Vec<u8>> {
        let (&start, body) = value.split_first()?;
        if start == BLE_IGNORED {
            debug!(value = %hex::encode(value), "Ignoring message");
            return None;
        }
        if start != BLE_START {
            warn!(start, "Unexpected start of SEOS message");
        }

        match &mut self.flow {
            Flow::Credential(emulator) => {
                let reply = emulator.handle_frame(&message(body));
                reply.frame.map(|frame| frame.to_vec())
            }
            Flow::Reader(flow) => match flow.advance(body, self.sink.as_mut()) {
                Ok(next) => next.map(|apdu| message(&apdu)),
                Err(e) => {
                    warn!(error = %e, "Reader exchange failed");
                    self.sink.notify(Event::ReaderError);
                    flow.phase = Phase::Idle;
                    None
                }
            },
        }
    }
}

impl LinkHandler for SeosLink {
    fn central_connected(&mut self, _handle: u16, queue: &mut AclQueue) {
        self.connected(LinkRole::Central, queue);
    }

    fn peripheral_connected(&mut self, _handle: u16) {
        // A peripheral waits for the central to speak first
        self.connected(LinkRole::Peripheral, &mut AclQueue::default());
    }

    fn acl_received(&mut self, _handle: u16, flags: u8, payload: &[u8], queue: &mut AclQueue) {
        let frame = match self.reassembler.push(flags, payload) {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Dropping ACL data");
                return;
            }
        };
        if frame.cid != l2cap::ATT_CID {
            debug!(cid = frame.cid, "Ignoring L2CAP channel");
            return;
        }

        let mut out = Vec::new();
        let delivery = self.bearer.process(&frame.payload, &mut out);
        let answer = match delivery {
            Some(Delivery::Ready) => self.ready(),
            Some(Delivery::Value(value)) => self.value(&value),
            None => None,
        };
        out.extend(answer.and_then(|answer| self.bearer.value_pdu(&answer)));
        send(out, queue);
    }

    fn disconnected(&mut self, handle: u16) {
        debug!(handle, "SEOS link down");
        self.bearer.disconnected();
        self.reassembler.reset();
        match &mut self.flow {
            Flow::Credential(emulator) => emulator.field_lost(),
            Flow::Reader(flow) => flow.phase = Phase::Idle,
        }
    }
}

/// `apdu` behind the SEOS message start byte
fn message(apdu: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + apdu.len());
    out.push(BLE_START);
    out.extend_from_slice(apdu);
    out
}

fn send(pdus: Vec<Vec<u8>>, queue: &mut AclQueue) {
    for pdu in pdus {
        match l2cap::frame(l2cap::ATT_CID, &pdu) {
            Ok(frame) => queue.push(frame),
            Err(e) => warn!(error = %e, "Dropping ATT PDU"),
        }
    }
}
