//! HCI controller engine
//!
//! Drives a Bluetooth LE controller from reset to advertising (peripheral) or
//! scanning (central), follows connections, and moves ACL data for the link.
//! Every bring-up command is sent only after the previous one completed.
//!
//! Advertising and scan enable/disable commands are occasionally completed
//! without the host seeing the event. Each such command therefore arms a
//! [`PendingConfirmation`]: a timer input past its deadline re-sends the same
//! command until the completion event arrives.

use std::fmt;
use std::time::{Duration, Instant};

use seos::{Event, EventSink, NullSink};
use tracing::{debug, info, instrument, trace, warn};

use crate::advertising::{self, CREDENTIAL_SERVICE, READER_SERVICE};
use crate::config::HciConfig;
use crate::opcode::Opcode;
use crate::packet::{self, Address, AdvertisingReport, HciEvent, LinkRole, Packet, PacketType};
use crate::transport::HciTransport;
use crate::{Error, Result};

/// Event mask enabling the events this engine relies on
const EVENT_MASK: [u8; 8] = [0xFF, 0xFF, 0xFB, 0xFF, 0x07, 0xF8, 0xBF, 0x3D];
/// Connection, advertising report and connection update LE events
const LE_EVENT_MASK: [u8; 8] = [0x1F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
/// LE supported by the host, simultaneous LE and BR/EDR not
const LE_HOST_SUPPORT: [u8; 2] = [0x01, 0x00];
/// 100 ms connectable undirected advertising on all channels
const ADVERTISING_PARAMETERS: [u8; 15] = [
    0xA0, 0x00, 0xA0, 0x00, 0x00, 0x00, 0x01, 0xDE, 0xAF, 0xBE, 0xEF, 0xCA, 0xFE, 0x07, 0x00,
];
/// Passive scanning, 10 ms interval and window, no filtering
const SCAN_PARAMETERS: [u8; 7] = [0x00, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00];
/// Remote user terminated connection
const DISCONNECT_REASON: u8 = 0x13;
/// Connectable undirected advertising
const ADV_IND: u8 = 0x00;
/// LE ACL data length every controller accepts
const DEFAULT_ACL_MTU: usize = 27;

/// Link layer role of the local device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BleMode {
    /// Advertise and wait for a connection
    #[default]
    Peripheral,
    /// Scan and initiate connections
    Central,
}

/// Which side of the SEOS exchange runs over the link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlowRole {
    /// Act as a credential, looking for readers
    #[default]
    Credential,
    /// Act as a reader, looking for credentials
    Reader,
    /// Report readers in range without connecting
    ReaderScanner,
    /// Report credentials in range without connecting
    CredentialScanner,
}

impl FlowRole {
    /// Service a peer must advertise to match
    pub const fn wanted_service(self) -> &'static [u8; 16] {
        match self {
            Self::Credential | Self::ReaderScanner => &READER_SERVICE,
            Self::Reader | Self::CredentialScanner => &CREDENTIAL_SERVICE,
        }
    }

    /// Service advertised in peripheral mode
    pub const fn advertised_service(self) -> &'static [u8; 16] {
        match self {
            Self::Reader => &READER_SERVICE,
            _ => &CREDENTIAL_SERVICE,
        }
    }

    /// Whether matches are only reported, never connected to
    pub const fn is_scanner(self) -> bool {
        matches!(self, Self::ReaderScanner | Self::CredentialScanner)
    }
}

/// One unit of input to the controller engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input<'a> {
    /// The transport to the radio controller is ready
    Init,
    /// An inbound packet, H4 indicator included
    Packet(&'a [u8]),
    /// The retry timer fired
    Timer(Instant),
}

/// ACL payloads a [`LinkHandler`] wants sent on the current connection
///
/// The controller sends the queue once the callback returns, split into
/// fragments the radio accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclQueue {
    payloads: Vec<Vec<u8>>,
}

impl AclQueue {
    /// Queue one complete L2CAP frame
    pub fn push(&mut self, payload: impl Into<Vec<u8>>) {
        self.payloads.push(payload.into());
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Queued frames, oldest first
    pub fn payloads(&self) -> &[Vec<u8>] {
        &self.payloads
    }

    fn take(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.payloads)
    }
}

/// Receiver of link level callbacks
pub trait LinkHandler: Send {
    /// A connection we initiated is up
    fn central_connected(&mut self, _handle: u16, _queue: &mut AclQueue) {}

    /// A peer connected to us
    fn peripheral_connected(&mut self, _handle: u16) {}

    /// One ACL fragment arrived on the current connection
    fn acl_received(
        &mut self,
        _handle: u16,
        _flags: u8,
        _payload: &[u8],
        _queue: &mut AclQueue,
    ) {
    }

    /// The current connection closed
    fn disconnected(&mut self, _handle: u16) {}

    /// The controller finished sending ACL packets
    fn packets_completed(&mut self, _counts: &[(u16, u16)]) {}
}

/// Handler that ignores every callback
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLinkHandler;

impl LinkHandler for NoopLinkHandler {}

/// An enable or disable request awaiting its completion event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    /// LE Set Advertise Enable
    Advertising(bool),
    /// LE Set Scan Enable
    Scanning(bool),
}

impl Toggle {
    /// Command carrying the request
    pub const fn opcode(self) -> Opcode {
        match self {
            Self::Advertising(_) => Opcode::LE_SET_ADVERTISE_ENABLE,
            Self::Scanning(_) => Opcode::LE_SET_SCAN_ENABLE,
        }
    }
}

/// Retry state of an unconfirmed [`Toggle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingConfirmation {
    /// Request to repeat
    pub toggle: Toggle,
    /// Timer inputs at or after this instant re-send the request
    pub deadline: Instant,
}

/// Bluetooth LE controller engine
pub struct HciController<T: HciTransport> {
    transport: T,
    config: HciConfig,
    sink: Box<dyn EventSink + Send>,
    link: Box<dyn LinkHandler>,
    started: bool,
    mode: BleMode,
    role: FlowRole,
    advertising: bool,
    scanning: bool,
    connection_handle: u16,
    found: Option<(u8, Address)>,
    connecting: bool,
    known_addresses: Vec<Address>,
    pending: Option<PendingConfirmation>,
    acl_mtu: usize,
}

impl<T: HciTransport> fmt::Debug for HciController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HciController")
            .field("transport", &self.transport)
            .field("started", &self.started)
            .field("mode", &self.mode)
            .field("role", &self.role)
            .field("advertising", &self.advertising)
            .field("scanning", &self.scanning)
            .field("connection_handle", &self.connection_handle)
            .field("connecting", &self.connecting)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl<T: HciTransport> HciController<T> {
    /// Create an idle controller engine
    pub fn new(transport: T, config: HciConfig) -> Self {
        Self {
            transport,
            config,
            sink: Box::new(NullSink),
            link: Box::new(NoopLinkHandler),
            started: false,
            mode: BleMode::default(),
            role: FlowRole::default(),
            advertising: false,
            scanning: false,
            connection_handle: 0,
            found: None,
            connecting: false,
            known_addresses: Vec::new(),
            pending: None,
            acl_mtu: DEFAULT_ACL_MTU,
        }
    }

    /// Report milestones to `sink`
    pub fn with_sink(mut self, sink: impl EventSink + Send + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Deliver link callbacks to `link`
    pub fn with_link_handler(mut self, link: impl LinkHandler + 'static) -> Self {
        self.link = Box::new(link);
        self
    }

    /// Select the mode and flow role. Bring-up begins with the next
    /// [`Input::Init`].
    pub fn start(&mut self, mode: BleMode, role: FlowRole) {
        info!(?mode, ?role, "Starting HCI controller");
        self.started = true;
        self.mode = mode;
        self.role = role;
        self.reset_link_state();
    }

    /// Disconnect, disable advertising or scanning and forget scanned devices
    pub fn stop(&mut self) {
        info!("Stopping HCI controller");
        if self.connection_handle != 0 {
            let [lo, hi] = self.connection_handle.to_le_bytes();
            if let Err(e) = self.command(Opcode::DISCONNECT, &[lo, hi, DISCONNECT_REASON]) {
                warn!(error = %e, "Failed to disconnect");
            }
            self.link.disconnected(self.connection_handle);
        }

        let disable = match self.mode {
            BleMode::Peripheral if self.advertising => Some(Toggle::Advertising(false)),
            BleMode::Central if self.scanning => Some(Toggle::Scanning(false)),
            _ => None,
        };
        if let Some(toggle) = disable
            && let Err(e) = self.send_toggle(toggle)
        {
            warn!(error = %e, "Failed to disable the radio");
        }

        self.started = false;
        self.reset_link_state();
        self.known_addresses.clear();
    }

    /// Process one input. Faults are logged, never returned.
    #[instrument(skip_all, fields(handle = self.connection_handle))]
    pub fn handle(&mut self, input: Input<'_>) {
        if !self.started {
            debug!(?input, "Controller not started, ignoring input");
            return;
        }
        let result = match input {
            Input::Init => self.init(),
            Input::Packet(raw) => self.packet(raw),
            Input::Timer(now) => self.timer(now),
        };
        if let Err(e) = result {
            warn!(error = %e, "HCI input failed");
        }
    }

    /// Send one ACL packet on the current connection
    pub fn send_acl(&mut self, flags: u8, payload: &[u8]) -> Result<()> {
        if self.connection_handle == 0 {
            return Err(Error::NotConnected);
        }
        let packet = packet::acl(self.connection_handle, flags, payload)?;
        self.transport
            .send(PacketType::AclData, &packet)
            .map_err(Into::into)
    }

    /// Current mode
    pub const fn mode(&self) -> BleMode {
        self.mode
    }

    /// Current flow role
    pub const fn role(&self) -> FlowRole {
        self.role
    }

    /// Whether advertising was last requested on
    pub const fn is_advertising(&self) -> bool {
        self.advertising
    }

    /// Whether scanning was last requested on
    pub const fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Handle of the open connection
    pub const fn connection_handle(&self) -> Option<u16> {
        match self.connection_handle {
            0 => None,
            handle => Some(handle),
        }
    }

    /// Address of the matched peer a connection is being set up with
    pub fn found_device(&self) -> Option<Address> {
        self.found.map(|(_, address)| address)
    }

    /// Addresses reported by a scanner role so far
    pub fn known_addresses(&self) -> &[Address] {
        &self.known_addresses
    }

    /// The unconfirmed enable or disable request, if any
    pub const fn pending(&self) -> Option<&PendingConfirmation> {
        self.pending.as_ref()
    }

    /// The transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably
    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn reset_link_state(&mut self) {
        self.advertising = false;
        self.scanning = false;
        self.connection_handle = 0;
        self.found = None;
        self.connecting = false;
        self.pending = None;
    }

    fn init(&mut self) -> Result<()> {
        self.reset_link_state();
        self.command(Opcode::RESET, &[])?;
        self.sink.notify(Event::HciInit);
        Ok(())
    }

    fn timer(&mut self, now: Instant) -> Result<()> {
        let Some(pending) = self.pending else {
            trace!("Timer fired with nothing pending");
            return Ok(());
        };
        if now < pending.deadline {
            trace!("Timer fired before the deadline");
            return Ok(());
        }
        if self.connection_handle != 0
            && matches!(pending.toggle, Toggle::Advertising(true) | Toggle::Scanning(true))
        {
            debug!(toggle = ?pending.toggle, "Connected, dropping radio enable retry");
            self.pending = None;
            return Ok(());
        }
        info!(toggle = ?pending.toggle, "No confirmation, sending again");
        self.send_toggle_at(pending.toggle, now)
    }

    fn packet(&mut self, raw: &[u8]) -> Result<()> {
        match Packet::parse(raw)? {
            Packet::Event(event) => self.event(event),
            Packet::Acl(acl) => {
                if acl.handle != self.connection_handle {
                    warn!(
                        handle = acl.handle,
                        expected = self.connection_handle,
                        "ACL data for another connection, dropping"
                    );
                    return Ok(());
                }
                trace!(payload = %hex::encode(acl.payload), flags = acl.flags, "ACL data");
                let mut queue = AclQueue::default();
                self.link.acl_received(acl.handle, acl.flags, acl.payload, &mut queue);
                self.flush(&mut queue)
            }
        }
    }

    fn event(&mut self, event: HciEvent<'_>) -> Result<()> {
        match event {
            HciEvent::CommandComplete {
                opcode,
                status,
                parameters,
            } => {
                if status != 0 {
                    return Err(Error::controller_fault(status, opcode.to_string()));
                }
                debug!(%opcode, "Command complete");
                self.command_complete(opcode, parameters)
            }
            HciEvent::CommandStatus { status, opcode } => {
                if status != 0 {
                    return Err(Error::controller_fault(status, opcode.to_string()));
                }
                trace!(%opcode, "Command pending");
                Ok(())
            }
            HciEvent::HardwareError { code } => {
                Err(Error::controller_fault(code, "Hardware Error"))
            }
            HciEvent::DisconnectionComplete {
                status,
                handle,
                reason,
            } => {
                if status != 0 {
                    return Err(Error::controller_fault(status, "Disconnection Complete"));
                }
                self.disconnected(handle, reason)
            }
            HciEvent::NumberOfCompletedPackets(counts) => {
                trace!(?counts, "Completed packets");
                self.link.packets_completed(&counts);
                Ok(())
            }
            HciEvent::LeConnectionComplete {
                status,
                handle,
                role,
                peer_address,
                ..
            } => {
                self.connecting = false;
                if status != 0 {
                    self.connection_failed();
                    return Err(Error::controller_fault(status, "LE Connection Complete"));
                }
                info!(
                    handle,
                    ?role,
                    peer = %hex::encode(peer_address),
                    "Connection complete"
                );
                self.connection_handle = handle;
                if let Some(pending) = self.pending.take() {
                    debug!(toggle = ?pending.toggle, "Connected, dropping unconfirmed toggle");
                }
                self.sink.notify(Event::Connected);
                match role {
                    LinkRole::Central => {
                        let mut queue = AclQueue::default();
                        self.link.central_connected(handle, &mut queue);
                        self.flush(&mut queue)
                    }
                    LinkRole::Peripheral => {
                        self.link.peripheral_connected(handle);
                        Ok(())
                    }
                }
            }
            HciEvent::LeAdvertisingReport(report) => self.advertising_report(report),
            HciEvent::Unhandled { code, subevent } => {
                debug!(code, ?subevent, "Unhandled event");
                Ok(())
            }
        }
    }

    /// Advance bring-up or confirm a pending toggle
    fn command_complete(&mut self, opcode: Opcode, parameters: &[u8]) -> Result<()> {
        match opcode {
            Opcode::RESET => self.command(Opcode::SET_EVENT_MASK, &EVENT_MASK),
            Opcode::SET_EVENT_MASK => self.command(Opcode::WRITE_LE_HOST_SUPPORT, &LE_HOST_SUPPORT),
            Opcode::WRITE_LE_HOST_SUPPORT => {
                self.command(Opcode::LE_SET_EVENT_MASK, &LE_EVENT_MASK)
            }
            Opcode::LE_SET_EVENT_MASK => self.command(Opcode::LE_READ_BUFFER_SIZE, &[]),
            Opcode::LE_READ_BUFFER_SIZE => {
                if let [lo, hi, ..] = parameters {
                    let mtu = usize::from(u16::from_le_bytes([*lo, *hi]));
                    // Zero means the LE buffers are shared with BR/EDR
                    if mtu != 0 {
                        debug!(mtu, "LE ACL buffer size");
                        self.acl_mtu = mtu;
                    }
                }
                self.command(Opcode::READ_BD_ADDR, &[])
            }
            Opcode::READ_BD_ADDR => {
                let address = parameters
                    .get(..6)
                    .ok_or(Error::Malformed("short Read BD_ADDR parameters"))?;
                debug!(address = %hex::encode(address), "Controller address");
                if address.iter().all(|&b| b == 0) {
                    let public_address = self.config.public_address;
                    self.command(Opcode::VENDOR_SET_PUBLIC_ADDRESS, &public_address)
                } else {
                    self.set_random_address()
                }
            }
            Opcode::VENDOR_SET_PUBLIC_ADDRESS => self.set_random_address(),
            Opcode::LE_SET_RANDOM_ADDRESS => self.command(Opcode::LE_READ_LOCAL_FEATURES, &[]),
            Opcode::LE_READ_LOCAL_FEATURES => match self.mode {
                BleMode::Peripheral => self.command(
                    Opcode::LE_SET_ADVERTISING_PARAMETERS,
                    &ADVERTISING_PARAMETERS,
                ),
                BleMode::Central => self.command(Opcode::LE_SET_SCAN_PARAMETERS, &SCAN_PARAMETERS),
            },
            Opcode::LE_SET_ADVERTISING_PARAMETERS => {
                let data = advertising::advertising_data(self.role.advertised_service());
                self.command(
                    Opcode::LE_SET_ADVERTISING_DATA,
                    &advertising::padded_parameters(&data),
                )
            }
            Opcode::LE_SET_ADVERTISING_DATA => {
                let data = advertising::scan_response_data(&self.config);
                self.command(
                    Opcode::LE_SET_SCAN_RESPONSE_DATA,
                    &advertising::padded_parameters(&data),
                )
            }
            Opcode::LE_SET_SCAN_RESPONSE_DATA => self.send_toggle(Toggle::Advertising(true)),
            Opcode::LE_SET_SCAN_PARAMETERS => self.send_toggle(Toggle::Scanning(true)),
            Opcode::LE_SET_ADVERTISE_ENABLE => {
                self.confirm(opcode);
                if self.advertising {
                    info!("Advertising enabled");
                    self.sink.notify(Event::Advertising);
                } else {
                    info!("Advertising disabled");
                }
                Ok(())
            }
            Opcode::LE_SET_SCAN_ENABLE => {
                self.confirm(opcode);
                if self.scanning {
                    info!("Scanning enabled");
                    self.sink.notify(Event::Scanning);
                    Ok(())
                } else if let Some((address_type, address)) = self.found
                    && !self.connecting
                {
                    self.connect(address_type, address)
                } else {
                    info!("Scanning disabled");
                    Ok(())
                }
            }
            _ => {
                debug!(%opcode, "No follow-up for command");
                Ok(())
            }
        }
    }

    fn set_random_address(&mut self) -> Result<()> {
        let random_address = self.config.random_address;
        self.command(Opcode::LE_SET_RANDOM_ADDRESS, &random_address)
    }

    fn confirm(&mut self, opcode: Opcode) {
        if self
            .pending
            .is_some_and(|pending| pending.toggle.opcode() == opcode)
        {
            self.pending = None;
        }
    }

    fn advertising_report(&mut self, report: AdvertisingReport<'_>) -> Result<()> {
        if self.found.is_some() || report.event_type != ADV_IND {
            return Ok(());
        }
        if !advertising::advertises_service(report.data, self.role.wanted_service()) {
            return Ok(());
        }

        let name = advertising::local_name(report.data).unwrap_or_default();
        if self.role.is_scanner() {
            if self.remember(report.address) {
                info!(name = %name, address = %hex::encode(report.address), "New device in range");
                self.sink.notify(Event::NewDevice(report.address));
            }
            return Ok(());
        }

        info!(name = %name, address = %hex::encode(report.address), "Matched SEOS service");
        self.found = Some((report.address_type, report.address));
        self.sink.notify(Event::DeviceFound);
        self.send_toggle(Toggle::Scanning(false))
    }

    /// Record `address`, returning whether it was new. A full table
    /// reports nothing new.
    fn remember(&mut self, address: Address) -> bool {
        if self.known_addresses.contains(&address) {
            return false;
        }
        if self.known_addresses.len() >= self.config.known_address_capacity {
            debug!(address = %hex::encode(address), "Known address table full");
            return false;
        }
        self.known_addresses.push(address);
        true
    }

    fn connect(&mut self, address_type: u8, address: Address) -> Result<()> {
        info!(address = %hex::encode(address), "Creating connection");
        self.connecting = true;
        let mut parameters = Vec::with_capacity(25);
        // Scan interval, scan window, initiator filter policy
        parameters.extend_from_slice(&[0x60, 0x00, 0x60, 0x00, 0x00]);
        parameters.push(address_type);
        parameters.extend_from_slice(&address);
        // Own address type (random)
        parameters.push(0x01);
        // Interval min, interval max, latency, supervision timeout, CE lengths
        parameters.extend_from_slice(&[
            0x18, 0x00, 0x28, 0x00, 0x00, 0x00, 0x90, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]);
        self.command(Opcode::LE_CREATE_CONNECTION, &parameters)
    }

    /// A connection attempt we started failed, go back to scanning
    fn connection_failed(&mut self) {
        if self.mode != BleMode::Central || self.found.take().is_none() {
            return;
        }
        info!("Connection failed, scanning again");
        if let Err(e) = self.send_toggle(Toggle::Scanning(true)) {
            warn!(error = %e, "Failed to restart scanning");
        }
    }

    fn disconnected(&mut self, handle: u16, reason: u8) -> Result<()> {
        info!(handle, reason, "Disconnected");
        self.connection_handle = 0;
        self.link.disconnected(handle);
        self.sink.notify(Event::Disconnected);
        match self.mode {
            BleMode::Peripheral if self.advertising => {
                info!("Restarting advertising");
                self.send_toggle(Toggle::Advertising(true))
            }
            BleMode::Peripheral => Ok(()),
            BleMode::Central => {
                info!("Scanning again");
                self.found = None;
                self.send_toggle(Toggle::Scanning(true))
            }
        }
    }

    /// Send what the link handler queued, fragmented to the controller buffer
    fn flush(&mut self, queue: &mut AclQueue) -> Result<()> {
        for frame in queue.take() {
            let mut flags = packet::boundary::FIRST_NON_FLUSHABLE;
            for fragment in frame.chunks(self.acl_mtu.max(1)) {
                self.send_acl(flags, fragment)?;
                flags = packet::boundary::CONTINUATION;
            }
        }
        Ok(())
    }

    fn send_toggle(&mut self, toggle: Toggle) -> Result<()> {
        self.send_toggle_at(toggle, Instant::now())
    }

    /// Send `toggle` and arm its retry. The retry is armed even when the
    /// send fails so the next timer input tries again.
    fn send_toggle_at(&mut self, toggle: Toggle, now: Instant) -> Result<()> {
        let retry: Duration = match toggle {
            Toggle::Advertising(enable) => {
                self.advertising = enable;
                self.config.advertising_retry
            }
            Toggle::Scanning(enable) => {
                self.scanning = enable;
                self.config.scan_retry
            }
        };
        self.pending = Some(PendingConfirmation {
            toggle,
            deadline: now + retry,
        });
        match toggle {
            Toggle::Advertising(enable) => self.command(toggle.opcode(), &[u8::from(enable)]),
            Toggle::Scanning(enable) => self.command(toggle.opcode(), &[u8::from(enable), 0x00]),
        }
    }

    fn command(&mut self, opcode: Opcode, parameters: &[u8]) -> Result<()> {
        debug!(%opcode, parameters = %hex::encode(parameters), "Sending command");
        let packet = packet::command(opcode, parameters)?;
        self.transport
            .send(PacketType::Command, &packet)
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hex_literal::hex;
    use parking_lot::Mutex;
    use seos::EventLog;

    use super::*;
    use crate::packet::{event_code, le_subevent};
    use crate::transport::RecordingTransport;

    const BD_ADDR: Address = hex!("E2F284DAD4D4");
    const PEER: Address = hex!("2DB88EE137C3");

    #[derive(Debug, Clone, Default)]
    struct RecordingLink {
        central: Arc<Mutex<Vec<u16>>>,
        peripheral: Arc<Mutex<Vec<u16>>>,
        disconnected: Arc<Mutex<Vec<u16>>>,
        acl: Arc<Mutex<Vec<(u16, u8, Vec<u8>)>>>,
        completed: Arc<Mutex<Vec<(u16, u16)>>>,
        /// Frame queued in answer to every ACL fragment
        reply: Option<Vec<u8>>,
    }

    impl LinkHandler for RecordingLink {
        fn central_connected(&mut self, handle: u16, _queue: &mut AclQueue) {
            self.central.lock().push(handle);
        }

        fn peripheral_connected(&mut self, handle: u16) {
            self.peripheral.lock().push(handle);
        }

        fn acl_received(&mut self, handle: u16, flags: u8, payload: &[u8], queue: &mut AclQueue) {
            self.acl.lock().push((handle, flags, payload.to_vec()));
            if let Some(reply) = &self.reply {
                queue.push(reply.clone());
            }
        }

        fn disconnected(&mut self, handle: u16) {
            self.disconnected.lock().push(handle);
        }

        fn packets_completed(&mut self, counts: &[(u16, u16)]) {
            self.completed.lock().extend_from_slice(counts);
        }
    }

    struct Harness {
        controller: HciController<RecordingTransport>,
        events: EventLog,
        link: RecordingLink,
    }

    impl Harness {
        fn new(mode: BleMode, role: FlowRole) -> Self {
            Self::with_config(mode, role, HciConfig::default())
        }

        fn with_config(mode: BleMode, role: FlowRole, config: HciConfig) -> Self {
            Self::with_link(mode, role, config, RecordingLink::default())
        }

        fn with_link(mode: BleMode, role: FlowRole, config: HciConfig, link: RecordingLink) -> Self {
            let events = EventLog::new();
            let mut controller = HciController::new(RecordingTransport::default(), config)
                .with_sink(events.clone())
                .with_link_handler(link.clone());
            controller.start(mode, role);
            Self {
                controller,
                events,
                link,
            }
        }

        fn feed(&mut self, raw: &[u8]) {
            self.controller.handle(Input::Packet(raw));
        }

        fn sent(&mut self) -> Vec<Vec<u8>> {
            self.controller.transport_mut().take_commands()
        }

        /// Answer every bring-up command until the radio enable is sent
        fn bring_up(&mut self, bd_addr: Address) -> Vec<Vec<u8>> {
            self.controller.handle(Input::Init);
            let mut sent = Vec::new();
            loop {
                let commands = self.sent();
                let last = commands.last().cloned().expect("a command");
                sent.extend(commands);
                let opcode = Opcode::from_u16(u16::from_le_bytes([last[0], last[1]]));
                if opcode == Opcode::LE_SET_ADVERTISE_ENABLE || opcode == Opcode::LE_SET_SCAN_ENABLE
                {
                    return sent;
                }
                let parameters: &[u8] = match opcode {
                    Opcode::READ_BD_ADDR => &bd_addr,
                    // 32 byte LE ACL buffers
                    Opcode::LE_READ_BUFFER_SIZE => &[0x20, 0x00, 0x04],
                    _ => &[],
                };
                self.feed(&complete(opcode, 0x00, parameters));
            }
        }

        /// Bring up and confirm the radio enable
        fn running(mode: BleMode, role: FlowRole) -> Self {
            let mut harness = Self::new(mode, role);
            harness.bring_up(BD_ADDR);
            let opcode = match mode {
                BleMode::Peripheral => Opcode::LE_SET_ADVERTISE_ENABLE,
                BleMode::Central => Opcode::LE_SET_SCAN_ENABLE,
            };
            harness.feed(&complete(opcode, 0x00, &[]));
            assert!(harness.controller.pending().is_none());
            harness
        }
    }

    fn opcodes(commands: &[Vec<u8>]) -> Vec<Opcode> {
        commands
            .iter()
            .map(|command| Opcode::from_u16(u16::from_le_bytes([command[0], command[1]])))
            .collect()
    }

    fn complete(opcode: Opcode, status: u8, parameters: &[u8]) -> Vec<u8> {
        let [lo, hi] = opcode.to_le_bytes();
        let mut raw = vec![
            0x04,
            event_code::COMMAND_COMPLETE,
            (4 + parameters.len()) as u8,
            0x01,
            lo,
            hi,
            status,
        ];
        raw.extend_from_slice(parameters);
        raw
    }

    fn advertising_report(event_type: u8, address: Address, data: &[u8]) -> Vec<u8> {
        let mut parameters = vec![le_subevent::ADVERTISING_REPORT, 0x01, event_type, 0x01];
        parameters.extend_from_slice(&address);
        parameters.push(data.len() as u8);
        parameters.extend_from_slice(data);
        parameters.push(0xC5);
        let mut raw = vec![0x04, event_code::LE_META, parameters.len() as u8];
        raw.extend(parameters);
        raw
    }

    fn connection_complete(handle: u16, role: u8) -> Vec<u8> {
        let [lo, hi] = handle.to_le_bytes();
        let mut raw = vec![0x04, 0x3E, 0x13, 0x01, 0x00, lo, hi, role, 0x01];
        raw.extend_from_slice(&PEER);
        raw.extend_from_slice(&hex!("1800 0000 9000 00"));
        raw
    }

    fn disconnection_complete(handle: u16) -> Vec<u8> {
        let [lo, hi] = handle.to_le_bytes();
        vec![0x04, 0x05, 0x04, 0x00, lo, hi, 0x13]
    }

    #[test]
    fn test_peripheral_bring_up() {
        let mut harness = Harness::new(BleMode::Peripheral, FlowRole::Credential);
        let sent = harness.bring_up(BD_ADDR);

        assert_eq!(
            opcodes(&sent),
            vec![
                Opcode::RESET,
                Opcode::SET_EVENT_MASK,
                Opcode::WRITE_LE_HOST_SUPPORT,
                Opcode::LE_SET_EVENT_MASK,
                Opcode::LE_READ_BUFFER_SIZE,
                Opcode::READ_BD_ADDR,
                Opcode::LE_SET_RANDOM_ADDRESS,
                Opcode::LE_READ_LOCAL_FEATURES,
                Opcode::LE_SET_ADVERTISING_PARAMETERS,
                Opcode::LE_SET_ADVERTISING_DATA,
                Opcode::LE_SET_SCAN_RESPONSE_DATA,
                Opcode::LE_SET_ADVERTISE_ENABLE,
            ]
        );
        assert_eq!(sent[0], hex!("030C00"));
        assert_eq!(sent[1], hex!("010C08 FFFFFBFF07F8BF3D"));
        assert_eq!(sent[2], hex!("6D0C02 0100"));
        assert_eq!(sent[3], hex!("012008 1F00000000000000"));
        assert_eq!(sent[6], hex!("052006 CAFE00000003"));
        assert_eq!(sent[8], hex!("06200F A000A000 00 00 01 DEAFBEEFCAFE 07 00"));
        assert_eq!(
            sent[9],
            hex!(
                "082020 15 020106 1107 0200007A170000800010000001980000"
                "00000000000000000000"
            )
        );
        assert_eq!(sent[10].len(), 3 + 32);
        assert_eq!(&sent[10][..5], &hex!("092020 1E 08"));
        assert_eq!(sent[11], hex!("0A2001 01"));

        assert_eq!(harness.events.events(), vec![Event::HciInit]);
        assert!(harness.controller.is_advertising());
        assert_eq!(
            harness.controller.pending().map(|p| p.toggle),
            Some(Toggle::Advertising(true))
        );

        harness.feed(&complete(Opcode::LE_SET_ADVERTISE_ENABLE, 0x00, &[]));
        assert!(harness.controller.pending().is_none());
        assert_eq!(harness.events.count(Event::Advertising), 1);
    }

    #[test]
    fn test_reader_advertises_reader_service() {
        let mut harness = Harness::new(BleMode::Peripheral, FlowRole::Reader);
        let sent = harness.bring_up(BD_ADDR);
        assert_eq!(
            &sent[9][7..25],
            &hex!("1107 0200007A170000800010000000980000")
        );
    }

    #[test]
    fn test_central_bring_up() {
        let mut harness = Harness::new(BleMode::Central, FlowRole::Credential);
        let sent = harness.bring_up(BD_ADDR);

        let opcodes = opcodes(&sent);
        assert_eq!(
            &opcodes[7..],
            &[
                Opcode::LE_READ_LOCAL_FEATURES,
                Opcode::LE_SET_SCAN_PARAMETERS,
                Opcode::LE_SET_SCAN_ENABLE,
            ]
        );
        assert_eq!(sent[8], hex!("0B2007 00 1000 1000 00 00"));
        assert_eq!(sent[9], hex!("0C2002 01 00"));

        harness.feed(&complete(Opcode::LE_SET_SCAN_ENABLE, 0x00, &[]));
        assert_eq!(harness.events.count(Event::Scanning), 1);
        assert!(harness.controller.is_scanning());
    }

    #[test]
    fn test_zero_address_sets_public_address() {
        let mut harness = Harness::new(BleMode::Peripheral, FlowRole::Credential);
        let sent = harness.bring_up([0; 6]);

        assert_eq!(
            &opcodes(&sent)[5..8],
            &[
                Opcode::READ_BD_ADDR,
                Opcode::VENDOR_SET_PUBLIC_ADDRESS,
                Opcode::LE_SET_RANDOM_ADDRESS,
            ]
        );
        assert_eq!(sent[6], hex!("06FC06 0000010221AD"));
    }

    #[test]
    fn test_retry_until_confirmed() {
        let mut harness = Harness::new(BleMode::Peripheral, FlowRole::Credential);
        harness.bring_up(BD_ADDR);
        let deadline = harness.controller.pending().expect("pending").deadline;

        harness
            .controller
            .handle(Input::Timer(deadline - Duration::from_millis(10)));
        assert!(harness.sent().is_empty());

        harness.controller.handle(Input::Timer(deadline));
        assert_eq!(harness.sent(), vec![hex!("0A2001 01").to_vec()]);

        // Re-armed one interval later
        harness.controller.handle(Input::Timer(deadline));
        assert!(harness.sent().is_empty());
        let next = deadline + Duration::from_secs(1);
        assert_eq!(harness.controller.pending().expect("pending").deadline, next);
        harness.controller.handle(Input::Timer(next));
        assert_eq!(harness.sent().len(), 1);

        // A failed completion keeps retrying
        harness.feed(&complete(Opcode::LE_SET_ADVERTISE_ENABLE, 0x0C, &[]));
        assert!(harness.controller.pending().is_some());
        assert_eq!(harness.events.count(Event::Advertising), 0);

        harness.feed(&complete(Opcode::LE_SET_ADVERTISE_ENABLE, 0x00, &[]));
        assert!(harness.controller.pending().is_none());
        harness
            .controller
            .handle(Input::Timer(next + Duration::from_secs(60)));
        assert!(harness.sent().is_empty());
        assert_eq!(harness.events.count(Event::Advertising), 1);
    }

    #[test]
    fn test_scan_retry_interval() {
        let mut harness = Harness::new(BleMode::Central, FlowRole::Reader);
        harness.bring_up(BD_ADDR);
        let deadline = harness.controller.pending().expect("pending").deadline;
        harness.controller.handle(Input::Timer(deadline));
        assert_eq!(
            harness.controller.pending().expect("pending").deadline,
            deadline + Duration::from_millis(100)
        );
        assert_eq!(harness.sent(), vec![hex!("0C2002 01 00").to_vec()]);
    }

    #[test]
    fn test_central_connects_to_first_match() {
        let mut harness = Harness::running(BleMode::Central, FlowRole::Credential);
        let reader = advertising::advertising_data(&READER_SERVICE);

        // Non-connectable and unrelated advertisements are ignored
        harness.feed(&advertising_report(0x03, PEER, &reader));
        harness.feed(&advertising_report(
            ADV_IND,
            PEER,
            &advertising::advertising_data(&CREDENTIAL_SERVICE),
        ));
        assert!(harness.sent().is_empty());

        harness.feed(&advertising_report(ADV_IND, PEER, &reader));
        assert_eq!(harness.sent(), vec![hex!("0C2002 00 00").to_vec()]);
        assert_eq!(harness.controller.found_device(), Some(PEER));
        assert_eq!(harness.events.count(Event::DeviceFound), 1);

        // A second match while connecting changes nothing
        harness.feed(&advertising_report(ADV_IND, BD_ADDR, &reader));
        assert!(harness.sent().is_empty());
        assert_eq!(harness.controller.found_device(), Some(PEER));

        harness.feed(&complete(Opcode::LE_SET_SCAN_ENABLE, 0x00, &[]));
        assert_eq!(
            harness.sent(),
            vec![
                hex!(
                    "0D2019 6000 6000 00 01 2DB88EE137C3 01 1800 2800 0000 9000 0000 0000"
                )
                .to_vec()
            ]
        );

        harness.feed(&hex!("04 0F 04 00 01 0D20"));
        harness.feed(&connection_complete(0x0040, 0x00));
        assert_eq!(harness.controller.connection_handle(), Some(0x0040));
        assert_eq!(harness.events.count(Event::Connected), 1);
        assert_eq!(*harness.link.central.lock(), vec![0x0040]);
    }

    #[test]
    fn test_peripheral_connection_skips_central_callback() {
        let mut harness = Harness::running(BleMode::Peripheral, FlowRole::Credential);
        harness.feed(&connection_complete(0x0041, 0x01));
        assert_eq!(harness.controller.connection_handle(), Some(0x0041));
        assert_eq!(harness.events.count(Event::Connected), 1);
        assert!(harness.link.central.lock().is_empty());
        assert_eq!(*harness.link.peripheral.lock(), vec![0x0041]);
    }

    #[test]
    fn test_connection_cancels_unconfirmed_enable() {
        let mut harness = Harness::new(BleMode::Peripheral, FlowRole::Credential);
        harness.bring_up(BD_ADDR);
        let deadline = harness.controller.pending().expect("pending").deadline;

        // The enable completion never shows up before a central connects
        harness.feed(&connection_complete(0x0041, 0x01));
        assert!(harness.controller.pending().is_none());
        harness.controller.handle(Input::Timer(deadline));
        assert!(harness.sent().is_empty());

        // A late rejection does not re-arm anything either
        harness.feed(&complete(Opcode::LE_SET_ADVERTISE_ENABLE, 0x0C, &[]));
        assert!(harness.controller.pending().is_none());
        harness
            .controller
            .handle(Input::Timer(deadline + Duration::from_secs(5)));
        assert!(harness.sent().is_empty());

        // Advertising resumes once the link is gone
        harness.feed(&disconnection_complete(0x0041));
        assert_eq!(harness.sent(), vec![hex!("0A2001 01").to_vec()]);
    }

    #[test]
    fn test_scan_disable_retry_connects_once() {
        let mut harness = Harness::running(BleMode::Central, FlowRole::Credential);
        let reader = advertising::advertising_data(&READER_SERVICE);
        harness.feed(&advertising_report(ADV_IND, PEER, &reader));
        let deadline = harness.controller.pending().expect("pending").deadline;
        harness.controller.handle(Input::Timer(deadline));
        assert_eq!(
            harness.sent(),
            vec![hex!("0C2002 00 00").to_vec(), hex!("0C2002 00 00").to_vec()]
        );

        // Both the first and the repeated disable complete
        harness.feed(&complete(Opcode::LE_SET_SCAN_ENABLE, 0x00, &[]));
        harness.feed(&complete(Opcode::LE_SET_SCAN_ENABLE, 0x00, &[]));
        let connects = opcodes(&harness.sent())
            .into_iter()
            .filter(|&opcode| opcode == Opcode::LE_CREATE_CONNECTION)
            .count();
        assert_eq!(connects, 1);
    }

    #[test]
    fn test_failed_central_connection_rescans() {
        let mut harness = Harness::running(BleMode::Central, FlowRole::Reader);
        let credential = advertising::advertising_data(&CREDENTIAL_SERVICE);
        harness.feed(&advertising_report(ADV_IND, PEER, &credential));
        harness.feed(&complete(Opcode::LE_SET_SCAN_ENABLE, 0x00, &[]));
        harness.sent();

        let mut raw = connection_complete(0x0040, 0x00);
        raw[4] = 0x3E;
        harness.feed(&raw);
        assert_eq!(harness.sent(), vec![hex!("0C2002 01 00").to_vec()]);
        assert!(harness.controller.found_device().is_none());
        assert!(harness.controller.is_scanning());
        assert!(harness.link.central.lock().is_empty());

        // The next match is acted on again
        harness.feed(&complete(Opcode::LE_SET_SCAN_ENABLE, 0x00, &[]));
        harness.feed(&advertising_report(ADV_IND, PEER, &credential));
        assert_eq!(harness.sent(), vec![hex!("0C2002 00 00").to_vec()]);
        assert_eq!(harness.controller.found_device(), Some(PEER));
    }

    #[test]
    fn test_failed_connection() {
        let mut harness = Harness::running(BleMode::Peripheral, FlowRole::Credential);
        let mut raw = connection_complete(0x0041, 0x01);
        raw[4] = 0x3E;
        harness.feed(&raw);
        assert_eq!(harness.controller.connection_handle(), None);
        assert_eq!(harness.events.count(Event::Connected), 0);
    }

    #[test]
    fn test_scanner_reports_new_devices_once() {
        let mut harness = Harness::running(BleMode::Central, FlowRole::ReaderScanner);
        let reader = advertising::advertising_data(&READER_SERVICE);
        let other: Address = hex!("010203040506");
        harness.events.take();

        harness.feed(&advertising_report(ADV_IND, PEER, &reader));
        harness.feed(&advertising_report(ADV_IND, PEER, &reader));
        harness.feed(&advertising_report(ADV_IND, other, &reader));
        harness.feed(&advertising_report(
            ADV_IND,
            hex!("AABBCCDDEEFF"),
            &advertising::advertising_data(&CREDENTIAL_SERVICE),
        ));

        assert_eq!(
            harness.events.take(),
            vec![Event::NewDevice(PEER), Event::NewDevice(other)]
        );
        assert_eq!(harness.controller.known_addresses(), &[PEER, other]);
        // Scanners never stop scanning or connect
        assert!(harness.sent().is_empty());
        assert!(harness.controller.found_device().is_none());
    }

    #[test]
    fn test_known_address_capacity() {
        let config = HciConfig {
            known_address_capacity: 1,
            ..Default::default()
        };
        let mut harness =
            Harness::with_config(BleMode::Central, FlowRole::CredentialScanner, config);
        harness.bring_up(BD_ADDR);
        harness.feed(&complete(Opcode::LE_SET_SCAN_ENABLE, 0x00, &[]));
        harness.events.take();

        let credential = advertising::advertising_data(&CREDENTIAL_SERVICE);
        harness.feed(&advertising_report(ADV_IND, PEER, &credential));
        harness.feed(&advertising_report(ADV_IND, BD_ADDR, &credential));
        harness.feed(&advertising_report(ADV_IND, PEER, &credential));

        assert_eq!(harness.events.take(), vec![Event::NewDevice(PEER)]);
        assert_eq!(harness.controller.known_addresses(), &[PEER]);
    }

    #[test]
    fn test_peripheral_disconnect_restarts_advertising() {
        let mut harness = Harness::running(BleMode::Peripheral, FlowRole::Credential);
        harness.feed(&connection_complete(0x0040, 0x01));
        harness.feed(&disconnection_complete(0x0040));

        assert_eq!(harness.controller.connection_handle(), None);
        assert_eq!(harness.events.count(Event::Disconnected), 1);
        assert_eq!(harness.sent(), vec![hex!("0A2001 01").to_vec()]);
        assert!(harness.controller.pending().is_some());
    }

    #[test]
    fn test_central_disconnect_rescans() {
        let mut harness = Harness::running(BleMode::Central, FlowRole::Reader);
        let credential = advertising::advertising_data(&CREDENTIAL_SERVICE);
        harness.feed(&advertising_report(ADV_IND, PEER, &credential));
        harness.feed(&complete(Opcode::LE_SET_SCAN_ENABLE, 0x00, &[]));
        harness.feed(&connection_complete(0x0040, 0x00));
        harness.sent();

        harness.feed(&disconnection_complete(0x0040));
        assert_eq!(harness.sent(), vec![hex!("0C2002 01 00").to_vec()]);
        assert!(harness.controller.found_device().is_none());
        assert!(harness.controller.is_scanning());
    }

    #[test]
    fn test_acl_data() {
        let mut harness = Harness::running(BleMode::Peripheral, FlowRole::Credential);
        assert!(matches!(
            harness.controller.send_acl(0x02, &hex!("DEADBEEF")),
            Err(Error::NotConnected)
        ));

        harness.feed(&connection_complete(0x0040, 0x01));
        harness.feed(&hex!("02 4020 0400 DEADBEEF"));
        // Another connection's data is dropped
        harness.feed(&hex!("02 4120 0200 0102"));
        assert_eq!(
            *harness.link.acl.lock(),
            vec![(0x0040, 0x02, hex!("DEADBEEF").to_vec())]
        );

        harness.controller.send_acl(0x00, &hex!("0102")).unwrap();
        assert_eq!(
            harness.controller.transport().sent.last(),
            Some(&(PacketType::AclData, hex!("4000 0200 0102").to_vec()))
        );

        harness.feed(&hex!("04 13 05 01 4000 0100"));
        assert_eq!(*harness.link.completed.lock(), vec![(0x0040, 1)]);
    }

    #[test]
    fn test_queued_frames_are_fragmented() {
        let link = RecordingLink {
            reply: Some((0..70).collect()),
            ..Default::default()
        };
        let mut harness = Harness::with_link(
            BleMode::Peripheral,
            FlowRole::Credential,
            HciConfig::default(),
            link,
        );
        harness.bring_up(BD_ADDR);
        harness.feed(&connection_complete(0x0040, 0x01));
        harness.controller.transport_mut().sent.clear();

        harness.feed(&hex!("02 4020 0100 00"));
        let acl: Vec<_> = harness
            .controller
            .transport()
            .sent
            .iter()
            .filter(|(packet_type, _)| *packet_type == PacketType::AclData)
            .map(|(_, packet)| packet.clone())
            .collect();
        assert_eq!(acl.len(), 3);
        assert_eq!(&acl[0][..4], &hex!("4000 2000"));
        assert_eq!(&acl[1][..4], &hex!("4010 2000"));
        assert_eq!(&acl[2][..4], &hex!("4010 0600"));
        let payload: Vec<u8> = acl.iter().flat_map(|packet| packet[4..].to_vec()).collect();
        assert_eq!(payload, (0..70).collect::<Vec<u8>>());
    }

    #[test]
    fn test_stop() {
        let mut harness = Harness::running(BleMode::Peripheral, FlowRole::Credential);
        harness.feed(&connection_complete(0x0040, 0x01));
        harness.controller.stop();

        assert_eq!(
            harness.sent(),
            vec![hex!("060403 4000 13").to_vec(), hex!("0A2001 00").to_vec()]
        );
        assert!(harness.controller.pending().is_none());
        assert_eq!(harness.controller.connection_handle(), None);
        assert!(!harness.controller.is_advertising());
        assert_eq!(*harness.link.disconnected.lock(), vec![0x0040]);

        // Stopped controllers ignore input
        harness.controller.handle(Input::Init);
        harness.controller.handle(Input::Timer(Instant::now()));
        assert!(harness.sent().is_empty());
    }

    #[test]
    fn test_stop_clears_known_addresses() {
        let mut harness = Harness::running(BleMode::Central, FlowRole::ReaderScanner);
        let reader = advertising::advertising_data(&READER_SERVICE);
        harness.feed(&advertising_report(ADV_IND, PEER, &reader));
        assert_eq!(harness.controller.known_addresses().len(), 1);

        harness.controller.stop();
        assert_eq!(harness.sent(), vec![hex!("0C2002 00 00").to_vec()]);
        assert!(harness.controller.known_addresses().is_empty());
    }

    #[test]
    fn test_faults_are_not_fatal() {
        let mut harness = Harness::running(BleMode::Peripheral, FlowRole::Credential);
        harness.feed(&hex!("04 10 01 03"));
        harness.feed(&hex!("04 0F 04 01 01 0D20"));
        harness.feed(&hex!("04 0E"));
        harness.feed(&hex!("05 00"));
        harness.feed(&hex!("04 0E 04 01 0300 12"));
        assert!(harness.sent().is_empty());

        // Still follows connections afterwards
        harness.feed(&connection_complete(0x0040, 0x01));
        assert_eq!(harness.controller.connection_handle(), Some(0x0040));
    }

    #[test]
    fn test_transport_failure_keeps_retry_armed() {
        let mut harness = Harness::running(BleMode::Peripheral, FlowRole::Credential);
        harness.feed(&connection_complete(0x0040, 0x01));
        harness.controller.transport_mut().broken = true;
        harness.feed(&disconnection_complete(0x0040));
        assert!(harness.controller.pending().is_some());

        harness.controller.transport_mut().broken = false;
        let deadline = harness.controller.pending().expect("pending").deadline;
        harness.controller.handle(Input::Timer(deadline));
        assert_eq!(harness.sent(), vec![hex!("0A2001 01").to_vec()]);
    }

    #[test]
    fn test_not_started() {
        let mut controller =
            HciController::new(RecordingTransport::default(), HciConfig::default());
        controller.handle(Input::Init);
        assert!(controller.transport().sent.is_empty());
    }
}
