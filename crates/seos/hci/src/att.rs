//! Attribute protocol bearer for the SEOS characteristic
//!
//! As a peripheral the bearer serves a fixed attribute table. As a central it
//! discovers the SEOS characteristic of the peer and subscribes to it. Either
//! way the link carries SEOS messages as values of that one characteristic:
//! notifications from the peripheral, write commands from the central.
//!
//! | Handle   | Attribute                                            |
//! |----------|------------------------------------------------------|
//! | `0x0001` | GAP service `0x1800`                                 |
//! | `0x0002` | Device name declaration                              |
//! | `0x0003` | Device name                                          |
//! | `0x0006` | GATT service `0x1801`                                |
//! | `0x0007` | Service changed declaration, indicate                |
//! | `0x0008` | Service changed                                      |
//! | `0x0009` | Service changed client configuration                 |
//! | `0x000A` | SEOS service                                         |
//! | `0x000B` | SEOS characteristic declaration, notify and write    |
//! | `0x000C` | SEOS characteristic value                            |
//! | `0x000D` | SEOS characteristic client configuration             |

use tracing::{debug, info, trace, warn};

use crate::advertising::{CREDENTIAL_SERVICE, READER_SERVICE};
use crate::packet::LinkRole;

/// PDU opcodes
pub mod opcode {
    /// Error Response
    pub const ERROR_RSP: u8 = 0x01;
    /// Exchange MTU Request
    pub const EXCHANGE_MTU_REQ: u8 = 0x02;
    /// Exchange MTU Response
    pub const EXCHANGE_MTU_RSP: u8 = 0x03;
    /// Find Information Request
    pub const FIND_INFORMATION_REQ: u8 = 0x04;
    /// Find Information Response
    pub const FIND_INFORMATION_RSP: u8 = 0x05;
    /// Find By Type Value Request
    pub const FIND_BY_TYPE_VALUE_REQ: u8 = 0x06;
    /// Find By Type Value Response
    pub const FIND_BY_TYPE_VALUE_RSP: u8 = 0x07;
    /// Read By Type Request
    pub const READ_BY_TYPE_REQ: u8 = 0x08;
    /// Read By Type Response
    pub const READ_BY_TYPE_RSP: u8 = 0x09;
    /// Read Request
    pub const READ_REQ: u8 = 0x0A;
    /// Read Response
    pub const READ_RSP: u8 = 0x0B;
    /// Read By Group Type Request
    pub const READ_BY_GROUP_TYPE_REQ: u8 = 0x10;
    /// Read By Group Type Response
    pub const READ_BY_GROUP_TYPE_RSP: u8 = 0x11;
    /// Write Request
    pub const WRITE_REQ: u8 = 0x12;
    /// Write Response
    pub const WRITE_RSP: u8 = 0x13;
    /// Handle Value Notification
    pub const HANDLE_VALUE_NTF: u8 = 0x1B;
    /// Handle Value Indication
    pub const HANDLE_VALUE_IND: u8 = 0x1D;
    /// Handle Value Confirmation
    pub const HANDLE_VALUE_CFM: u8 = 0x1E;
    /// Write Command
    pub const WRITE_CMD: u8 = 0x52;
    /// Bit set in every command opcode
    pub const COMMAND_FLAG: u8 = 0x40;
}

/// Error Response codes
pub mod error_code {
    /// The handle does not exist
    pub const INVALID_HANDLE: u8 = 0x01;
    /// The attribute cannot be written
    pub const WRITE_NOT_PERMITTED: u8 = 0x03;
    /// The request was malformed
    pub const INVALID_PDU: u8 = 0x04;
    /// The request is not supported
    pub const REQUEST_NOT_SUPPORTED: u8 = 0x06;
    /// Nothing matched in the requested range
    pub const ATTRIBUTE_NOT_FOUND: u8 = 0x0A;
    /// The grouping type is not a service
    pub const UNSUPPORTED_GROUP_TYPE: u8 = 0x10;
}

/// 16-bit attribute types
pub mod uuid {
    /// Generic Access service
    pub const GAP_SERVICE: u16 = 0x1800;
    /// Generic Attribute service
    pub const GATT_SERVICE: u16 = 0x1801;
    /// Primary service declaration
    pub const PRIMARY_SERVICE: u16 = 0x2800;
    /// Characteristic declaration
    pub const CHARACTERISTIC: u16 = 0x2803;
    /// Client characteristic configuration
    pub const CCCD: u16 = 0x2902;
    /// Device name
    pub const DEVICE_NAME: u16 = 0x2A00;
    /// Service changed
    pub const SERVICE_CHANGED: u16 = 0x2A05;
}

/// Handles of the served attribute table
pub mod handle {
    /// Device name value
    pub const DEVICE_NAME: u16 = 0x0003;
    /// Service changed client configuration
    pub const SERVICE_CHANGED_CCCD: u16 = 0x0009;
    /// SEOS service declaration
    pub const SEOS_SERVICE: u16 = 0x000A;
    /// SEOS characteristic value
    pub const SEOS_VALUE: u16 = 0x000C;
    /// SEOS characteristic client configuration
    pub const SEOS_CCCD: u16 = 0x000D;
}

/// MTU in force until an exchange
pub const DEFAULT_MTU: u16 = 23;

/// MTU offered to the peer
pub const RX_MTU: u16 = 0x0200;

/// Client configuration bit enabling notifications
const ENABLE_NOTIFICATION: u16 = 0x0001;

/// Characteristic properties
const PROPERTY_READ: u8 = 0x02;
const PROPERTY_WRITE_WITHOUT_RESPONSE: u8 = 0x04;
const PROPERTY_NOTIFY: u8 = 0x10;
const PROPERTY_INDICATE: u8 = 0x20;

/// Which end of the SEOS exchange this device plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Sends the commands
    Reader,
    /// Answers them
    Credential,
}

impl Side {
    /// Service exposed in the attribute table
    pub const fn service(self) -> &'static [u8; 16] {
        match self {
            Self::Reader => &READER_SERVICE,
            Self::Credential => &CREDENTIAL_SERVICE,
        }
    }

    /// Service looked up on the peer
    pub const fn peer_service(self) -> &'static [u8; 16] {
        match self {
            Self::Reader => &CREDENTIAL_SERVICE,
            Self::Credential => &READER_SERVICE,
        }
    }
}

/// The SEOS characteristic of `service`, wire order
pub const fn characteristic_uuid(service: &[u8; 16]) -> [u8; 16] {
    let mut uuid = *service;
    uuid[13] = 0xAA;
    uuid
}

/// What a PDU meant for the layer above
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The peer subscribed or discovery finished, values can flow
    Ready,
    /// A value of the SEOS characteristic arrived
    Value(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttributeType {
    Short(u16),
    Long([u8; 16]),
}

impl AttributeType {
    fn to_bytes(self) -> Vec<u8> {
        match self {
            Self::Short(uuid) => uuid.to_le_bytes().to_vec(),
            Self::Long(uuid) => uuid.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
struct Attribute {
    handle: u16,
    kind: AttributeType,
    value: Vec<u8>,
}

impl Attribute {
    fn new(handle: u16, kind: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            handle,
            kind: AttributeType::Short(kind),
            value: value.into(),
        }
    }

    fn declaration(handle: u16, properties: u8, kind: AttributeType) -> Self {
        let mut value = vec![properties];
        value.extend_from_slice(&(handle + 1).to_le_bytes());
        value.extend(kind.to_bytes());
        Self::new(handle, uuid::CHARACTERISTIC, value)
    }

    fn is(&self, kind: u16) -> bool {
        self.kind == AttributeType::Short(kind)
    }
}

fn attribute_table(side: Side, device_name: &str) -> Vec<Attribute> {
    let characteristic = AttributeType::Long(characteristic_uuid(side.service()));
    vec![
        Attribute::new(0x0001, uuid::PRIMARY_SERVICE, uuid::GAP_SERVICE.to_le_bytes()),
        Attribute::declaration(0x0002, PROPERTY_READ, AttributeType::Short(uuid::DEVICE_NAME)),
        Attribute::new(handle::DEVICE_NAME, uuid::DEVICE_NAME, device_name.as_bytes()),
        Attribute::new(0x0006, uuid::PRIMARY_SERVICE, uuid::GATT_SERVICE.to_le_bytes()),
        Attribute::declaration(
            0x0007,
            PROPERTY_INDICATE,
            AttributeType::Short(uuid::SERVICE_CHANGED),
        ),
        Attribute::new(0x0008, uuid::SERVICE_CHANGED, Vec::new()),
        Attribute::new(handle::SERVICE_CHANGED_CCCD, uuid::CCCD, [0u8; 2]),
        Attribute::new(handle::SEOS_SERVICE, uuid::PRIMARY_SERVICE, *side.service()),
        Attribute::declaration(
            0x000B,
            PROPERTY_NOTIFY | PROPERTY_WRITE_WITHOUT_RESPONSE,
            characteristic,
        ),
        Attribute {
            handle: handle::SEOS_VALUE,
            kind: characteristic,
            value: Vec::new(),
        },
        Attribute::new(handle::SEOS_CCCD, uuid::CCCD, [0u8; 2]),
    ]
}

/// Error Response contents
#[derive(Debug, Clone, Copy)]
struct Refusal {
    handle: u16,
    code: u8,
}

impl Refusal {
    const fn new(handle: u16, code: u8) -> Self {
        Self { handle, code }
    }
}

fn u16_at(data: &[u8], at: usize) -> Option<u16> {
    match data.get(at..at + 2)? {
        [lo, hi] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

fn handle_range(params: &[u8]) -> Result<(u16, u16), Refusal> {
    let (Some(start), Some(end)) = (u16_at(params, 0), u16_at(params, 2)) else {
        return Err(Refusal::new(0, error_code::INVALID_PDU));
    };
    if start == 0 || start > end {
        return Err(Refusal::new(start, error_code::INVALID_HANDLE));
    }
    Ok((start, end))
}

fn error_response(request: u8, handle: u16, code: u8) -> Vec<u8> {
    let mut pdu = vec![opcode::ERROR_RSP, request];
    pdu.extend_from_slice(&handle.to_le_bytes());
    pdu.push(code);
    pdu
}

fn pdu(op: u8, fields: &[u16], tail: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 2 * fields.len() + tail.len());
    out.push(op);
    for field in fields {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out.extend_from_slice(tail);
    out
}

/// Requests expect a response, commands and responses do not
const fn is_request(op: u8) -> bool {
    op & opcode::COMMAND_FLAG == 0 && op % 2 == 0 && op != opcode::HANDLE_VALUE_CFM
}

/// One end of the attribute protocol channel
#[derive(Debug)]
pub struct AttBearer {
    side: Side,
    table: Vec<Attribute>,
    role: Option<LinkRole>,
    tx_mtu: u16,
    service_end: u16,
    value_handle: u16,
    cccd_handle: u16,
    ready: bool,
}

impl AttBearer {
    /// Bearer for `side`, serving `device_name` as the GAP device name
    pub fn new(side: Side, device_name: &str) -> Self {
        Self {
            side,
            table: attribute_table(side, device_name),
            role: None,
            tx_mtu: DEFAULT_MTU,
            service_end: 0,
            value_handle: 0,
            cccd_handle: 0,
            ready: false,
        }
    }

    /// Side of the exchange
    pub const fn side(&self) -> Side {
        self.side
    }

    /// Whether values can flow
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// MTU the peer accepts
    pub const fn tx_mtu(&self) -> u16 {
        self.tx_mtu
    }

    /// Handle the SEOS value is exchanged on, once known
    pub const fn value_handle(&self) -> Option<u16> {
        match self.value_handle {
            0 => None,
            handle => Some(handle),
        }
    }

    /// A link came up. A central starts discovery into `out`.
    pub fn connected(&mut self, role: LinkRole, out: &mut Vec<Vec<u8>>) {
        self.disconnected();
        self.role = Some(role);
        match role {
            LinkRole::Peripheral => self.value_handle = handle::SEOS_VALUE,
            LinkRole::Central => match self.side {
                // A credential asks for a larger MTU before anything else
                Side::Credential => out.push(pdu(opcode::EXCHANGE_MTU_REQ, &[RX_MTU], &[])),
                Side::Reader => out.push(self.find_peer_service()),
            },
        }
    }

    /// The link went away
    pub fn disconnected(&mut self) {
        self.role = None;
        self.tx_mtu = DEFAULT_MTU;
        self.service_end = 0;
        self.value_handle = 0;
        self.cccd_handle = 0;
        self.ready = false;
        for attribute in self.table.iter_mut().filter(|a| a.is(uuid::CCCD)) {
            attribute.value = vec![0x00, 0x00];
        }
    }

    /// PDU carrying `value` to the peer, if the link is ready for it
    pub fn value_pdu(&self, value: &[u8]) -> Option<Vec<u8>> {
        let op = match self.role {
            Some(LinkRole::Peripheral) if self.ready => opcode::HANDLE_VALUE_NTF,
            Some(LinkRole::Central) if self.value_handle != 0 => opcode::WRITE_CMD,
            _ => {
                warn!(len = value.len(), "Characteristic not ready, dropping value");
                return None;
            }
        };
        if value.len() + 3 > usize::from(self.tx_mtu) {
            debug!(len = value.len(), mtu = self.tx_mtu, "Value longer than the ATT MTU");
        }
        Some(pdu(op, &[self.value_handle], value))
    }

    /// Process one inbound PDU, pushing any answer into `out`
    pub fn process(&mut self, pdu: &[u8], out: &mut Vec<Vec<u8>>) -> Option<Delivery> {
        let Some((&op, params)) = pdu.split_first() else {
            debug!("Empty ATT PDU");
            return None;
        };
        trace!(opcode = op, params = %hex::encode(params), "ATT received");
        match op {
            opcode::EXCHANGE_MTU_REQ => {
                match u16_at(params, 0) {
                    Some(mtu) => {
                        self.tx_mtu = mtu.max(DEFAULT_MTU);
                        debug!(mtu, "Peer MTU");
                        out.push(self::pdu(opcode::EXCHANGE_MTU_RSP, &[RX_MTU], &[]));
                    }
                    None => out.push(error_response(op, 0, error_code::INVALID_PDU)),
                }
                None
            }
            opcode::ERROR_RSP => {
                warn!(params = %hex::encode(params), "Peer refused a request");
                None
            }
            opcode::HANDLE_VALUE_CFM => {
                debug!("Indication confirmed");
                None
            }
            _ if self.role == Some(LinkRole::Central) => self.client(op, params, out),
            _ => self.server(op, params, out),
        }
    }

    fn server(&mut self, op: u8, params: &[u8], out: &mut Vec<Vec<u8>>) -> Option<Delivery> {
        let reply = match op {
            opcode::READ_BY_TYPE_REQ => self.read_by_type(params),
            opcode::READ_BY_GROUP_TYPE_REQ => self.read_by_group_type(params),
            opcode::FIND_INFORMATION_REQ => self.find_information(params),
            opcode::FIND_BY_TYPE_VALUE_REQ => self.find_by_type_value(params),
            opcode::READ_REQ => self.read(params),
            opcode::WRITE_REQ | opcode::WRITE_CMD => {
                return match self.write(op, params, out) {
                    Ok(delivery) => delivery,
                    // Commands are never answered
                    Err(refusal) if op == opcode::WRITE_REQ => {
                        out.push(error_response(op, refusal.handle, refusal.code));
                        None
                    }
                    Err(_) => None,
                };
            }
            _ if is_request(op) => Err(Refusal::new(0, error_code::REQUEST_NOT_SUPPORTED)),
            _ => {
                debug!(opcode = op, "Ignoring ATT PDU");
                return None;
            }
        };
        out.push(reply.unwrap_or_else(|refusal| {
            debug!(opcode = op, code = refusal.code, "Refusing request");
            error_response(op, refusal.handle, refusal.code)
        }));
        None
    }

    fn in_range(&self, start: u16, end: u16) -> impl Iterator<Item = &Attribute> {
        self.table
            .iter()
            .filter(move |a| (start..=end).contains(&a.handle))
    }

    /// Last handle of the service starting at `start`
    fn group_end(&self, start: u16) -> u16 {
        self.table
            .iter()
            .find(|a| a.handle > start && a.is(uuid::PRIMARY_SERVICE))
            .map_or_else(
                || self.table.last().map_or(start, |a| a.handle),
                |next| next.handle - 1,
            )
    }

    /// Build a list response of equally sized entries that fit the MTU
    fn list_response(&self, op: u8, entries: impl IntoIterator<Item = Vec<u8>>) -> Option<Vec<u8>> {
        let limit = usize::from(self.tx_mtu);
        let mut out = vec![op, 0];
        let mut len = None;
        for entry in entries {
            if *len.get_or_insert(entry.len()) != entry.len() || out.len() + entry.len() > limit {
                break;
            }
            out.extend_from_slice(&entry);
        }
        if out.len() == 2 {
            return None;
        }
        out[1] = u8::try_from(len?).ok()?;
        Some(out)
    }

    fn read_by_type(&self, params: &[u8]) -> Result<Vec<u8>, Refusal> {
        let (start, end) = handle_range(params)?;
        let not_found = Refusal::new(start, error_code::ATTRIBUTE_NOT_FOUND);
        // Only 16-bit types are ever looked up this way
        let kind = match params.len() {
            6 => u16_at(params, 4).ok_or(not_found)?,
            _ => return Err(not_found),
        };
        let entries = self.in_range(start, end).filter(|a| a.is(kind)).map(|a| {
            let mut entry = a.handle.to_le_bytes().to_vec();
            entry.extend_from_slice(&a.value);
            entry
        });
        self.list_response(opcode::READ_BY_TYPE_RSP, entries)
            .ok_or(not_found)
    }

    fn read_by_group_type(&self, params: &[u8]) -> Result<Vec<u8>, Refusal> {
        let (start, end) = handle_range(params)?;
        if params.len() != 6 || u16_at(params, 4) != Some(uuid::PRIMARY_SERVICE) {
            return Err(Refusal::new(start, error_code::UNSUPPORTED_GROUP_TYPE));
        }
        let entries = self
            .in_range(start, end)
            .filter(|a| a.is(uuid::PRIMARY_SERVICE))
            .map(|a| {
                let mut entry = a.handle.to_le_bytes().to_vec();
                entry.extend_from_slice(&self.group_end(a.handle).to_le_bytes());
                entry.extend_from_slice(&a.value);
                entry
            });
        self.list_response(opcode::READ_BY_GROUP_TYPE_RSP, entries)
            .ok_or(Refusal::new(start, error_code::ATTRIBUTE_NOT_FOUND))
    }

    fn find_information(&self, params: &[u8]) -> Result<Vec<u8>, Refusal> {
        let (start, end) = handle_range(params)?;
        let entries = self.in_range(start, end).map(|a| {
            let mut entry = a.handle.to_le_bytes().to_vec();
            entry.extend(a.kind.to_bytes());
            entry
        });
        let mut response = self
            .list_response(opcode::FIND_INFORMATION_RSP, entries)
            .ok_or(Refusal::new(start, error_code::ATTRIBUTE_NOT_FOUND))?;
        // Format: 1 for 16-bit types, 2 for 128-bit types
        response[1] = if response[1] == 4 { 0x01 } else { 0x02 };
        Ok(response)
    }

    fn find_by_type_value(&self, params: &[u8]) -> Result<Vec<u8>, Refusal> {
        let (start, end) = handle_range(params)?;
        let kind = u16_at(params, 4).ok_or(Refusal::new(start, error_code::INVALID_PDU))?;
        let value = &params[6..];
        let entries: Vec<u8> = self
            .in_range(start, end)
            .filter(|a| a.is(kind) && a.value == value)
            .flat_map(|a| {
                let end = if kind == uuid::PRIMARY_SERVICE {
                    self.group_end(a.handle)
                } else {
                    a.handle
                };
                [a.handle.to_le_bytes(), end.to_le_bytes()].concat()
            })
            .take(usize::from(self.tx_mtu) - 1)
            .collect();
        if entries.is_empty() {
            return Err(Refusal::new(start, error_code::ATTRIBUTE_NOT_FOUND));
        }
        Ok(pdu(opcode::FIND_BY_TYPE_VALUE_RSP, &[], &entries))
    }

    fn read(&self, params: &[u8]) -> Result<Vec<u8>, Refusal> {
        let handle = u16_at(params, 0).ok_or(Refusal::new(0, error_code::INVALID_PDU))?;
        let attribute = self
            .table
            .iter()
            .find(|a| a.handle == handle)
            .ok_or(Refusal::new(handle, error_code::INVALID_HANDLE))?;
        let len = attribute.value.len().min(usize::from(self.tx_mtu) - 1);
        Ok(pdu(opcode::READ_RSP, &[], &attribute.value[..len]))
    }

    fn write(
        &mut self,
        op: u8,
        params: &[u8],
        out: &mut Vec<Vec<u8>>,
    ) -> Result<Option<Delivery>, Refusal> {
        let respond = op == opcode::WRITE_REQ;
        let target = u16_at(params, 0).ok_or(Refusal::new(0, error_code::INVALID_PDU))?;
        let value = &params[2..];
        debug!(handle = target, len = value.len(), request = respond, "ATT write");

        match target {
            handle::SEOS_VALUE => {
                if respond {
                    out.push(vec![opcode::WRITE_RSP]);
                }
                Ok(Some(Delivery::Value(value.to_vec())))
            }
            handle::SERVICE_CHANGED_CCCD | handle::SEOS_CCCD => {
                let config =
                    u16_at(value, 0).ok_or(Refusal::new(target, error_code::INVALID_PDU))?;
                if let Some(attribute) = self.table.iter_mut().find(|a| a.handle == target) {
                    attribute.value = config.to_le_bytes().to_vec();
                }
                if respond {
                    out.push(vec![opcode::WRITE_RSP]);
                }
                if target != handle::SEOS_CCCD {
                    return Ok(None);
                }
                let enabled = config & ENABLE_NOTIFICATION != 0;
                let was_ready = std::mem::replace(&mut self.ready, enabled);
                Ok(match (was_ready, enabled) {
                    (false, true) => {
                        info!("Peer subscribed");
                        Some(Delivery::Ready)
                    }
                    (true, false) => {
                        info!("Peer unsubscribed");
                        None
                    }
                    _ => None,
                })
            }
            _ if self.table.iter().any(|a| a.handle == target) => {
                Err(Refusal::new(target, error_code::WRITE_NOT_PERMITTED))
            }
            _ => Err(Refusal::new(target, error_code::INVALID_HANDLE)),
        }
    }

    fn find_peer_service(&self) -> Vec<u8> {
        pdu(
            opcode::FIND_BY_TYPE_VALUE_REQ,
            &[0x0001, 0xFFFF, uuid::PRIMARY_SERVICE],
            self.side.peer_service(),
        )
    }

    fn client(&mut self, op: u8, params: &[u8], out: &mut Vec<Vec<u8>>) -> Option<Delivery> {
        match op {
            opcode::EXCHANGE_MTU_RSP => {
                let Some(mtu) = u16_at(params, 0) else {
                    return malformed(op);
                };
                self.tx_mtu = mtu.max(DEFAULT_MTU);
                debug!(mtu, "Peer MTU");
                out.push(self.find_peer_service());
                None
            }
            opcode::FIND_BY_TYPE_VALUE_RSP => {
                let (Some(start), Some(end)) = (u16_at(params, 0), u16_at(params, 2)) else {
                    return malformed(op);
                };
                debug!(start, end, "Found SEOS service");
                self.service_end = end;
                out.push(pdu(
                    opcode::READ_BY_TYPE_REQ,
                    &[start, end, uuid::CHARACTERISTIC],
                    &[],
                ));
                None
            }
            opcode::READ_BY_TYPE_RSP => {
                let wanted = characteristic_uuid(self.side.peer_service());
                let Some((&len, entries)) = params.split_first() else {
                    return malformed(op);
                };
                if len < 5 {
                    return malformed(op);
                }
                let entries: Vec<&[u8]> = entries.chunks_exact(usize::from(len)).collect();
                // Prefer the SEOS characteristic, fall back to the first declared
                let Some(declaration) = entries
                    .iter()
                    .find(|entry| entry[5..] == wanted)
                    .or(entries.first())
                else {
                    return malformed(op);
                };
                let Some(value_handle) = u16_at(declaration, 3) else {
                    return malformed(op);
                };
                debug!(value_handle, "Found SEOS characteristic");
                self.value_handle = value_handle;
                out.push(pdu(
                    opcode::FIND_INFORMATION_REQ,
                    &[value_handle + 1, self.service_end.max(value_handle + 1)],
                    &[],
                ));
                None
            }
            opcode::FIND_INFORMATION_RSP => {
                let Some((&format, entries)) = params.split_first() else {
                    return malformed(op);
                };
                if format != 0x01 {
                    return malformed(op);
                }
                let cccd = entries
                    .chunks_exact(4)
                    .find(|entry| u16_at(entry, 2) == Some(uuid::CCCD))
                    .and_then(|entry| u16_at(entry, 0));
                let Some(cccd) = cccd else {
                    warn!("SEOS characteristic has no client configuration");
                    return None;
                };
                info!(cccd, "Subscribing to the peer");
                self.cccd_handle = cccd;
                out.push(pdu(opcode::WRITE_REQ, &[cccd, ENABLE_NOTIFICATION], &[]));
                None
            }
            opcode::WRITE_RSP if self.cccd_handle != 0 && !self.ready => {
                info!("Subscribed to the peer");
                self.ready = true;
                Some(Delivery::Ready)
            }
            opcode::HANDLE_VALUE_NTF | opcode::HANDLE_VALUE_IND => {
                let Some(target) = u16_at(params, 0) else {
                    return malformed(op);
                };
                if op == opcode::HANDLE_VALUE_IND {
                    out.push(vec![opcode::HANDLE_VALUE_CFM]);
                }
                if target != self.value_handle {
                    warn!(handle = target, "Value for an unknown handle");
                    return None;
                }
                Some(Delivery::Value(params[2..].to_vec()))
            }
            _ if is_request(op) => {
                info!(opcode = op, "Rejecting request while central");
                let target = u16_at(params, 0).unwrap_or_default();
                out.push(error_response(op, target, error_code::REQUEST_NOT_SUPPORTED));
                None
            }
            _ => {
                debug!(opcode = op, "Ignoring ATT PDU");
                None
            }
        }
    }
}

fn malformed(op: u8) -> Option<Delivery> {
    warn!(opcode = op, "Malformed ATT response");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn server(side: Side) -> AttBearer {
        let mut bearer = AttBearer::new(side, "Flipper");
        bearer.connected(LinkRole::Peripheral, &mut Vec::new());
        bearer
    }

    fn exchange(bearer: &mut AttBearer, request: &[u8]) -> (Vec<Vec<u8>>, Option<Delivery>) {
        let mut out = Vec::new();
        let delivery = bearer.process(request, &mut out);
        (out, delivery)
    }

    #[test]
    fn test_mtu_exchange() {
        let mut bearer = server(Side::Credential);
        let (out, _) = exchange(&mut bearer, &hex!("02 F700"));
        assert_eq!(out, vec![hex!("03 0002").to_vec()]);
        assert_eq!(bearer.tx_mtu(), 0x00F7);
    }

    #[test]
    fn test_primary_services() {
        let mut bearer = server(Side::Credential);
        let (out, _) = exchange(&mut bearer, &hex!("10 0100 FFFF 0028"));
        assert_eq!(out, vec![hex!("11 06 0100 0500 0018 0600 0900 0118").to_vec()]);

        let (out, _) = exchange(&mut bearer, &hex!("10 0A00 FFFF 0028"));
        assert_eq!(
            out,
            vec![hex!("11 14 0A00 0D00 0200007A170000800010000001980000").to_vec()]
        );

        let (out, _) = exchange(&mut bearer, &hex!("10 0E00 FFFF 0028"));
        assert_eq!(out, vec![hex!("01 10 0E00 0A").to_vec()]);
    }

    #[test]
    fn test_characteristic_declarations() {
        let mut bearer = server(Side::Reader);
        let (out, _) = exchange(&mut bearer, &hex!("08 0600 0900 0328"));
        assert_eq!(out, vec![hex!("09 07 0700 20 0800 052A").to_vec()]);

        let (out, _) = exchange(&mut bearer, &hex!("08 0A00 0D00 0328"));
        assert_eq!(
            out,
            vec![hex!("09 15 0B00 14 0C00 0200007A1700008000100000 00AA0000").to_vec()]
        );
    }

    #[test]
    fn test_device_name() {
        let mut bearer = server(Side::Credential);
        let (out, _) = exchange(&mut bearer, &hex!("08 0100 0500 002A"));
        assert_eq!(out, vec![hex!("09 09 0300 466C6970706572").to_vec()]);

        let (out, _) = exchange(&mut bearer, &hex!("0A 0300"));
        assert_eq!(out, vec![hex!("0B 466C6970706572").to_vec()]);
    }

    #[test]
    fn test_find_information() {
        let mut bearer = server(Side::Credential);
        let (out, _) = exchange(&mut bearer, &hex!("04 0D00 0D00"));
        assert_eq!(out, vec![hex!("05 01 0D00 0229").to_vec()]);

        let (out, _) = exchange(&mut bearer, &hex!("04 0C00 0C00"));
        assert_eq!(
            out,
            vec![hex!("05 02 0C00 0200007A170000800010000001AA0000").to_vec()]
        );
    }

    #[test]
    fn test_find_service_by_uuid() {
        let mut bearer = server(Side::Credential);
        let mut request = hex!("06 0100 FFFF 0028").to_vec();
        request.extend_from_slice(&CREDENTIAL_SERVICE);
        let (out, _) = exchange(&mut bearer, &request);
        assert_eq!(out, vec![hex!("07 0A00 0D00").to_vec()]);

        let mut request = hex!("06 0100 FFFF 0028").to_vec();
        request.extend_from_slice(&READER_SERVICE);
        let (out, _) = exchange(&mut bearer, &request);
        assert_eq!(out, vec![hex!("01 06 0100 0A").to_vec()]);
    }

    #[test]
    fn test_subscription_and_values() {
        let mut bearer = server(Side::Credential);
        assert_eq!(bearer.value_pdu(&hex!("C09000")), None);

        let (out, delivery) = exchange(&mut bearer, &hex!("12 0D00 0100"));
        assert_eq!(out, vec![hex!("13").to_vec()]);
        assert_eq!(delivery, Some(Delivery::Ready));

        // Subscribing again is not a new start
        let (_, delivery) = exchange(&mut bearer, &hex!("12 0D00 0100"));
        assert_eq!(delivery, None);

        let (out, delivery) = exchange(&mut bearer, &hex!("52 0C00 C000A4"));
        assert!(out.is_empty());
        assert_eq!(delivery, Some(Delivery::Value(hex!("C000A4").to_vec())));
        assert_eq!(
            bearer.value_pdu(&hex!("C09000")),
            Some(hex!("1B 0C00 C09000").to_vec())
        );

        let (_, delivery) = exchange(&mut bearer, &hex!("12 0D00 0000"));
        assert_eq!(delivery, None);
        assert!(!bearer.is_ready());
    }

    #[test]
    fn test_refused_writes_and_requests() {
        let mut bearer = server(Side::Credential);
        let (out, _) = exchange(&mut bearer, &hex!("12 0300 41"));
        assert_eq!(out, vec![hex!("01 12 0300 03").to_vec()]);
        let (out, _) = exchange(&mut bearer, &hex!("12 2000 41"));
        assert_eq!(out, vec![hex!("01 12 2000 01").to_vec()]);
        // Commands are never answered
        let (out, _) = exchange(&mut bearer, &hex!("52 2000 41"));
        assert!(out.is_empty());
        let (out, _) = exchange(&mut bearer, &hex!("18 0000"));
        assert_eq!(out, vec![hex!("01 18 0000 06").to_vec()]);
    }

    #[test]
    fn test_credential_central_discovery() {
        let mut bearer = AttBearer::new(Side::Credential, "Flipper");
        let mut out = Vec::new();
        bearer.connected(LinkRole::Central, &mut out);
        assert_eq!(out, vec![hex!("02 0002").to_vec()]);

        let (out, _) = exchange(&mut bearer, &hex!("03 4000"));
        let mut find = hex!("06 0100 FFFF 0028").to_vec();
        find.extend_from_slice(&READER_SERVICE);
        assert_eq!(out, vec![find]);

        let (out, _) = exchange(&mut bearer, &hex!("07 2800 2F00"));
        assert_eq!(out, vec![hex!("08 2800 2F00 0328").to_vec()]);

        let (out, _) = exchange(
            &mut bearer,
            &hex!("09 15 2900 14 2A00 0200007A170000800010000000AA0000"),
        );
        assert_eq!(out, vec![hex!("04 2B00 2F00").to_vec()]);
        assert_eq!(bearer.value_handle(), Some(0x002A));

        let (out, _) = exchange(&mut bearer, &hex!("05 01 2B00 0229"));
        assert_eq!(out, vec![hex!("12 2B00 0100").to_vec()]);
        assert!(!bearer.is_ready());

        let (out, delivery) = exchange(&mut bearer, &hex!("13"));
        assert!(out.is_empty());
        assert_eq!(delivery, Some(Delivery::Ready));

        let (_, delivery) = exchange(&mut bearer, &hex!("1B 2A00 C000A4"));
        assert_eq!(delivery, Some(Delivery::Value(hex!("C000A4").to_vec())));
        assert_eq!(
            bearer.value_pdu(&hex!("C09000")),
            Some(hex!("52 2A00 C09000").to_vec())
        );
    }

    #[test]
    fn test_central_rejects_requests() {
        let mut bearer = AttBearer::new(Side::Reader, "Flipper");
        let mut out = Vec::new();
        bearer.connected(LinkRole::Central, &mut out);
        let mut find = hex!("06 0100 FFFF 0028").to_vec();
        find.extend_from_slice(&CREDENTIAL_SERVICE);
        assert_eq!(out, vec![find]);

        let (out, _) = exchange(&mut bearer, &hex!("10 0100 FFFF 0028"));
        assert_eq!(out, vec![hex!("01 10 0100 06").to_vec()]);
        // The MTU exchange is answered in either role
        let (out, _) = exchange(&mut bearer, &hex!("02 1700"));
        assert_eq!(out, vec![hex!("03 0002").to_vec()]);
    }

    #[test]
    fn test_disconnect_clears_subscription() {
        let mut bearer = server(Side::Credential);
        exchange(&mut bearer, &hex!("12 0D00 0100"));
        bearer.disconnected();
        assert!(!bearer.is_ready());
        let (out, _) = exchange(&mut bearer, &hex!("0A 0D00"));
        assert_eq!(out, vec![hex!("0B 0000").to_vec()]);
    }
}
