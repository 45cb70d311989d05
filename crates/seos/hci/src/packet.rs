//! HCI packet framing
//!
//! Inbound packets carry the H4 packet indicator in their first byte. Outbound
//! packets are handed to the transport without it, the indicator travels as
//! [`PacketType`] next to the bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::opcode::Opcode;
use crate::{Error, Result};

/// Bluetooth device address, little-endian as on the wire
pub type Address = [u8; 6];

/// H4 packet indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Host to controller command
    Command = 0x01,
    /// ACL data in either direction
    AclData = 0x02,
    /// Controller to host event
    Event = 0x04,
}

/// Event codes
pub mod event_code {
    /// Disconnection Complete
    pub const DISCONNECTION_COMPLETE: u8 = 0x05;
    /// Command Complete
    pub const COMMAND_COMPLETE: u8 = 0x0E;
    /// Command Status
    pub const COMMAND_STATUS: u8 = 0x0F;
    /// Hardware Error
    pub const HARDWARE_ERROR: u8 = 0x10;
    /// Number Of Completed Packets
    pub const NUMBER_OF_COMPLETED_PACKETS: u8 = 0x13;
    /// LE Meta event
    pub const LE_META: u8 = 0x3E;
}

/// LE Meta subevent codes
pub mod le_subevent {
    /// LE Connection Complete
    pub const CONNECTION_COMPLETE: u8 = 0x01;
    /// LE Advertising Report
    pub const ADVERTISING_REPORT: u8 = 0x02;
}

/// ACL packet boundary flags
pub mod boundary {
    /// First fragment of a frame, host to controller
    pub const FIRST_NON_FLUSHABLE: u8 = 0x00;
    /// Continuation fragment
    pub const CONTINUATION: u8 = 0x01;
    /// First fragment of a frame, controller to host
    pub const FIRST_FLUSHABLE: u8 = 0x02;
    /// Mask of the boundary bits within the flags nibble
    pub const MASK: u8 = 0x03;
}

/// Local role on a new connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// We initiated the connection
    Central,
    /// The peer connected to us
    Peripheral,
}

impl TryFrom<u8> for LinkRole {
    type Error = Error;

    fn try_from(role: u8) -> Result<Self> {
        match role {
            0x00 => Ok(Self::Central),
            0x01 => Ok(Self::Peripheral),
            _ => Err(Error::Malformed("unknown connection role")),
        }
    }
}

/// First report of an LE Advertising Report event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingReport<'a> {
    /// Number of reports in the event
    pub num_reports: u8,
    /// Advertising PDU type, `0` for connectable undirected advertising
    pub event_type: u8,
    /// Advertiser address type
    pub address_type: u8,
    /// Advertiser address
    pub address: Address,
    /// Advertising data
    pub data: &'a [u8],
}

/// Events the controller engine reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HciEvent<'a> {
    /// A command finished
    CommandComplete {
        /// Command that finished
        opcode: Opcode,
        /// Command status
        status: u8,
        /// Return parameters after the status
        parameters: &'a [u8],
    },
    /// A command was accepted or rejected
    CommandStatus {
        /// Command status
        status: u8,
        /// Command concerned
        opcode: Opcode,
    },
    /// A link was closed
    DisconnectionComplete {
        /// Status
        status: u8,
        /// Connection handle
        handle: u16,
        /// Disconnect reason
        reason: u8,
    },
    /// The controller hit a hardware error
    HardwareError {
        /// Vendor specific error code
        code: u8,
    },
    /// Per-handle counts of ACL packets the controller finished sending
    NumberOfCompletedPackets(Vec<(u16, u16)>),
    /// A link was established
    LeConnectionComplete {
        /// Status
        status: u8,
        /// Connection handle
        handle: u16,
        /// Local role
        role: LinkRole,
        /// Peer address type
        peer_address_type: u8,
        /// Peer address
        peer_address: Address,
    },
    /// A peer is advertising
    LeAdvertisingReport(AdvertisingReport<'a>),
    /// Anything else
    Unhandled {
        /// Event code
        code: u8,
        /// LE Meta subevent, when the event is one
        subevent: Option<u8>,
    },
}

/// Inbound ACL data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclPacket<'a> {
    /// Connection handle
    pub handle: u16,
    /// Packet boundary and broadcast flags
    pub flags: u8,
    /// Payload
    pub payload: &'a [u8],
}

/// Inbound HCI packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet<'a> {
    /// Controller event
    Event(HciEvent<'a>),
    /// ACL data
    Acl(AclPacket<'a>),
}

impl<'a> Packet<'a> {
    /// Parse an inbound packet, H4 indicator included
    pub fn parse(raw: &'a [u8]) -> Result<Self> {
        match raw.split_first() {
            Some((&indicator, rest)) if indicator == PacketType::Event as u8 => {
                parse_event(rest).map(Self::Event)
            }
            Some((&indicator, rest)) if indicator == PacketType::AclData as u8 => {
                parse_acl(rest).map(Self::Acl)
            }
            Some(_) => Err(Error::Malformed("unsupported packet indicator")),
            None => Err(Error::Malformed("empty packet")),
        }
    }
}

fn parse_event(raw: &[u8]) -> Result<HciEvent<'_>> {
    let [code, len, rest @ ..] = raw else {
        return Err(Error::Malformed("truncated event header"));
    };
    let params = rest
        .get(..usize::from(*len))
        .ok_or(Error::Malformed("event shorter than its length"))?;

    let event = match (*code, params) {
        (event_code::COMMAND_COMPLETE, [_ncmd, lo, hi, status, parameters @ ..]) => {
            HciEvent::CommandComplete {
                opcode: Opcode::from_u16(u16::from_le_bytes([*lo, *hi])),
                status: *status,
                parameters,
            }
        }
        (event_code::COMMAND_STATUS, [status, _ncmd, lo, hi, ..]) => HciEvent::CommandStatus {
            status: *status,
            opcode: Opcode::from_u16(u16::from_le_bytes([*lo, *hi])),
        },
        (event_code::DISCONNECTION_COMPLETE, [status, lo, hi, reason, ..]) => {
            HciEvent::DisconnectionComplete {
                status: *status,
                handle: handle(*lo, *hi),
                reason: *reason,
            }
        }
        (event_code::HARDWARE_ERROR, [code, ..]) => HciEvent::HardwareError { code: *code },
        (event_code::NUMBER_OF_COMPLETED_PACKETS, [count, entries @ ..]) => {
            let count = usize::from(*count);
            let entries = entries
                .get(..count * 4)
                .ok_or(Error::Malformed("truncated completed packets"))?;
            HciEvent::NumberOfCompletedPackets(
                entries
                    .chunks_exact(4)
                    .map(|entry| {
                        (
                            handle(entry[0], entry[1]),
                            u16::from_le_bytes([entry[2], entry[3]]),
                        )
                    })
                    .collect(),
            )
        }
        (event_code::LE_META, [subevent, rest @ ..]) => parse_le_meta(*subevent, rest)?,
        (
            event_code::COMMAND_COMPLETE
            | event_code::COMMAND_STATUS
            | event_code::DISCONNECTION_COMPLETE
            | event_code::HARDWARE_ERROR
            | event_code::NUMBER_OF_COMPLETED_PACKETS
            | event_code::LE_META,
            _,
        ) => return Err(Error::Malformed("truncated event parameters")),
        (code, _) => HciEvent::Unhandled {
            code,
            subevent: None,
        },
    };
    Ok(event)
}

fn parse_le_meta(subevent: u8, params: &[u8]) -> Result<HciEvent<'_>> {
    match (subevent, params) {
        (
            le_subevent::CONNECTION_COMPLETE,
            [status, lo, hi, role, peer_address_type, address @ ..],
        ) if address.len() >= 6 => Ok(HciEvent::LeConnectionComplete {
            status: *status,
            handle: handle(*lo, *hi),
            role: LinkRole::try_from(*role)?,
            peer_address_type: *peer_address_type,
            peer_address: address_from(address),
        }),
        (
            le_subevent::ADVERTISING_REPORT,
            [num_reports, event_type, address_type, rest @ ..],
        ) if rest.len() > 6 => {
            let (address, rest) = rest.split_at(6);
            let data_len = usize::from(rest[0]);
            let data = rest
                .get(1..1 + data_len)
                .ok_or(Error::Malformed("truncated advertising data"))?;
            Ok(HciEvent::LeAdvertisingReport(AdvertisingReport {
                num_reports: *num_reports,
                event_type: *event_type,
                address_type: *address_type,
                address: address_from(address),
                data,
            }))
        }
        (le_subevent::CONNECTION_COMPLETE | le_subevent::ADVERTISING_REPORT, _) => {
            Err(Error::Malformed("truncated LE meta event"))
        }
        (subevent, _) => Ok(HciEvent::Unhandled {
            code: event_code::LE_META,
            subevent: Some(subevent),
        }),
    }
}

fn parse_acl(raw: &[u8]) -> Result<AclPacket<'_>> {
    let [lo, hi, len_lo, len_hi, payload @ ..] = raw else {
        return Err(Error::Malformed("truncated ACL header"));
    };
    let len = usize::from(u16::from_le_bytes([*len_lo, *len_hi]));
    let payload = payload
        .get(..len)
        .ok_or(Error::Malformed("ACL payload shorter than its length"))?;
    Ok(AclPacket {
        handle: handle(*lo, *hi),
        flags: hi >> 4,
        payload,
    })
}

const fn handle(lo: u8, hi: u8) -> u16 {
    u16::from_le_bytes([lo, hi]) & 0x0FFF
}

fn address_from(bytes: &[u8]) -> Address {
    let mut address = Address::default();
    address.copy_from_slice(&bytes[..6]);
    address
}

/// Encode a command: opcode, parameter length and parameters
pub fn command(opcode: Opcode, parameters: &[u8]) -> Result<Bytes> {
    let len = u8::try_from(parameters.len())
        .map_err(|_| Error::Malformed("command parameters exceed 255 bytes"))?;
    let mut buf = BytesMut::with_capacity(3 + parameters.len());
    buf.put_slice(&opcode.to_le_bytes());
    buf.put_u8(len);
    buf.put_slice(parameters);
    Ok(buf.freeze())
}

/// Encode ACL data for a connection
pub fn acl(handle: u16, flags: u8, payload: &[u8]) -> Result<Bytes> {
    let len = u16::try_from(payload.len())
        .map_err(|_| Error::Malformed("ACL payload exceeds 65535 bytes"))?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u16_le((handle & 0x0FFF) | (u16::from(flags) << 12));
    buf.put_u16_le(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}
