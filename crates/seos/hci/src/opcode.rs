//! HCI command opcodes
//!
//! An opcode packs a 6-bit opcode group (OGF) and a 10-bit command field
//! (OCF): `opcode = OCF | OGF << 10`. It travels little-endian.

use std::fmt;

/// Opcode groups
pub mod ogf {
    /// Link control commands
    pub const LINK_CONTROL: u8 = 0x01;
    /// Controller and baseband commands
    pub const HOST_CONTROL: u8 = 0x03;
    /// Informational parameters
    pub const INFORMATIONAL: u8 = 0x04;
    /// LE controller commands
    pub const LE_CONTROL: u8 = 0x08;
    /// Vendor specific commands
    pub const VENDOR: u8 = 0x3F;
}

/// A 16-bit HCI command opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode(u16);

impl Opcode {
    /// Disconnect
    pub const DISCONNECT: Self = Self::new(ogf::LINK_CONTROL, 0x0006);
    /// Set Event Mask
    pub const SET_EVENT_MASK: Self = Self::new(ogf::HOST_CONTROL, 0x0001);
    /// Reset
    pub const RESET: Self = Self::new(ogf::HOST_CONTROL, 0x0003);
    /// Write LE Host Support
    pub const WRITE_LE_HOST_SUPPORT: Self = Self::new(ogf::HOST_CONTROL, 0x006D);
    /// Read BD_ADDR
    pub const READ_BD_ADDR: Self = Self::new(ogf::INFORMATIONAL, 0x0009);
    /// LE Set Event Mask
    pub const LE_SET_EVENT_MASK: Self = Self::new(ogf::LE_CONTROL, 0x0001);
    /// LE Read Buffer Size
    pub const LE_READ_BUFFER_SIZE: Self = Self::new(ogf::LE_CONTROL, 0x0002);
    /// LE Read Local Supported Features
    pub const LE_READ_LOCAL_FEATURES: Self = Self::new(ogf::LE_CONTROL, 0x0003);
    /// LE Set Random Address
    pub const LE_SET_RANDOM_ADDRESS: Self = Self::new(ogf::LE_CONTROL, 0x0005);
    /// LE Set Advertising Parameters
    pub const LE_SET_ADVERTISING_PARAMETERS: Self = Self::new(ogf::LE_CONTROL, 0x0006);
    /// LE Set Advertising Data
    pub const LE_SET_ADVERTISING_DATA: Self = Self::new(ogf::LE_CONTROL, 0x0008);
    /// LE Set Scan Response Data
    pub const LE_SET_SCAN_RESPONSE_DATA: Self = Self::new(ogf::LE_CONTROL, 0x0009);
    /// LE Set Advertise Enable
    pub const LE_SET_ADVERTISE_ENABLE: Self = Self::new(ogf::LE_CONTROL, 0x000A);
    /// LE Set Scan Parameters
    pub const LE_SET_SCAN_PARAMETERS: Self = Self::new(ogf::LE_CONTROL, 0x000B);
    /// LE Set Scan Enable
    pub const LE_SET_SCAN_ENABLE: Self = Self::new(ogf::LE_CONTROL, 0x000C);
    /// LE Create Connection
    pub const LE_CREATE_CONNECTION: Self = Self::new(ogf::LE_CONTROL, 0x000D);
    /// Vendor command writing the public device address
    pub const VENDOR_SET_PUBLIC_ADDRESS: Self = Self::new(ogf::VENDOR, 0x0006);

    /// Compose an opcode from its group and command field
    pub const fn new(ogf: u8, ocf: u16) -> Self {
        Self((ocf & 0x03FF) | ((ogf as u16 & 0x3F) << 10))
    }

    /// Wrap a raw opcode
    pub const fn from_u16(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw opcode
    pub const fn to_u16(self) -> u16 {
        self.0
    }

    /// Opcode group
    pub const fn ogf(self) -> u8 {
        (self.0 >> 10) as u8
    }

    /// Command field
    pub const fn ocf(self) -> u16 {
        self.0 & 0x03FF
    }

    /// Wire encoding
    pub const fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    /// Name of the commands this engine issues
    pub const fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::DISCONNECT => "Disconnect",
            Self::SET_EVENT_MASK => "Set Event Mask",
            Self::RESET => "Reset",
            Self::WRITE_LE_HOST_SUPPORT => "Write LE Host Support",
            Self::READ_BD_ADDR => "Read BD_ADDR",
            Self::LE_SET_EVENT_MASK => "LE Set Event Mask",
            Self::LE_READ_BUFFER_SIZE => "LE Read Buffer Size",
            Self::LE_READ_LOCAL_FEATURES => "LE Read Local Supported Features",
            Self::LE_SET_RANDOM_ADDRESS => "LE Set Random Address",
            Self::LE_SET_ADVERTISING_PARAMETERS => "LE Set Advertising Parameters",
            Self::LE_SET_ADVERTISING_DATA => "LE Set Advertising Data",
            Self::LE_SET_SCAN_RESPONSE_DATA => "LE Set Scan Response Data",
            Self::LE_SET_ADVERTISE_ENABLE => "LE Set Advertise Enable",
            Self::LE_SET_SCAN_PARAMETERS => "LE Set Scan Parameters",
            Self::LE_SET_SCAN_ENABLE => "LE Set Scan Enable",
            Self::LE_CREATE_CONNECTION => "LE Create Connection",
            Self::VENDOR_SET_PUBLIC_ADDRESS => "Vendor Set Public Address",
            _ => return None,
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({:#06x})", self.0),
            None => write!(f, "OGF {:#04x} OCF {:#06x}", self.ogf(), self.ocf()),
        }
    }
}
