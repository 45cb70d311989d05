//! APDU command definitions
//!
//! This module provides types for parsing APDU commands received by the card
//! and for building them on the reader side, according to ISO/IEC 7816-4.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Expected length type for APDU commands
pub type ExpectedLength = u8;

/// The four header bytes of a command: CLA, INS, P1 and P2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
}

impl Header {
    /// Create a header from its four bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self { cla, ins, p1, p2 }
    }

    /// Read the header from the first four bytes of an APDU
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        match data {
            [cla, ins, p1, p2, ..] => Ok(Self::new(*cla, *ins, *p1, *p2)),
            _ => Err(Error::InvalidCommandLength(data.len())),
        }
    }

    /// The header as it appears on the wire
    pub const fn to_bytes(self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }

    /// Check whether an APDU starts with this header
    pub fn matches(&self, apdu: &[u8]) -> bool {
        apdu.starts_with(&self.to_bytes())
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X} {:02X} {:02X} {:02X}",
            self.cla, self.ins, self.p1, self.p2
        )
    }
}

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional)
    pub le: Option<ExpectedLength>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Create a new command from a header and a data payload
    pub fn with_header<T: Into<Bytes>>(header: Header, data: T) -> Self {
        Self {
            cla: header.cla,
            ins: header.ins,
            p1: header.p1,
            p2: header.p2,
            data: Some(data.into()),
            le: None,
        }
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: ExpectedLength) -> Self {
        self.le = Some(le);
        self
    }

    /// The command header
    pub const fn header(&self) -> Header {
        Header::new(self.cla, self.ins, self.p1, self.p2)
    }

    /// Command payload data, empty when absent
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    /// Calculate length of serialized command
    pub fn command_length(&self) -> usize {
        4 + self.data.as_ref().map_or(0, |d| 1 + d.len()) + usize::from(self.le.is_some())
    }

    /// Convert to raw APDU bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.command_length());

        buffer.put_slice(&self.header().to_bytes());

        if let Some(data) = &self.data {
            buffer.put_u8(data.len() as u8);
            buffer.put_slice(data);
        }

        if let Some(le) = self.le {
            buffer.put_u8(le);
        }

        buffer.freeze()
    }

    /// Parse a command from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = Header::from_bytes(data)?;
        let mut command = Self::new(header.cla, header.ins, header.p1, header.p2);

        match data.len() {
            4 => {}
            5 => command.le = Some(data[4]),
            len => {
                let lc = data[4] as usize;
                if lc == 0 || len < 5 + lc || len > 5 + lc + 1 {
                    return Err(Error::InvalidCommandLength(len));
                }
                command.data = Some(Bytes::copy_from_slice(&data[5..5 + lc]));
                if len == 5 + lc + 1 {
                    command.le = Some(data[5 + lc]);
                }
            }
        }

        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.header(), hex::encode(self.data()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_command_serialization() {
        let cmd = Command::new(0x00, 0xA4, 0x04, 0x00)
            .with_data(Bytes::from_static(&hex!("A00000015100")))
            .with_le(0);
        let bytes = cmd.to_bytes();

        assert_eq!(bytes.as_ref(), hex!("00A4040006A0000001510000"));
        assert_eq!(cmd.command_length(), bytes.len());
    }

    #[test]
    fn test_command_from_bytes() {
        // Header only
        let cmd = Command::from_bytes(&hex!("00A40400")).unwrap();
        assert_eq!(cmd.header(), Header::new(0x00, 0xA4, 0x04, 0x00));
        assert!(cmd.data.is_none());
        assert!(cmd.le.is_none());

        // Data without Le
        let cmd = Command::from_bytes(&hex!("00A4040003010203")).unwrap();
        assert_eq!(cmd.data(), &[0x01, 0x02, 0x03]);
        assert!(cmd.le.is_none());

        // Data with Le
        let cmd = Command::from_bytes(&hex!("00A4040003010203FF")).unwrap();
        assert_eq!(cmd.data(), &[0x01, 0x02, 0x03]);
        assert_eq!(cmd.le, Some(0xFF));

        // Le only
        let cmd = Command::from_bytes(&hex!("00B0000000")).unwrap();
        assert!(cmd.data.is_none());
        assert_eq!(cmd.le, Some(0));
    }

    #[test]
    fn test_command_from_bytes_rejects_bad_lengths() {
        assert_eq!(
            Command::from_bytes(&hex!("00A404")),
            Err(Error::InvalidCommandLength(3))
        );
        // Lc claims more data than present
        assert!(Command::from_bytes(&hex!("00A404000501020304")).is_err());
        // Trailing bytes after Le
        assert!(Command::from_bytes(&hex!("00A40400010100FF")).is_err());
    }

    #[test]
    fn test_header_matches() {
        let header = Header::new(0x80, 0xA5, 0x04, 0x00);
        assert!(header.matches(&hex!("80A5040002AABB")));
        assert!(!header.matches(&hex!("00A5040002AABB")));
        assert!(!header.matches(&hex!("80A5")));
        assert_eq!(header.to_string(), "80 A5 04 00");
    }
}
