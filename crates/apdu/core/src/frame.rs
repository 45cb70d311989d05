//! ISO/IEC 14443-4 block framing
//!
//! Every block exchanged on the contactless link starts with a protocol control
//! byte (PCB), optionally followed by a card identifier (CID). The card answers
//! with the same prologue in front of its response. CRC is handled by the
//! transport and never appears here.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// PCB bit signalling that a CID byte follows
pub const CID_FOLLOWING: u8 = 0x08;

/// Block prologue: the PCB and the optional CID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prologue {
    /// Protocol control byte
    pub pcb: u8,
    /// Card identifier, present when the PCB says so
    pub cid: Option<u8>,
}

impl Prologue {
    /// Read the prologue from the start of a frame
    pub fn from_bytes(frame: &[u8]) -> Result<Self> {
        let (&pcb, rest) = frame.split_first().ok_or(Error::FrameTooShort(0))?;
        let cid = if pcb & CID_FOLLOWING != 0 {
            Some(*rest.first().ok_or(Error::FrameTooShort(frame.len()))?)
        } else {
            None
        };
        Ok(Self { pcb, cid })
    }

    /// Number of bytes the prologue occupies
    pub const fn len(&self) -> usize {
        if self.cid.is_some() { 2 } else { 1 }
    }

    /// A prologue is never empty
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Append the prologue bytes to a buffer
    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_u8(self.pcb);
        if let Some(cid) = self.cid {
            buf.put_u8(cid);
        }
    }

    /// Build an outbound block: this prologue followed by `body`
    pub fn wrap(&self, body: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len() + body.len());
        self.put(&mut buf);
        buf.put_slice(body);
        buf.freeze()
    }
}

/// An inbound block split into its prologue and its information field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Block prologue
    pub prologue: Prologue,
    /// Information field, usually an APDU
    pub inf: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Split a raw frame
    pub fn parse(frame: &'a [u8]) -> Result<Self> {
        let prologue = Prologue::from_bytes(frame)?;
        Ok(Self {
            prologue,
            inf: &frame[prologue.len()..],
        })
    }

    /// Whether the block carries nothing beyond its prologue
    pub const fn is_empty(&self) -> bool {
        self.inf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_frame_without_cid() {
        let raw = hex!("0200A4040000");
        let frame = Frame::parse(&raw).unwrap();
        assert_eq!(frame.prologue, Prologue { pcb: 0x02, cid: None });
        assert_eq!(frame.inf, &hex!("00A4040000"));
        assert_eq!(frame.prologue.wrap(&hex!("9000")).as_ref(), hex!("029000"));
    }

    #[test]
    fn test_frame_with_cid() {
        let raw = hex!("0B000CCB3FFF");
        let frame = Frame::parse(&raw).unwrap();
        assert_eq!(
            frame.prologue,
            Prologue {
                pcb: 0x0B,
                cid: Some(0x00)
            }
        );
        assert_eq!(frame.prologue.len(), 2);
        assert_eq!(frame.inf, &hex!("0CCB3FFF"));
        assert_eq!(frame.prologue.wrap(&hex!("6A82")).as_ref(), hex!("0B006A82"));
    }

    #[test]
    fn test_prologue_only_frame() {
        let frame = Frame::parse(&hex!("0A01")).unwrap();
        assert!(frame.is_empty());

        assert_eq!(Frame::parse(&[]), Err(Error::FrameTooShort(0)));
        assert_eq!(Frame::parse(&[0x0A]), Err(Error::FrameTooShort(1)));
    }
}
