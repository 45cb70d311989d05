//! L2CAP basic frames
//!
//! Every ACL payload on an LE link carries a basic frame: a little-endian
//! length and channel identifier followed by the channel PDU. A frame longer
//! than the controller buffer arrives as a start fragment and continuation
//! fragments, which [`Reassembler`] joins back together.

use tracing::{trace, warn};

use crate::packet::boundary;
use crate::{Error, Result};

/// Fixed channel of the attribute protocol
pub const ATT_CID: u16 = 0x0004;

/// Length and channel identifier
pub const HEADER_LEN: usize = 4;

/// One complete basic frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicFrame {
    /// Channel identifier
    pub cid: u16,
    /// Channel PDU
    pub payload: Vec<u8>,
}

/// Wrap `pdu` in a basic frame for `cid`
pub fn frame(cid: u16, pdu: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(pdu.len()).map_err(|_| Error::Malformed("L2CAP PDU too long"))?;
    let mut out = Vec::with_capacity(HEADER_LEN + pdu.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&cid.to_le_bytes());
    out.extend_from_slice(pdu);
    Ok(out)
}

/// Joins ACL fragments into basic frames
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: Vec<u8>,
}

impl Reassembler {
    /// Create an empty reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one ACL fragment, returning the frame it completes
    ///
    /// `flags` is the packet boundary and broadcast nibble of the ACL header.
    pub fn push(&mut self, flags: u8, fragment: &[u8]) -> Result<Option<BasicFrame>> {
        if flags & boundary::MASK == boundary::CONTINUATION {
            if self.buffer.is_empty() {
                return Err(Error::Malformed("continuation without a start fragment"));
            }
        } else if !self.buffer.is_empty() {
            warn!(dropped = self.buffer.len(), "Incomplete L2CAP frame replaced");
            self.buffer.clear();
        }
        self.buffer.extend_from_slice(fragment);

        let [lo, hi, cid_lo, cid_hi, ..] = self.buffer[..] else {
            return Ok(None);
        };
        let total = HEADER_LEN + usize::from(u16::from_le_bytes([lo, hi]));
        if self.buffer.len() < total {
            trace!(have = self.buffer.len(), total, "Waiting for more fragments");
            return Ok(None);
        }
        if self.buffer.len() > total {
            self.buffer.clear();
            return Err(Error::Malformed("ACL data longer than its L2CAP frame"));
        }

        let payload = self.buffer.split_off(HEADER_LEN);
        self.buffer.clear();
        Ok(Some(BasicFrame {
            cid: u16::from_le_bytes([cid_lo, cid_hi]),
            payload,
        }))
    }

    /// Drop a partially received frame
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
