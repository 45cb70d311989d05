//! APDU response definitions
//!
//! This module provides the response type the card answers with, according to
//! ISO/IEC 7816-4.

pub mod status;
pub mod utils;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::Result;
use status::{StatusWord, common};

/// Basic APDU response structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response payload data
    payload: Option<Bytes>,
    /// Status word
    status: StatusWord,
}

impl Response {
    /// Create a new response with payload and status
    pub fn new(payload: Option<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            payload,
            status: status.into(),
        }
    }

    /// Create a success response
    pub const fn success(payload: Option<Bytes>) -> Self {
        Self {
            payload,
            status: common::SUCCESS,
        }
    }

    /// Create an error response from a status word
    pub fn error(status: impl Into<StatusWord>) -> Self {
        Self {
            payload: None,
            status: status.into(),
        }
    }

    /// Parse response from raw bytes (including status word)
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (status, payload) = utils::extract_status_and_payload(data)?;

        trace!(
            sw1 = format_args!("{:#04x}", status.sw1),
            sw2 = format_args!("{:#04x}", status.sw2),
            payload_len = payload.len(),
            "Parsed APDU response"
        );

        let payload = (!payload.is_empty()).then(|| Bytes::copy_from_slice(payload));
        Ok(Self { payload, status })
    }

    /// Get the response payload data
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Get the status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Check if the response indicates success
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Length of the encoded response
    pub fn len(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len) + 2
    }

    /// A response always carries at least its status word
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Encode the payload followed by the status word
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        if let Some(payload) = &self.payload {
            buf.put_slice(payload);
        }
        buf.put_slice(&self.status.to_bytes());
        buf.freeze()
    }
}

impl From<Response> for Bytes {
    fn from(response: Response) -> Self {
        response.to_bytes()
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = crate::Error;

    fn try_from(data: &[u8]) -> Result<Self> {
        Self::from_bytes(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_response_encoding() {
        let resp = Response::success(Some(Bytes::from_static(&hex!("7C0A8108"))));
        assert_eq!(resp.to_bytes().as_ref(), hex!("7C0A81089000"));
        assert_eq!(resp.len(), 6);

        let resp = Response::error(common::FILE_NOT_FOUND);
        assert_eq!(Bytes::from(resp).as_ref(), hex!("6A82"));
    }

    #[test]
    fn test_response_from_bytes() {
        let resp = Response::from_bytes(&hex!("0102039000")).unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.payload(), Some(&hex!("010203")[..]));

        let resp = Response::try_from(&hex!("6988")[..]).unwrap();
        assert_eq!(resp.status(), common::NO_SECURE_MESSAGING);
        assert_eq!(resp.payload(), None);
    }
}
