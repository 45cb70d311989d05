//! Card-side types for APDU (Application Protocol Data Unit) exchanges
//!
//! This crate provides the foundational types for an emulated smart card that
//! receives ISO/IEC 7816-4 commands over an ISO/IEC 14443-4 contactless link.
//!
//! ## Overview
//!
//! A card never initiates an exchange: it parses every inbound command, decides
//! on a payload and a status word, and echoes the block prologue of the inbound
//! frame in front of its answer. This crate provides abstractions for:
//!
//! - Parsing APDU commands received from a reader
//! - Building responses and status words
//! - Splitting and re-assembling ISO 14443-4 block frames
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

// Main modules
pub mod command;
pub mod frame;
pub mod response;

// Core error types
mod error;
pub use error::{Error, Result};

// Re-exports for common types
pub use command::{Command, Header};
pub use frame::{Frame, Prologue};
pub use response::status::StatusWord;
pub use response::{Response, utils};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Bytes, BytesMut, Command, Error, Frame, Header, Prologue, Response, Result,
        response::status::{StatusWord, common},
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    // Test the basic types are re-exported correctly
    #[test]
    fn test_reexports() {
        let cmd = Command::new(0x00, 0xA4, 0x04, 0x00);
        assert_eq!(cmd.cla, 0x00);
        assert_eq!(cmd.ins, 0xA4);
        assert_eq!(cmd.header(), Header::new(0x00, 0xA4, 0x04, 0x00));

        let resp = Response::success(Some(Bytes::from_static(&[0x01, 0x02, 0x03])));
        assert!(resp.is_success());
        assert_eq!(resp.payload(), Some(&[0x01, 0x02, 0x03][..]));
        assert_eq!(resp.status(), StatusWord::new(0x90, 0x00));
    }
}
