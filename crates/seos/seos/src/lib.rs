//! SEOS credential emulation
//!
//! This crate implements the card side of the SEOS access-control protocol as
//! it runs over an ISO/IEC 14443-4 contactless link: applet and ADF selection,
//! the two-step General Authenticate mutual authentication, and the secure
//! messaging session used to release the Service Information Object (SIO).
//!
//! The main entry point is the [`Emulator`], which consumes raw contactless
//! frames and produces the frames to answer with. A [`Reader`] implements the
//! opposite side of the same exchange so credentials can be captured and the
//! whole handshake can be exercised without hardware.
//!
//! Credentials are loaded from the key/value file format handled by
//! [`Credential`]; facility keys from the one handled by [`FacilityKeys`].
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod adf;
pub mod auth;
pub mod constants;
pub mod credential;
pub mod crypto;
pub mod emulator;
pub mod error;
pub mod event;
mod file;
pub mod keys;
pub mod reader;
pub mod secure_messaging;

// Re-exports
pub use credential::Credential;
pub use crypto::{CipherSuite, HashAlgorithm, Key};
pub use emulator::{Emulator, EmulatorConfig, EmulatorMode, Reply, SessionControl, State};
pub use error::{Error, Result};
pub use event::{Event, EventLog, EventSink, NullSink};
pub use keys::{AuthKeys, FacilityKeys};
pub use reader::Reader;
pub use secure_messaging::{Role, SecureMessaging};

// Re-export from seos_apdu_core for convenience
pub use seos_apdu_core::{Bytes, Command, Response, StatusWord};
