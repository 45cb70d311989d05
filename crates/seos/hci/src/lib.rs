//! Bluetooth LE HCI controller engine for SEOS
//!
//! This crate drives a discrete Bluetooth LE radio through raw HCI command,
//! event and ACL data packets. It covers the subset needed to run a SEOS
//! exchange over the air: controller bring-up, advertising the SEOS reader or
//! credential service, scanning for peers that advertise it, connecting, and
//! moving ACL data for the link.
//!
//! The [`HciController`] consumes one [`Input`] at a time and sends commands
//! through an [`HciTransport`]. Use [`SharedController`] when the retry timer
//! and the transport callback run in different contexts.
//!
//! Once connected, [`SeosLink`] runs the SEOS exchange itself over the
//! attribute protocol: a credential answers through a [`seos::Emulator`], a
//! reader drives a [`seos::Reader`] and hands the result to a
//! [`CapturedCredential`].
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod advertising;
pub mod att;
pub mod config;
pub mod controller;
pub mod error;
pub mod l2cap;
pub mod link;
pub mod opcode;
pub mod packet;
pub mod shared;
pub mod transport;

// Re-exports
pub use att::{AttBearer, Side};
pub use config::HciConfig;
pub use controller::{
    AclQueue, BleMode, FlowRole, HciController, Input, LinkHandler, NoopLinkHandler,
    PendingConfirmation, Toggle,
};
pub use error::{Error, Result};
pub use link::{CapturedCredential, SeosLink};
pub use opcode::Opcode;
pub use packet::{Address, HciEvent, Packet, PacketType};
pub use shared::SharedController;
pub use transport::HciTransport;
