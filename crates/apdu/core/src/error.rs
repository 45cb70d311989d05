//! Core error type for card-side APDU handling
//!
//! This module provides a centralized error type used throughout the seos_apdu_core crate.

use crate::response::status::StatusWord;

/// Core error type that encompasses all possible errors in the crate
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    //
    // Frame related errors
    //
    /// The frame does not even hold its block prologue
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    //
    // Command related errors
    //
    /// Invalid command length
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    /// Invalid command data
    #[error("Invalid command data: {0}")]
    InvalidCommandData(&'static str),

    //
    // Response related errors
    //
    /// Response is shorter than a status word
    #[error("Incomplete response: {0} bytes")]
    IncompleteResponse(usize),

    /// Status error from response
    #[error("Status error {status}: {}", status.description())]
    Status {
        /// Status word that caused the error
        status: StatusWord,
    },
}

impl Error {
    /// Create a status error from a status word
    pub const fn status(status: StatusWord) -> Self {
        Self::Status { status }
    }
}

/// Result type for APDU operations
pub type Result<T> = std::result::Result<T, Error>;
