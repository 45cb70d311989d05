//! Utility functions for APDU response handling

use tracing::debug;

use crate::response::status::StatusWord;
use crate::{Error, Result};

/// Extract status word and payload from raw APDU response data
///
/// Returns a tuple containing:
/// - The StatusWord object
/// - The payload data (without the status word)
///
/// # Errors
/// Returns an error if the data is too short to contain a valid status word.
pub fn extract_status_and_payload(data: &[u8]) -> Result<(StatusWord, &[u8])> {
    match data {
        [payload @ .., sw1, sw2] => Ok((StatusWord::new(*sw1, *sw2), payload)),
        _ => {
            debug!("Response too short: {} bytes", data.len());
            Err(Error::IncompleteResponse(data.len()))
        }
    }
}
