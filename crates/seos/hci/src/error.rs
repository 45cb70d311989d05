/// Result type for HCI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for HCI operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The controller reported a non-zero status or a hardware error
    #[error("Controller fault in {context}: status {status:#04x}")]
    ControllerFault {
        /// Status or hardware error code
        status: u8,
        /// Command or event that reported the fault
        context: String,
    },

    /// Short or inconsistent packet
    #[error("Malformed HCI packet: {0}")]
    Malformed(&'static str),

    /// The transport failed to deliver a packet
    #[error("Transport error: {0}")]
    Transport(String),

    /// ACL data needs an open connection
    #[error("No active connection")]
    NotConnected,
}

impl Error {
    /// Build a controller fault
    pub fn controller_fault(status: u8, context: impl Into<String>) -> Self {
        Self::ControllerFault {
            status,
            context: context.into(),
        }
    }
}
