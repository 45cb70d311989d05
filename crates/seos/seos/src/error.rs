use iso7816_tlv::TlvError;

/// Result type for SEOS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for SEOS operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// APDU or frame level errors
    #[error(transparent)]
    Apdu(#[from] seos_apdu_core::Error),

    /// Unrecognized AID, ADF or command
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(&'static str),

    /// CMAC or echoed nonce mismatch
    #[error("Integrity check failed: {0}")]
    IntegrityFailure(&'static str),

    /// A frame arrived with an unexpected size while an operation was pending
    #[error("Transport desync: expected {expected} bytes, got {actual}")]
    TransportDesync {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Credential or key material is missing or malformed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Cipher suite identifier not supported
    #[error("Unsupported cipher suite {0:#04x}")]
    UnsupportedCipher(u8),

    /// Hash algorithm identifier not supported
    #[error("Unsupported hash algorithm {0:#04x}")]
    UnsupportedHash(u8),

    /// Key or IV of the wrong size for the cipher
    #[error("Invalid key or IV length")]
    InvalidKeyLength,

    /// Data handed to an unpadded cipher is not block aligned
    #[error("Data length {0} is not a multiple of the block size")]
    Unaligned(usize),

    #[error("Unpad error")]
    UnpadError(#[from] cipher::block_padding::UnpadError),

    /// Cleartext does not fit a short secure messaging APDU
    #[error("Payload of {0} bytes exceeds the secure messaging limit")]
    PayloadTooLarge(usize),

    #[error("TlvError: {0}")]
    TlvError(TlvError),

    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
}

impl From<TlvError> for Error {
    fn from(error: TlvError) -> Self {
        Self::TlvError(error)
    }
}

impl Error {
    /// Build a configuration error from anything printable
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether the error invalidates the authentication or secure session
    pub const fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::IntegrityFailure(_) | Self::TransportDesync { .. } | Self::UnpadError(_)
        )
    }
}
