//! Protocol error types.

use thiserror::Error;

/// Result alias for decoding operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while decoding wire payloads.
///
/// Every variant rejects the single payload being decoded. None of them
/// imply anything about the connection or other payloads.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload declares a version this client does not understand
    #[error("unsupported {kind} version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Which payload type carried the version
        kind: &'static str,
        /// Version found on the wire
        found: u64,
        /// Highest version this client supports
        supported: u64,
    },

    /// Envelope declares an algorithm suite other than the supported one
    #[error("unsupported algorithm suite: kem={kem} sig={sig} aead={aead} kdf={kdf}")]
    UnsupportedSuite {
        /// Declared KEM
        kem: String,
        /// Declared signature algorithm
        sig: String,
        /// Declared AEAD
        aead: String,
        /// Declared KDF
        kdf: String,
    },

    /// Field present but unusable
    #[error("malformed {field}: {reason}")]
    Malformed {
        /// Wire name of the offending field
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// Payload is not valid JSON for the expected shape
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Event-stream frame grew beyond the configured limit
    #[error("event-stream frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Bytes buffered so far
        size: usize,
        /// Configured limit
        max: usize,
    },
}

impl ProtocolError {
    pub(crate) fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed { field, reason: reason.into() }
    }
}
