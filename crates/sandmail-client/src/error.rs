//! Client error types.
//!
//! Two layers: [`TransportError`] for everything that went wrong talking to
//! the server, and [`ClientError`] as the caller-facing union.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sandmail_core::ConfigViolation;
use sandmail_crypto::CryptoError;
use sandmail_proto::{InboxHash, ProtocolError};
use thiserror::Error;

/// Transport errors.
///
/// Returned after the transport's own resilience policy is exhausted.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established or broke mid-request.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Request exceeded its timeout.
    #[error("request timed out")]
    Timeout,

    /// Server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// Event stream broke while reading.
    #[error("stream error: {0}")]
    Stream(String),

    /// Response body could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Client errors (4xx other than 408/429) and undecodable responses are
    /// never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout | Self::Stream(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Protocol(_) => false,
        }
    }

    /// Whether the server reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced to SDK callers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Server could not be reached or rejected the request.
    #[error(transparent)]
    Transport(TransportError),

    /// Decryption or signature verification failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Payload version or shape not understood.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Import of an export whose inbox has already expired.
    #[error("inbox {inbox_hash} expired at {expired_at}")]
    ExpiredInbox {
        /// Expired inbox
        inbox_hash: InboxHash,
        /// When it expired
        expired_at: DateTime<Utc>,
    },

    /// Configuration failed validation.
    #[error("invalid configuration: {}", format_violations(.0))]
    InvalidConfig(Vec<ConfigViolation>),

    /// A wait exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The delivery strategy gave up on an inbox.
    #[error("delivery failed for inbox {inbox_hash}: {reason}")]
    DeliveryFailed {
        /// Affected inbox
        inbox_hash: InboxHash,
        /// Cause reported by the strategy
        reason: String,
    },

    /// Inbox, monitor or client was disposed, or every subscription ended.
    #[error("disposed")]
    Disposed,

    /// Export file could not be read or written.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Protocol(err) => Self::Protocol(err),
            other => Self::Transport(other),
        }
    }
}

impl ClientError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_transient(),
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}

fn format_violations(violations: &[ConfigViolation]) -> String {
    violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Status { status: 503, body: String::new() }.is_transient());
        assert!(TransportError::Status { status: 429, body: String::new() }.is_transient());
        assert!(!TransportError::Status { status: 401, body: String::new() }.is_transient());
    }

    #[test]
    fn protocol_errors_lift_out_of_transport() {
        let err = ClientError::from(TransportError::Protocol(ProtocolError::Malformed {
            field: "version",
            reason: "missing".to_string(),
        }));
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn invalid_config_lists_violations() {
        let err = ClientError::InvalidConfig(vec![
            ConfigViolation::MissingBaseUrl,
            ConfigViolation::MissingApiKey,
        ]);
        assert_eq!(
            err.to_string(),
            "invalid configuration: base_url is required; api_key is required"
        );
    }
}
