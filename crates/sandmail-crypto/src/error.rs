//! Cryptographic error types.
//!
//! Every variant is fail-closed: an operation that returns one of these has
//! produced no key material and no plaintext.

use thiserror::Error;

/// Errors from key agreement, decryption and signature verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key or ciphertext had the wrong length for the suite
    #[error("invalid {what} size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Which input was rejected
        what: &'static str,
        /// Length the suite requires
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// Authenticated decryption failed (wrong key or tampered ciphertext)
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Why decryption was rejected
        reason: String,
    },

    /// Key had the right length but inconsistent contents
    #[error("malformed {what}: {reason}")]
    MalformedKey {
        /// Which input was rejected
        what: &'static str,
        /// What was inconsistent
        reason: String,
    },

    /// Server signature did not verify or was issued by an unexpected key
    #[error("signature invalid: {reason}")]
    SignatureInvalid {
        /// Why verification was rejected
        reason: String,
    },
}

impl CryptoError {
    pub(crate) fn key_size(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::InvalidKeySize { what, expected, actual }
    }
}
