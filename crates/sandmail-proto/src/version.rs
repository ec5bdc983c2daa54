//! Version gate shared by every versioned payload.
//!
//! Payloads are parsed to a JSON value first so that the version is
//! checked before the shape is. A newer payload whose shape changed is
//! reported as `UnsupportedVersion`, not as a confusing JSON error.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::{ProtocolError, Result};

/// Highest payload version this crate understands.
pub const PROTOCOL_VERSION: u64 = 1;

/// A payload carrying an explicit version field.
pub trait Versioned: DeserializeOwned {
    /// Payload name used in error messages.
    const KIND: &'static str;

    /// JSON key holding the version.
    const VERSION_FIELD: &'static str = "version";
}

/// Reject versions outside `1..=PROTOCOL_VERSION`.
pub fn check_version(kind: &'static str, found: u64) -> Result<()> {
    if found == 0 || found > PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion {
            kind,
            found,
            supported: PROTOCOL_VERSION,
        });
    }
    Ok(())
}

/// Version-check and decode a payload.
pub fn decode_versioned<T: Versioned>(value: Value) -> Result<T> {
    let version = value
        .get(T::VERSION_FIELD)
        .ok_or_else(|| ProtocolError::malformed(T::VERSION_FIELD, "missing"))?
        .as_u64()
        .ok_or_else(|| ProtocolError::malformed(T::VERSION_FIELD, "not an unsigned integer"))?;
    check_version(T::KIND, version)?;

    Ok(serde_json::from_value(value)?)
}

/// Parse JSON text and decode it as `T`.
pub fn decode_json<T: Versioned>(bytes: &[u8]) -> Result<T> {
    decode_versioned(serde_json::from_slice(bytes)?)
}
