//! Sync checkpoints.

use serde::{Deserialize, Serialize};

use crate::version::{PROTOCOL_VERSION, Versioned};

/// The server's `{count, hash}` token over one inbox's contents.
///
/// Polling compares `emails_hash` against the last observed value; equal
/// hashes mean nothing changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Payload version
    pub version: u64,
    /// Number of emails currently stored
    pub email_count: u64,
    /// Opaque content hash
    pub emails_hash: String,
}

impl SyncState {
    /// Current-version checkpoint.
    pub fn new(email_count: u64, emails_hash: impl Into<String>) -> Self {
        Self { version: PROTOCOL_VERSION, email_count, emails_hash: emails_hash.into() }
    }
}

impl Versioned for SyncState {
    const KIND: &'static str = "sync state";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::ProtocolError, version::decode_json};

    #[test]
    fn decodes_camel_case() {
        let state: SyncState =
            decode_json(br#"{"version":1,"emailCount":3,"emailsHash":"abc"}"#).unwrap();
        assert_eq!(state, SyncState::new(3, "abc"));
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_string(&SyncState::new(0, "h")).unwrap();
        assert_eq!(json, r#"{"version":1,"emailCount":0,"emailsHash":"h"}"#);
    }

    #[test]
    fn zero_version_rejected() {
        let result =
            decode_json::<SyncState>(br#"{"version":0,"emailCount":3,"emailsHash":"abc"}"#);
        assert!(matches!(result, Err(ProtocolError::UnsupportedVersion { found: 0, .. })));
    }
}
