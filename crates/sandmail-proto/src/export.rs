//! Inbox export format.
//!
//! An export is the only form in which an inbox secret key leaves the
//! process. It carries everything needed to reattach to the inbox from
//! another process: identity, pinned server key and KEM secret key (the
//! public key is recovered from it).

use std::fmt;

use chrono::{DateTime, Utc};
use sandmail_crypto::{KeyPair, SECRET_KEY_SIZE, SERVER_SIG_PK_SIZE};
use serde::{Deserialize, Serialize};

use crate::{
    b64,
    errors::{ProtocolError, Result},
    ids::InboxHash,
    version::{PROTOCOL_VERSION, Versioned, check_version, decode_json},
};

/// Immutable identity of an inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxIdentity {
    /// Delivery address
    pub email_address: String,
    /// Routing identifier
    pub inbox_hash: InboxHash,
    /// Expiry time after which the server discards the inbox
    pub expires_at: DateTime<Utc>,
    /// Pinned server signature key
    pub server_sig_pk: Vec<u8>,
}

impl InboxIdentity {
    /// Whether the inbox has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Serialized inbox credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxExport {
    /// Payload version
    pub version: u64,
    /// Delivery address
    pub email_address: String,
    /// Inbox expiry
    pub expires_at: DateTime<Utc>,
    /// Routing identifier
    pub inbox_hash: InboxHash,
    /// Always `true` for importable exports
    pub encrypted: bool,
    /// Pinned server signature key
    #[serde(with = "b64")]
    pub server_sig_pk: Vec<u8>,
    /// ML-KEM secret key
    #[serde(with = "b64")]
    pub secret_key: Vec<u8>,
    /// When the export was taken
    pub exported_at: DateTime<Utc>,
}

impl Versioned for InboxExport {
    const KIND: &'static str = "inbox export";
}

impl InboxExport {
    /// Snapshot an inbox.
    pub fn new(identity: &InboxIdentity, keypair: &KeyPair, exported_at: DateTime<Utc>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            email_address: identity.email_address.clone(),
            expires_at: identity.expires_at,
            inbox_hash: identity.inbox_hash.clone(),
            encrypted: true,
            server_sig_pk: identity.server_sig_pk.clone(),
            secret_key: keypair.secret_key().to_vec(),
            exported_at,
        }
    }

    /// Decode and validate an export.
    ///
    /// Expiry is deliberately not checked here; the caller compares
    /// against its own clock.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnsupportedVersion` for version 0 or newer than 1
    /// - `ProtocolError::Malformed` for `encrypted: false`, bad key sizes or
    ///   a secret key whose embedded public key does not match
    /// - `ProtocolError::Json` for anything unparseable
    pub fn from_json(json: &str) -> Result<Self> {
        let export: Self = decode_json(json.as_bytes())?;
        export.validate()?;
        Ok(export)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Structural checks independent of clock and network.
    ///
    /// # Errors
    ///
    /// See [`InboxExport::from_json`].
    pub fn validate(&self) -> Result<()> {
        check_version(Self::KIND, self.version)?;
        if !self.encrypted {
            return Err(ProtocolError::malformed(
                "encrypted",
                "only encrypted exports are importable",
            ));
        }
        if self.secret_key.len() != SECRET_KEY_SIZE {
            return Err(ProtocolError::malformed(
                "secretKey",
                format!("expected {SECRET_KEY_SIZE} bytes, got {}", self.secret_key.len()),
            ));
        }
        if self.server_sig_pk.len() != SERVER_SIG_PK_SIZE {
            return Err(ProtocolError::malformed(
                "serverSigPk",
                format!("expected {SERVER_SIG_PK_SIZE} bytes, got {}", self.server_sig_pk.len()),
            ));
        }
        if self.inbox_hash.as_str().is_empty() {
            return Err(ProtocolError::malformed("inboxHash", "empty"));
        }
        self.keypair()?;
        Ok(())
    }

    /// Identity fields.
    pub fn identity(&self) -> InboxIdentity {
        InboxIdentity {
            email_address: self.email_address.clone(),
            inbox_hash: self.inbox_hash.clone(),
            expires_at: self.expires_at,
            server_sig_pk: self.server_sig_pk.clone(),
        }
    }

    /// Rebuild the keypair from the secret key.
    pub fn keypair(&self) -> Result<KeyPair> {
        KeyPair::from_secret_key(&self.secret_key)
            .map_err(|e| ProtocolError::malformed("secretKey", e.to_string()))
    }
}

impl fmt::Debug for InboxExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboxExport")
            .field("version", &self.version)
            .field("email_address", &self.email_address)
            .field("expires_at", &self.expires_at)
            .field("inbox_hash", &self.inbox_hash)
            .field("encrypted", &self.encrypted)
            .field("secret_key", &"[REDACTED]")
            .field("exported_at", &self.exported_at)
            .finish_non_exhaustive()
    }
}
