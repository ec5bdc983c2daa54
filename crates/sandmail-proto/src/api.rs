//! Request and response bodies of the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    b64,
    envelope::Algorithms,
    errors::{ProtocolError, Result},
    export::InboxIdentity,
    ids::{EmailId, InboxHash},
    version::Versioned,
};

/// `GET /api/server-info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Payload version
    pub version: u64,
    /// Key the server signs envelopes with
    #[serde(with = "b64")]
    pub server_sig_pk: Vec<u8>,
    /// Suite the server encrypts with
    pub algs: Algorithms,
    /// Longest inbox lifetime the server grants, in seconds
    pub max_ttl: u64,
    /// Lifetime used when none is requested, in seconds
    pub default_ttl: u64,
    /// Domains inbox addresses may use
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

impl Versioned for ServerInfo {
    const KIND: &'static str = "server info";
}

/// `GET /api/check-key`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckKeyResponse {
    /// Whether the API key is accepted
    pub ok: bool,
}

/// `POST /api/inboxes`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInboxRequest {
    /// Client ML-KEM public key
    #[serde(with = "b64")]
    pub client_kem_pk: Vec<u8>,
    /// Requested lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    /// Requested address or domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
}

/// Response to inbox creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInboxResponse {
    /// Assigned address
    pub email_address: String,
    /// Assigned routing identifier
    pub inbox_hash: InboxHash,
    /// Expiry time
    pub expires_at: DateTime<Utc>,
    /// Key that will sign this inbox's envelopes
    #[serde(with = "b64")]
    pub server_sig_pk: Vec<u8>,
}

impl CreateInboxResponse {
    /// Identity to pin into the new inbox.
    pub fn into_identity(self) -> InboxIdentity {
        InboxIdentity {
            email_address: self.email_address,
            inbox_hash: self.inbox_hash,
            expires_at: self.expires_at,
            server_sig_pk: self.server_sig_pk,
        }
    }
}

/// `data:` payload of an event-stream frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    /// Inbox that received the email
    pub inbox_id: InboxHash,
    /// New email
    pub email_id: EmailId,
}

impl EventFrame {
    /// Parse a frame's data field.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Json` if the data is not an event object
    /// - `ProtocolError::Malformed` if either identifier is empty
    pub fn parse(data: &str) -> Result<Self> {
        let frame: Self = serde_json::from_str(data)?;
        if frame.inbox_id.as_str().is_empty() {
            return Err(ProtocolError::malformed("inboxId", "empty"));
        }
        if frame.email_id.as_str().is_empty() {
            return Err(ProtocolError::malformed("emailId", "empty"));
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_omits_unset_options() {
        let request = CreateInboxRequest { client_kem_pk: vec![1, 2], ttl: None, email_address: None };
        assert_eq!(serde_json::to_string(&request).unwrap(), r#"{"clientKemPk":"AQI"}"#);
    }

    #[test]
    fn create_request_with_options() {
        let request = CreateInboxRequest {
            client_kem_pk: vec![],
            ttl: Some(3600),
            email_address: Some("qa.example.com".to_string()),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"clientKemPk":"","ttl":3600,"emailAddress":"qa.example.com"}"#
        );
    }

    #[test]
    fn parses_event_frame() {
        let frame = EventFrame::parse(r#"{"inboxId":"A","emailId":"abc123"}"#).unwrap();
        assert_eq!(frame.inbox_id, InboxHash::new("A"));
        assert_eq!(frame.email_id, EmailId::new("abc123"));
    }

    #[test]
    fn rejects_empty_event_ids() {
        assert!(matches!(
            EventFrame::parse(r#"{"inboxId":"","emailId":"x"}"#),
            Err(ProtocolError::Malformed { field: "inboxId", .. })
        ));
        assert!(EventFrame::parse("keepalive").is_err());
    }
}
