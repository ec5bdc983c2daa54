//! Email records and decrypted email bodies.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    envelope::WireEnvelope,
    ids::{EmailId, InboxHash},
    version::Versioned,
};

/// One stored email as returned by the list and get endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRecord {
    /// Email identifier
    pub id: EmailId,
    /// Owning inbox
    pub inbox_hash: InboxHash,
    /// Server receive time
    pub received_at: DateTime<Utc>,
    /// Read flag
    #[serde(default)]
    pub is_read: bool,
    /// Encrypted body
    pub envelope: WireEnvelope,
}

/// Attachment metadata. Attachment contents are not carried in the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    /// File name as sent
    pub filename: String,
    /// MIME type
    pub content_type: String,
    /// Size in bytes
    pub size: u64,
}

/// Plaintext body found inside an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailContent {
    /// Payload version
    pub version: u64,
    /// Subject line
    #[serde(default)]
    pub subject: String,
    /// Sender address
    pub from: String,
    /// Recipient addresses
    #[serde(default)]
    pub to: Vec<String>,
    /// Plain text body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// HTML body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Attachment metadata
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
    /// Selected raw headers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl Versioned for EmailContent {
    const KIND: &'static str = "email body";
}

/// An email whose envelope decrypted and verified.
///
/// Only ever constructed after both checks succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedEmail {
    /// Email identifier
    pub id: EmailId,
    /// Owning inbox
    pub inbox_hash: InboxHash,
    /// Server receive time
    pub received_at: DateTime<Utc>,
    /// Read flag at fetch time
    pub is_read: bool,
    /// Subject line
    pub subject: String,
    /// Sender address
    pub from: String,
    /// Recipient addresses
    pub to: Vec<String>,
    /// Plain text body
    pub text: Option<String>,
    /// HTML body
    pub html: Option<String>,
    /// Attachment metadata
    pub attachments: Vec<AttachmentMeta>,
    /// Selected raw headers
    pub headers: BTreeMap<String, String>,
}

impl DecryptedEmail {
    /// Combine record metadata with its decrypted body.
    pub fn from_parts(record: &EmailRecord, content: EmailContent) -> Self {
        Self {
            id: record.id.clone(),
            inbox_hash: record.inbox_hash.clone(),
            received_at: record.received_at,
            is_read: record.is_read,
            subject: content.subject,
            from: content.from,
            to: content.to,
            text: content.text,
            html: content.html,
            attachments: content.attachments,
            headers: content.headers.unwrap_or_default(),
        }
    }
}
