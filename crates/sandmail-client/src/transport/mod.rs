//! Server boundary.
//!
//! [`Transport`] is the seam between delivery logic and the network. The
//! production implementation is [`HttpTransport`]; tests use the simulated
//! server from the harness crate. Retry and circuit breaking belong behind
//! this trait, never in front of it.

mod http;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
pub use http::HttpTransport;
use sandmail_proto::{
    CreateInboxRequest, CreateInboxResponse, EmailId, EmailRecord, InboxHash, ServerInfo,
    SyncState,
};

use crate::error::TransportError;

/// Raw body of an open event stream.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Request/response primitives consumed by the SDK.
///
/// Every call either returns a decoded response or fails with a
/// [`TransportError`] after the implementation's resilience policy has been
/// applied.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// `GET /api/server-info`
    async fn server_info(&self) -> Result<ServerInfo, TransportError>;

    /// `GET /api/check-key`
    async fn check_key(&self) -> Result<bool, TransportError>;

    /// `POST /api/inboxes`
    async fn create_inbox(
        &self,
        request: &CreateInboxRequest,
    ) -> Result<CreateInboxResponse, TransportError>;

    /// `DELETE /api/inboxes/{inboxHash}`
    async fn delete_inbox(&self, inbox_hash: &InboxHash) -> Result<(), TransportError>;

    /// `GET /api/inboxes/{inboxHash}/sync`
    async fn sync_state(&self, inbox_hash: &InboxHash) -> Result<SyncState, TransportError>;

    /// `GET /api/inboxes/{inboxHash}/emails`
    async fn list_emails(&self, inbox_hash: &InboxHash)
    -> Result<Vec<EmailRecord>, TransportError>;

    /// `GET /api/inboxes/{inboxHash}/emails/{id}`
    async fn get_email(
        &self,
        inbox_hash: &InboxHash,
        email_id: &EmailId,
    ) -> Result<EmailRecord, TransportError>;

    /// `PATCH /api/inboxes/{inboxHash}/emails/{id}/read`
    async fn mark_read(
        &self,
        inbox_hash: &InboxHash,
        email_id: &EmailId,
    ) -> Result<(), TransportError>;

    /// `DELETE /api/inboxes/{inboxHash}/emails/{id}`
    async fn delete_email(
        &self,
        inbox_hash: &InboxHash,
        email_id: &EmailId,
    ) -> Result<(), TransportError>;

    /// `GET /api/events?inboxes=...`
    ///
    /// Resolves once the server accepted the stream. A non-success status
    /// is an error here, not an empty stream.
    async fn open_event_stream(&self, inboxes: &[InboxHash]) -> Result<ByteStream, TransportError>;
}
