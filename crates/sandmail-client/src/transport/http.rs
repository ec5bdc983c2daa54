//! reqwest-backed HTTP transport.

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, Method, RequestBuilder, Response, header};
use sandmail_core::ClientConfig;
use sandmail_proto::{
    CheckKeyResponse, CreateInboxRequest, CreateInboxResponse, EmailId, EmailRecord, InboxHash,
    ServerInfo, SyncState, Versioned, decode_json,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{ByteStream, Transport};
use crate::error::TransportError;

const API_KEY_HEADER: &str = "X-API-Key";

/// Longest error body kept in `TransportError::Status`.
const MAX_ERROR_BODY: usize = 512;

/// HTTP transport for the sandbox API.
///
/// Regular requests carry the configured request timeout. The event stream
/// only bounds connection setup, since it stays open indefinitely.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: String,
    request_timeout: std::time::Duration,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").field("base_url", &self.base_url).finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Build a transport from client configuration.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Connection(format!("client setup failed: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let response = request.timeout(self.request_timeout).send().await.map_err(map_reqwest)?;
        check_status(response).await
    }

    async fn get_versioned<T: Versioned>(&self, path: &str) -> Result<T, TransportError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        let body = response.bytes().await.map_err(map_reqwest)?;
        Ok(decode_json(&body)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        let body = response.bytes().await.map_err(map_reqwest)?;
        serde_json::from_slice(&body).map_err(|e| TransportError::Protocol(e.into()))
    }
}

fn inbox_path(inbox_hash: &InboxHash) -> String {
    format!("/api/inboxes/{inbox_hash}")
}

fn email_path(inbox_hash: &InboxHash, email_id: &EmailId) -> String {
    format!("/api/inboxes/{inbox_hash}/emails/{email_id}")
}

fn map_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_body() || err.is_decode() {
        TransportError::Stream(err.to_string())
    } else {
        TransportError::Connection(err.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        body.truncate(cut);
    }
    Err(TransportError::Status { status: status.as_u16(), body })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn server_info(&self) -> Result<ServerInfo, TransportError> {
        self.get_versioned("/api/server-info").await
    }

    async fn check_key(&self) -> Result<bool, TransportError> {
        match self.get_json::<CheckKeyResponse>("/api/check-key").await {
            Ok(response) => Ok(response.ok),
            Err(TransportError::Status { status: 401 | 403, .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn create_inbox(
        &self,
        request: &CreateInboxRequest,
    ) -> Result<CreateInboxResponse, TransportError> {
        let response = self.send(self.request(Method::POST, "/api/inboxes").json(request)).await?;
        let body = response.bytes().await.map_err(map_reqwest)?;
        serde_json::from_slice(&body).map_err(|e| TransportError::Protocol(e.into()))
    }

    async fn delete_inbox(&self, inbox_hash: &InboxHash) -> Result<(), TransportError> {
        self.send(self.request(Method::DELETE, &inbox_path(inbox_hash))).await?;
        Ok(())
    }

    async fn sync_state(&self, inbox_hash: &InboxHash) -> Result<SyncState, TransportError> {
        self.get_versioned(&format!("{}/sync", inbox_path(inbox_hash))).await
    }

    async fn list_emails(
        &self,
        inbox_hash: &InboxHash,
    ) -> Result<Vec<EmailRecord>, TransportError> {
        self.get_json(&format!("{}/emails", inbox_path(inbox_hash))).await
    }

    async fn get_email(
        &self,
        inbox_hash: &InboxHash,
        email_id: &EmailId,
    ) -> Result<EmailRecord, TransportError> {
        self.get_json(&email_path(inbox_hash, email_id)).await
    }

    async fn mark_read(
        &self,
        inbox_hash: &InboxHash,
        email_id: &EmailId,
    ) -> Result<(), TransportError> {
        let path = format!("{}/read", email_path(inbox_hash, email_id));
        self.send(self.request(Method::PATCH, &path)).await?;
        Ok(())
    }

    async fn delete_email(
        &self,
        inbox_hash: &InboxHash,
        email_id: &EmailId,
    ) -> Result<(), TransportError> {
        self.send(self.request(Method::DELETE, &email_path(inbox_hash, email_id))).await?;
        Ok(())
    }

    async fn open_event_stream(&self, inboxes: &[InboxHash]) -> Result<ByteStream, TransportError> {
        let joined = inboxes.iter().map(InboxHash::as_str).collect::<Vec<_>>().join(",");
        debug!(inboxes = %joined, "opening event stream");

        let response = self
            .request(Method::GET, "/api/events")
            .query(&[("inboxes", joined.as_str())])
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(map_reqwest)?;
        let response = check_status(response).await?;

        Ok(Box::pin(response.bytes_stream().map_err(map_reqwest)))
    }
}
