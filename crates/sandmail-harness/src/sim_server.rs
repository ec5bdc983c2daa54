//! In-memory sandbox server.
//!
//! `SimServer` implements `Transport` directly, so a client under test talks
//! to it without any networking. Emails are sealed with the real envelope
//! code and signed with the server's key; event streams are unbounded
//! channels that the test can push to, drop, or refuse to open.
//!
//! The sync hash is derived from a per-inbox revision that changes whenever
//! an email is added or removed.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use futures::channel::mpsc;
use sandmail_client::{ByteStream, Transport, TransportError};
use sandmail_core::Environment;
use sandmail_crypto::{CipherSuite, PUBLIC_KEY_SIZE, ServerSigner, seal_envelope};
use sandmail_proto::{
    Algorithms, AttachmentMeta, CreateInboxRequest, CreateInboxResponse, EmailContent, EmailId,
    EmailRecord, EventFrame, InboxHash, PROTOCOL_VERSION, ServerInfo, SyncState, WireEnvelope,
};
use tracing::debug;

use crate::SimEnv;

/// Lifetime granted when the request names none, in seconds.
pub const DEFAULT_TTL: u64 = 3600;

/// Longest lifetime granted, in seconds.
pub const MAX_TTL: u64 = 7 * 24 * 3600;

/// Domain of server-assigned addresses.
pub const SIM_DOMAIN: &str = "sandbox.test";

/// Number of calls per endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `server_info`
    pub server_info: u32,
    /// `check_key`
    pub check_key: u32,
    /// `create_inbox`
    pub create_inbox: u32,
    /// `delete_inbox`
    pub delete_inbox: u32,
    /// `sync_state`
    pub sync_state: u32,
    /// `list_emails`
    pub list_emails: u32,
    /// `get_email`
    pub get_email: u32,
    /// `mark_read`
    pub mark_read: u32,
    /// `delete_email`
    pub delete_email: u32,
    /// `open_event_stream`, including refused attempts
    pub open_event_stream: u32,
}

impl CallCounts {
    /// Sum over every endpoint.
    pub fn total(&self) -> u32 {
        self.server_info
            + self.check_key
            + self.create_inbox
            + self.delete_inbox
            + self.sync_state
            + self.list_emails
            + self.get_email
            + self.mark_read
            + self.delete_email
            + self.open_event_stream
    }
}

/// Email body to deliver.
#[derive(Debug, Clone)]
pub struct SimEmail {
    /// Subject line
    pub subject: String,
    /// Sender address
    pub from: String,
    /// Plain text body
    pub text: Option<String>,
    /// HTML body
    pub html: Option<String>,
    /// Attachment metadata
    pub attachments: Vec<AttachmentMeta>,
}

impl SimEmail {
    /// Plain text email.
    pub fn new(subject: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            from: from.into(),
            text: Some("hello from the simulation".to_string()),
            html: None,
            attachments: Vec::new(),
        }
    }

    /// Replace the text body.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Add an HTML body.
    #[must_use]
    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Add attachment metadata.
    #[must_use]
    pub fn with_attachment(mut self, attachment: AttachmentMeta) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// How a delivered envelope is corrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tamper {
    None,
    /// Body altered after signing
    Ciphertext,
    /// Signed by a key other than the inbox's pinned one
    ForeignSigner,
}

struct SimInbox {
    email_address: String,
    client_kem_pk: Vec<u8>,
    expires_at: DateTime<Utc>,
    emails: Vec<EmailRecord>,
    revision: u64,
}

struct EventStream {
    inboxes: BTreeSet<InboxHash>,
    tx: mpsc::UnboundedSender<Result<Bytes, TransportError>>,
}

struct State {
    inboxes: BTreeMap<InboxHash, SimInbox>,
    streams: Vec<EventStream>,
    refuse_connects: u32,
    transient_sync_failures: u32,
    key_accepted: bool,
    next_email: u64,
    calls: CallCounts,
}

struct Inner {
    env: SimEnv,
    signer: ServerSigner,
    impostor: ServerSigner,
    state: Mutex<State>,
}

/// Simulated sandbox server. Clones share state.
#[derive(Clone)]
pub struct SimServer {
    inner: Arc<Inner>,
}

impl SimServer {
    /// Server whose keys and identifiers come from `env`'s RNG.
    pub fn new(env: SimEnv) -> Self {
        let signer = ServerSigner::from_seed(env.random_seed());
        let impostor = ServerSigner::from_seed(env.random_seed());
        Self {
            inner: Arc::new(Inner {
                env,
                signer,
                impostor,
                state: Mutex::new(State {
                    inboxes: BTreeMap::new(),
                    streams: Vec::new(),
                    refuse_connects: 0,
                    transient_sync_failures: 0,
                    key_accepted: true,
                    next_email: 1,
                    calls: CallCounts::default(),
                }),
            }),
        }
    }

    /// Key the server signs envelopes with.
    pub fn server_sig_pk(&self) -> [u8; 32] {
        self.inner.signer.public_key()
    }

    /// Calls made so far.
    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Deliver an email and announce it on open event streams.
    pub fn deliver(&self, inbox_hash: &InboxHash, email: &SimEmail) -> EmailId {
        let id = self.next_email_id();
        self.store(inbox_hash, id, email, Tamper::None, true)
    }

    /// Deliver an email under a chosen id.
    pub fn deliver_with_id(
        &self,
        inbox_hash: &InboxHash,
        id: impl Into<EmailId>,
        email: &SimEmail,
    ) -> EmailId {
        self.store(inbox_hash, id.into(), email, Tamper::None, true)
    }

    /// Store an email without announcing it; only polling can find it.
    pub fn deliver_silently(&self, inbox_hash: &InboxHash, email: &SimEmail) -> EmailId {
        let id = self.next_email_id();
        self.store(inbox_hash, id, email, Tamper::None, false)
    }

    /// Deliver an email whose body was altered after signing.
    pub fn deliver_tampered(&self, inbox_hash: &InboxHash, email: &SimEmail) -> EmailId {
        let id = self.next_email_id();
        self.store(inbox_hash, id, email, Tamper::Ciphertext, true)
    }

    /// Deliver an email signed by a key other than the server's.
    pub fn deliver_forged(&self, inbox_hash: &InboxHash, email: &SimEmail) -> EmailId {
        let id = self.next_email_id();
        self.store(inbox_hash, id, email, Tamper::ForeignSigner, true)
    }

    /// End every open event stream as if the connection dropped.
    pub fn drop_streams(&self) {
        let dropped = std::mem::take(&mut self.lock().streams);
        debug!(count = dropped.len(), "dropping event streams");
    }

    /// Break every open event stream with a read error.
    pub fn break_streams(&self) {
        let broken = std::mem::take(&mut self.lock().streams);
        for stream in broken {
            let _ = stream
                .tx
                .unbounded_send(Err(TransportError::Stream("simulated read error".to_string())));
        }
    }

    /// Refuse the next `n` event stream requests.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().refuse_connects = n;
    }

    /// Answer the next `n` sync requests with 503.
    pub fn fail_next_syncs(&self, n: u32) {
        self.lock().transient_sync_failures = n;
    }

    /// Whether `check_key` accepts the client's key.
    pub fn set_key_accepted(&self, accepted: bool) {
        self.lock().key_accepted = accepted;
    }

    /// Forget an inbox as if it expired server-side.
    pub fn expire_inbox(&self, inbox_hash: &InboxHash) {
        self.lock().inboxes.remove(inbox_hash);
    }

    /// Number of live event streams.
    pub fn open_streams(&self) -> usize {
        let mut state = self.lock();
        state.streams.retain(|stream| !stream.tx.is_closed());
        state.streams.len()
    }

    /// Inbox lists of the live event streams.
    pub fn stream_inboxes(&self) -> Vec<Vec<InboxHash>> {
        let mut state = self.lock();
        state.streams.retain(|stream| !stream.tx.is_closed());
        state.streams.iter().map(|stream| stream.inboxes.iter().cloned().collect()).collect()
    }

    /// Ids stored for an inbox, in delivery order.
    pub fn email_ids(&self, inbox_hash: &InboxHash) -> Vec<EmailId> {
        self.lock()
            .inboxes
            .get(inbox_hash)
            .map(|inbox| inbox.emails.iter().map(|record| record.id.clone()).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_email_id(&self) -> EmailId {
        let mut state = self.lock();
        let n = state.next_email;
        state.next_email += 1;
        EmailId::new(format!("email-{n:04}"))
    }

    /// Seal, store and optionally announce one email.
    ///
    /// Unknown inboxes are a test bug, so they are logged and ignored.
    fn store(
        &self,
        inbox_hash: &InboxHash,
        id: EmailId,
        email: &SimEmail,
        tamper: Tamper,
        announce: bool,
    ) -> EmailId {
        let Some((address, client_kem_pk)) = self
            .lock()
            .inboxes
            .get(inbox_hash)
            .map(|inbox| (inbox.email_address.clone(), inbox.client_kem_pk.clone()))
        else {
            debug!(inbox = %inbox_hash, "delivery to unknown inbox ignored");
            return id;
        };

        let content = EmailContent {
            version: PROTOCOL_VERSION,
            subject: email.subject.clone(),
            from: email.from.clone(),
            to: vec![address],
            text: email.text.clone(),
            html: email.html.clone(),
            attachments: email.attachments.clone(),
            headers: None,
        };
        let Ok(plaintext) = serde_json::to_vec(&content) else {
            return id;
        };

        let signer = match tamper {
            Tamper::ForeignSigner => &self.inner.impostor,
            Tamper::None | Tamper::Ciphertext => &self.inner.signer,
        };
        let sealed = seal_envelope(
            &plaintext,
            id.as_str().as_bytes(),
            &client_kem_pk,
            inbox_hash.as_str(),
            signer,
            self.inner.env.random_seed(),
        );
        let mut envelope = match sealed {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(inbox = %inbox_hash, %err, "sealing failed");
                return id;
            },
        };
        if tamper == Tamper::Ciphertext
            && let Some(byte) = envelope.ciphertext.first_mut()
        {
            *byte ^= 0x01;
        }

        let record = EmailRecord {
            id: id.clone(),
            inbox_hash: inbox_hash.clone(),
            received_at: self.inner.env.wall_clock(),
            is_read: false,
            envelope: WireEnvelope::from(&envelope),
        };

        let mut state = self.lock();
        let Some(inbox) = state.inboxes.get_mut(inbox_hash) else {
            return id;
        };
        inbox.emails.push(record);
        inbox.revision += 1;

        if announce {
            let frame = EventFrame { inbox_id: inbox_hash.clone(), email_id: id.clone() };
            if let Ok(data) = serde_json::to_string(&frame) {
                let chunk = Bytes::from(format!("event: email\ndata: {data}\n\n"));
                state.streams.retain(|stream| !stream.tx.is_closed());
                for stream in state.streams.iter().filter(|s| s.inboxes.contains(inbox_hash)) {
                    let _ = stream.tx.unbounded_send(Ok(chunk.clone()));
                }
            }
        }
        debug!(inbox = %inbox_hash, email = %id, ?tamper, announce, "email delivered");
        id
    }
}

impl std::fmt::Debug for SimServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimServer").finish_non_exhaustive()
    }
}

fn not_found(what: &str) -> TransportError {
    TransportError::Status { status: 404, body: format!("{what} not found") }
}

fn sync_hash(revision: u64) -> String {
    format!("{revision:016x}")
}

#[async_trait]
impl Transport for SimServer {
    async fn server_info(&self) -> Result<ServerInfo, TransportError> {
        self.lock().calls.server_info += 1;
        Ok(ServerInfo {
            version: PROTOCOL_VERSION,
            server_sig_pk: self.server_sig_pk().to_vec(),
            algs: Algorithms::from_suite(CipherSuite::V1),
            max_ttl: MAX_TTL,
            default_ttl: DEFAULT_TTL,
            allowed_domains: vec![SIM_DOMAIN.to_string()],
        })
    }

    async fn check_key(&self) -> Result<bool, TransportError> {
        let mut state = self.lock();
        state.calls.check_key += 1;
        Ok(state.key_accepted)
    }

    async fn create_inbox(
        &self,
        request: &CreateInboxRequest,
    ) -> Result<CreateInboxResponse, TransportError> {
        self.lock().calls.create_inbox += 1;
        if request.client_kem_pk.len() != PUBLIC_KEY_SIZE {
            return Err(TransportError::Status {
                status: 400,
                body: format!("clientKemPk must be {PUBLIC_KEY_SIZE} bytes"),
            });
        }

        let ttl = request.ttl.unwrap_or(DEFAULT_TTL).min(MAX_TTL);
        let inbox_hash = InboxHash::new(format!("{:016x}", self.inner.env.random_u64()));
        let email_address = request
            .email_address
            .clone()
            .unwrap_or_else(|| format!("{inbox_hash}@{SIM_DOMAIN}"));
        let expires_at = self.inner.env.wall_clock() + TimeDelta::seconds(ttl as i64);

        self.lock().inboxes.insert(inbox_hash.clone(), SimInbox {
            email_address: email_address.clone(),
            client_kem_pk: request.client_kem_pk.clone(),
            expires_at,
            emails: Vec::new(),
            revision: 0,
        });
        debug!(inbox = %inbox_hash, "inbox created");

        Ok(CreateInboxResponse {
            email_address,
            inbox_hash,
            expires_at,
            server_sig_pk: self.server_sig_pk().to_vec(),
        })
    }

    async fn delete_inbox(&self, inbox_hash: &InboxHash) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.delete_inbox += 1;
        state.inboxes.remove(inbox_hash).map(|_| ()).ok_or_else(|| not_found("inbox"))
    }

    async fn sync_state(&self, inbox_hash: &InboxHash) -> Result<SyncState, TransportError> {
        let now = self.inner.env.wall_clock();
        let mut state = self.lock();
        state.calls.sync_state += 1;
        if state.transient_sync_failures > 0 {
            state.transient_sync_failures -= 1;
            return Err(TransportError::Status { status: 503, body: "try again".to_string() });
        }
        let inbox = state.inboxes.get(inbox_hash).ok_or_else(|| not_found("inbox"))?;
        if inbox.expires_at <= now {
            return Err(not_found("inbox"));
        }
        Ok(SyncState::new(inbox.emails.len() as u64, sync_hash(inbox.revision)))
    }

    async fn list_emails(
        &self,
        inbox_hash: &InboxHash,
    ) -> Result<Vec<EmailRecord>, TransportError> {
        let mut state = self.lock();
        state.calls.list_emails += 1;
        let inbox = state.inboxes.get(inbox_hash).ok_or_else(|| not_found("inbox"))?;
        Ok(inbox.emails.clone())
    }

    async fn get_email(
        &self,
        inbox_hash: &InboxHash,
        email_id: &EmailId,
    ) -> Result<EmailRecord, TransportError> {
        let mut state = self.lock();
        state.calls.get_email += 1;
        let inbox = state.inboxes.get(inbox_hash).ok_or_else(|| not_found("inbox"))?;
        inbox
            .emails
            .iter()
            .find(|record| &record.id == email_id)
            .cloned()
            .ok_or_else(|| not_found("email"))
    }

    async fn mark_read(
        &self,
        inbox_hash: &InboxHash,
        email_id: &EmailId,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.mark_read += 1;
        let inbox = state.inboxes.get_mut(inbox_hash).ok_or_else(|| not_found("inbox"))?;
        let record = inbox
            .emails
            .iter_mut()
            .find(|record| &record.id == email_id)
            .ok_or_else(|| not_found("email"))?;
        record.is_read = true;
        Ok(())
    }

    async fn delete_email(
        &self,
        inbox_hash: &InboxHash,
        email_id: &EmailId,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.delete_email += 1;
        let inbox = state.inboxes.get_mut(inbox_hash).ok_or_else(|| not_found("inbox"))?;
        let before = inbox.emails.len();
        inbox.emails.retain(|record| &record.id != email_id);
        if inbox.emails.len() == before {
            return Err(not_found("email"));
        }
        inbox.revision += 1;
        Ok(())
    }

    async fn open_event_stream(&self, inboxes: &[InboxHash]) -> Result<ByteStream, TransportError> {
        let mut state = self.lock();
        state.calls.open_event_stream += 1;
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            debug!(remaining = state.refuse_connects, "refusing event stream");
            return Err(TransportError::Connection("simulated connect failure".to_string()));
        }

        let (tx, rx) = mpsc::unbounded();
        state.streams.push(EventStream { inboxes: inboxes.iter().cloned().collect(), tx });
        debug!(inboxes = inboxes.len(), "event stream opened");
        Ok(Box::pin(rx))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use sandmail_crypto::{KeyAgreementProvider, KeyPair, MlKemProvider};

    use super::*;

    async fn inbox(server: &SimServer, keypair: &KeyPair) -> InboxHash {
        let request = CreateInboxRequest {
            client_kem_pk: keypair.public_key().to_vec(),
            ttl: None,
            email_address: None,
        };
        server.create_inbox(&request).await.unwrap().inbox_hash
    }

    #[tokio::test(start_paused = true)]
    async fn delivered_email_opens_with_inbox_key() {
        let env = SimEnv::with_seed(3);
        let server = SimServer::new(env.clone());
        let keypair = KeyPair::generate(env.random_seed());
        let hash = inbox(&server, &keypair).await;

        let id = server.deliver(&hash, &SimEmail::new("Hi", "a@example.com"));
        let record = server.get_email(&hash, &id).await.unwrap();
        let envelope = record.envelope.into_envelope().unwrap();

        let plaintext = MlKemProvider
            .open_envelope(&envelope, &keypair, hash.as_str(), &server.server_sig_pk())
            .unwrap();
        let content: EmailContent = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(content.subject, "Hi");
    }

    #[tokio::test(start_paused = true)]
    async fn sync_hash_changes_on_add_and_delete() {
        let env = SimEnv::new();
        let server = SimServer::new(env.clone());
        let keypair = KeyPair::generate(env.random_seed());
        let hash = inbox(&server, &keypair).await;

        let empty = server.sync_state(&hash).await.unwrap();
        let id = server.deliver_silently(&hash, &SimEmail::new("a", "b"));
        let one = server.sync_state(&hash).await.unwrap();
        server.mark_read(&hash, &id).await.unwrap();
        let read = server.sync_state(&hash).await.unwrap();
        server.delete_email(&hash, &id).await.unwrap();
        let deleted = server.sync_state(&hash).await.unwrap();

        assert_ne!(empty.emails_hash, one.emails_hash);
        assert_eq!(one.emails_hash, read.emails_hash);
        assert_ne!(one.emails_hash, deleted.emails_hash);
        assert_eq!(deleted.email_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn streams_only_carry_their_inboxes() {
        let env = SimEnv::new();
        let server = SimServer::new(env.clone());
        let a = inbox(&server, &KeyPair::generate(env.random_seed())).await;
        let b = inbox(&server, &KeyPair::generate(env.random_seed())).await;

        let mut stream = server.open_event_stream(std::slice::from_ref(&a)).await.unwrap();
        server.deliver(&b, &SimEmail::new("to b", "x@y.z"));
        let id = server.deliver(&a, &SimEmail::new("to a", "x@y.z"));
        server.drop_streams();

        let chunk = stream.next().await.unwrap().unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(text.contains(id.as_str()));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connects_are_counted() {
        let server = SimServer::new(SimEnv::new());
        server.fail_next_connects(2);

        assert!(server.open_event_stream(&[]).await.is_err());
        assert!(server.open_event_stream(&[]).await.is_err());
        assert!(server.open_event_stream(&[]).await.is_ok());
        assert_eq!(server.calls().open_event_stream, 3);
    }
}
