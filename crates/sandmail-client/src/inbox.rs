//! A live inbox.
//!
//! [`Inbox`] binds an identity and its keypair to the transport and the
//! client's delivery strategy. Every email is verified against the server
//! key pinned at creation before it is decrypted; verification failures
//! withhold the item and never fail a whole listing.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use sandmail_core::{Delivery, DeliveryEvent, Environment};
use sandmail_crypto::{KeyAgreementProvider, KeyPair};
use sandmail_proto::{
    DecryptedEmail, EmailContent, EmailId, EmailRecord, InboxExport, InboxHash, InboxIdentity,
    SyncState, decode_json,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{ClientError, Result},
    filter::{EmailBatch, EmailFilter, WithheldEmail, WithheldReason},
    strategy::DeliveryStrategy,
    subscription::Subscription,
    transport::Transport,
};

/// Handle to one inbox. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Inbox {
    inner: Arc<Inner>,
}

struct Inner {
    identity: InboxIdentity,
    keypair: Arc<KeyPair>,
    provider: Arc<dyn KeyAgreementProvider>,
    transport: Arc<dyn Transport>,
    env: Arc<dyn Environment>,
    strategy: Arc<dyn DeliveryStrategy>,
    default_wait: Duration,
    events: Mutex<Option<Subscription>>,
    disposed: CancellationToken,
}

/// Collaborators an inbox is bound to.
pub(crate) struct InboxParts {
    pub provider: Arc<dyn KeyAgreementProvider>,
    pub transport: Arc<dyn Transport>,
    pub env: Arc<dyn Environment>,
    pub strategy: Arc<dyn DeliveryStrategy>,
    pub default_wait: Duration,
    pub parent: CancellationToken,
}

impl Inbox {
    pub(crate) fn new(identity: InboxIdentity, keypair: KeyPair, parts: InboxParts) -> Self {
        Self {
            inner: Arc::new(Inner {
                identity,
                keypair: Arc::new(keypair),
                provider: parts.provider,
                transport: parts.transport,
                env: parts.env,
                strategy: parts.strategy,
                default_wait: parts.default_wait,
                events: Mutex::new(None),
                disposed: parts.parent.child_token(),
            }),
        }
    }

    /// Address mail is accepted at.
    pub fn email_address(&self) -> &str {
        &self.inner.identity.email_address
    }

    /// Server-side identifier.
    pub fn inbox_hash(&self) -> &InboxHash {
        &self.inner.identity.inbox_hash
    }

    /// When the server discards the inbox.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.inner.identity.expires_at
    }

    /// Server signing key pinned at creation or import.
    pub fn server_sig_pk(&self) -> &[u8] {
        &self.inner.identity.server_sig_pk
    }

    /// Whether [`Inbox::dispose`] was called on this inbox or its client.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.is_cancelled()
    }

    /// Fetch and decrypt every email.
    ///
    /// # Errors
    ///
    /// - `ClientError::Transport` if the listing fails
    /// - `ClientError::Disposed` after disposal
    pub async fn list_emails(&self) -> Result<EmailBatch> {
        self.ensure_live()?;
        let records = self.inner.transport.list_emails(self.inbox_hash()).await?;
        let opener = self.opener();
        let batch = offload(move || {
            let mut batch = EmailBatch::default();
            for record in records {
                match opener.open(&record) {
                    Ok(email) => batch.emails.push(email),
                    Err(reason) => {
                        warn!(email = %record.id, %reason, "withholding email");
                        batch.withheld.push(WithheldEmail { id: record.id, reason });
                    },
                }
            }
            batch
        })
        .await?;
        Ok(batch)
    }

    /// Fetch and decrypt one email.
    ///
    /// # Errors
    ///
    /// - `ClientError::Crypto` if the envelope fails verification
    /// - `ClientError::Protocol` if the envelope or body cannot be decoded
    /// - `ClientError::Transport` if the fetch fails
    pub async fn get_email(&self, email_id: &EmailId) -> Result<DecryptedEmail> {
        self.ensure_live()?;
        let record = self.inner.transport.get_email(self.inbox_hash(), email_id).await?;
        let opener = self.opener();
        match offload(move || opener.open(&record)).await? {
            Ok(email) => Ok(email),
            Err(WithheldReason::Crypto(err)) => Err(err.into()),
            Err(WithheldReason::Protocol(err)) => Err(err.into()),
        }
    }

    /// Wait for an email matching `filter`.
    ///
    /// Existing emails are checked first. Emails that fail verification are
    /// skipped. `timeout` defaults to the client's `default_wait_timeout`.
    ///
    /// # Errors
    ///
    /// - `ClientError::Timeout` if nothing matched in time
    /// - `ClientError::DeliveryFailed` if the delivery strategy gave up
    /// - `ClientError::Disposed` if the inbox was disposed while waiting
    pub async fn wait_for_email(
        &self,
        filter: &EmailFilter,
        timeout: Option<Duration>,
    ) -> Result<DecryptedEmail> {
        self.ensure_live()?;
        let timeout = timeout.unwrap_or(self.inner.default_wait);
        let mut subscription = self.subscribe();

        self.bounded(timeout, async {
            let batch = self.list_emails().await?;
            if let Some(email) = batch.emails.into_iter().find(|e| filter.matches(e)) {
                return Ok(email);
            }

            loop {
                let event = next_delivery(&mut subscription).await?;
                for id in &event.email_ids {
                    match self.get_email(id).await {
                        Ok(email) if filter.matches(&email) => return Ok(email),
                        Ok(_) => {},
                        Err(err @ (ClientError::Crypto(_) | ClientError::Protocol(_))) => {
                            warn!(email = %id, %err, "skipping email that failed verification");
                        },
                        Err(err) => return Err(err),
                    }
                }
            }
        })
        .await
    }

    /// Wait until the inbox holds at least `count` readable emails.
    ///
    /// # Errors
    ///
    /// Same as [`Inbox::wait_for_email`].
    pub async fn wait_for_email_count(
        &self,
        count: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<DecryptedEmail>> {
        self.ensure_live()?;
        let timeout = timeout.unwrap_or(self.inner.default_wait);
        let mut subscription = self.subscribe();

        self.bounded(timeout, async {
            loop {
                let batch = self.list_emails().await?;
                if batch.emails.len() >= count {
                    return Ok(batch.emails);
                }
                debug!(have = batch.emails.len(), want = count, "waiting for more emails");
                next_delivery(&mut subscription).await?;
            }
        })
        .await
    }

    /// Next new-email notification for this inbox.
    ///
    /// Notifications are collected from the first call on, so consecutive
    /// calls never miss one in between.
    ///
    /// # Errors
    ///
    /// - `ClientError::Timeout`, `ClientError::DeliveryFailed`,
    ///   `ClientError::Disposed` as for [`Inbox::wait_for_email`]
    pub async fn next_event(&self, timeout: Option<Duration>) -> Result<DeliveryEvent> {
        self.ensure_live()?;
        let timeout = timeout.unwrap_or(self.inner.default_wait);
        let mut events = self.inner.events.lock().await;
        let subscription = events.get_or_insert_with(|| self.subscribe());

        let result = self.bounded(timeout, next_delivery(subscription)).await;
        if matches!(result, Err(ClientError::DeliveryFailed { .. } | ClientError::Disposed)) {
            *events = None;
        }
        result
    }

    /// Raw delivery subscription for this inbox.
    ///
    /// The subscription ends when the inbox is disposed, and is already
    /// ended if it was disposed before.
    pub fn subscribe(&self) -> Subscription {
        if self.is_disposed() {
            return Subscription::ended(self.inbox_hash().clone());
        }
        let subscription = self.inner.strategy.subscribe(self.inbox_hash().clone());

        let token = subscription.token();
        let disposed = self.inner.disposed.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = disposed.cancelled() => token.cancel(),
                () = token.cancelled() => {},
            }
        });
        subscription
    }

    /// Mark an email as read.
    ///
    /// # Errors
    ///
    /// - `ClientError::Transport` if the server rejects it
    pub async fn mark_read(&self, email_id: &EmailId) -> Result<()> {
        self.ensure_live()?;
        Ok(self.inner.transport.mark_read(self.inbox_hash(), email_id).await?)
    }

    /// Delete one email.
    ///
    /// # Errors
    ///
    /// - `ClientError::Transport` if the server rejects it
    pub async fn delete_email(&self, email_id: &EmailId) -> Result<()> {
        self.ensure_live()?;
        Ok(self.inner.transport.delete_email(self.inbox_hash(), email_id).await?)
    }

    /// Server's current change token.
    ///
    /// # Errors
    ///
    /// - `ClientError::Transport` if the request fails
    pub async fn sync_state(&self) -> Result<SyncState> {
        self.ensure_live()?;
        Ok(self.inner.transport.sync_state(self.inbox_hash()).await?)
    }

    /// Snapshot identity and secret key for later import.
    pub fn export(&self) -> InboxExport {
        InboxExport::new(&self.inner.identity, &self.inner.keypair, self.inner.env.wall_clock())
    }

    /// Delete the inbox on the server, then dispose this handle.
    ///
    /// # Errors
    ///
    /// - `ClientError::Transport` if the server rejects it; the handle
    ///   stays usable in that case
    pub async fn delete(&self) -> Result<()> {
        self.ensure_live()?;
        self.inner.transport.delete_inbox(self.inbox_hash()).await?;
        debug!(inbox = %self.inbox_hash(), "inbox deleted");
        self.dispose();
        Ok(())
    }

    /// Stop every wait on this inbox and end every subscription made
    /// through it, including those held by monitors. Idempotent.
    pub fn dispose(&self) {
        self.inner.disposed.cancel();
        if let Ok(mut events) = self.inner.events.try_lock()
            && let Some(subscription) = events.take()
        {
            subscription.cancel();
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() { Err(ClientError::Disposed) } else { Ok(()) }
    }

    fn opener(&self) -> Opener {
        Opener {
            provider: Arc::clone(&self.inner.provider),
            keypair: Arc::clone(&self.inner.keypair),
            inbox_hash: self.inbox_hash().clone(),
            server_sig_pk: self.inner.identity.server_sig_pk.clone(),
        }
    }

    /// Run `work` until it finishes, `timeout` elapses or the inbox is
    /// disposed.
    async fn bounded<T>(
        &self,
        timeout: Duration,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            () = self.inner.disposed.cancelled() => Err(ClientError::Disposed),
            () = self.inner.env.sleep(timeout) => Err(ClientError::Timeout(timeout)),
            result = work => result,
        }
    }
}

impl std::fmt::Debug for Inbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbox")
            .field("email_address", &self.inner.identity.email_address)
            .field("inbox_hash", &self.inner.identity.inbox_hash)
            .field("expires_at", &self.inner.identity.expires_at)
            .finish_non_exhaustive()
    }
}

/// Everything needed to verify and decrypt off the async runtime.
struct Opener {
    provider: Arc<dyn KeyAgreementProvider>,
    keypair: Arc<KeyPair>,
    inbox_hash: InboxHash,
    server_sig_pk: Vec<u8>,
}

impl Opener {
    fn open(&self, record: &EmailRecord) -> std::result::Result<DecryptedEmail, WithheldReason> {
        let envelope = record.envelope.clone().into_envelope()?;
        let plaintext = self.provider.open_envelope(
            &envelope,
            &self.keypair,
            self.inbox_hash.as_str(),
            &self.server_sig_pk,
        )?;
        let content: EmailContent = decode_json(&plaintext)?;
        Ok(DecryptedEmail::from_parts(record, content))
    }
}

/// Decryption is CPU-bound; keep it off the event-dispatch path.
async fn offload<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(value) => Ok(value),
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(ClientError::Disposed),
    }
}

async fn next_delivery(subscription: &mut Subscription) -> Result<DeliveryEvent> {
    match subscription.recv().await {
        Some(Delivery::Event(event)) => Ok(event),
        Some(Delivery::Failed { inbox_hash, reason }) => {
            Err(ClientError::DeliveryFailed { inbox_hash, reason })
        },
        None => Err(ClientError::Disposed),
    }
}
