//! Cross-inbox aggregation.
//!
//! [`InboxMonitor`] merges one subscription per inbox into a single
//! sequence. Each item produced by a strategy is yielded once, per-inbox
//! order is preserved, and across inboxes items come in arrival order.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use futures::{StreamExt, stream::SelectAll};
use sandmail_core::{Delivery, Environment};
use sandmail_proto::{DecryptedEmail, EmailId, InboxHash};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{ClientError, Result},
    inbox::Inbox,
    subscription::Subscription,
};

struct State {
    merged: SelectAll<Subscription>,
    /// Ids announced but not yet returned by `next_email`
    pending: VecDeque<(InboxHash, EmailId)>,
}

/// Waits for new mail across several inboxes.
///
/// Owns exactly one subscription per watched inbox; disposing the monitor
/// cancels those and nothing else. Disposing a watched inbox ends its
/// subscription and the monitor carries on with the rest.
pub struct InboxMonitor {
    inboxes: BTreeMap<InboxHash, Inbox>,
    state: Mutex<State>,
    tokens: Vec<CancellationToken>,
    env: Arc<dyn Environment>,
    default_wait: Duration,
    disposed: CancellationToken,
}

impl InboxMonitor {
    pub(crate) fn new(
        inboxes: &[Inbox],
        env: Arc<dyn Environment>,
        default_wait: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let mut by_hash = BTreeMap::new();
        let mut merged = SelectAll::new();
        let mut tokens = Vec::new();

        for inbox in inboxes {
            if by_hash.contains_key(inbox.inbox_hash()) {
                continue;
            }
            let subscription = inbox.subscribe();
            tokens.push(subscription.token());
            merged.push(subscription);
            by_hash.insert(inbox.inbox_hash().clone(), inbox.clone());
        }
        debug!(inboxes = by_hash.len(), "monitor started");

        Self {
            inboxes: by_hash,
            state: Mutex::new(State { merged, pending: VecDeque::new() }),
            tokens,
            env,
            default_wait,
            disposed: parent.child_token(),
        }
    }

    /// Watched inboxes, sorted.
    pub fn inbox_hashes(&self) -> Vec<InboxHash> {
        self.inboxes.keys().cloned().collect()
    }

    /// Next delivery from any watched inbox.
    ///
    /// [`Delivery::Failed`] is returned like any other item; the monitor
    /// keeps serving the remaining inboxes.
    ///
    /// # Errors
    ///
    /// - `ClientError::Timeout` if nothing arrived in time
    /// - `ClientError::Disposed` after disposal or once every subscription
    ///   has ended
    pub async fn next(&self, timeout: Option<Duration>) -> Result<Delivery> {
        let timeout = timeout.unwrap_or(self.default_wait);
        let mut state = self.state.lock().await;
        self.bounded(timeout, next_delivery(&mut state.merged)).await
    }

    /// Next new email from any watched inbox, fetched and decrypted.
    ///
    /// Emails that fail verification are skipped with a warning.
    ///
    /// # Errors
    ///
    /// - `ClientError::DeliveryFailed` if a watched inbox's delivery failed
    /// - `ClientError::Transport` if fetching the email failed
    /// - otherwise as [`InboxMonitor::next`]
    pub async fn next_email(
        &self,
        timeout: Option<Duration>,
    ) -> Result<(InboxHash, DecryptedEmail)> {
        let timeout = timeout.unwrap_or(self.default_wait);
        let mut state = self.state.lock().await;

        self.bounded(timeout, async {
            loop {
                if let Some((inbox_hash, email_id)) = state.pending.front().cloned() {
                    let Some(inbox) = self.inboxes.get(&inbox_hash) else {
                        state.pending.pop_front();
                        continue;
                    };
                    if inbox.is_disposed() {
                        debug!(inbox = %inbox_hash, email = %email_id, "inbox disposed, dropping");
                        state.pending.pop_front();
                        continue;
                    }
                    let fetched = inbox.get_email(&email_id).await;
                    state.pending.pop_front();
                    match fetched {
                        Ok(email) => return Ok((inbox_hash, email)),
                        Err(err @ (ClientError::Crypto(_) | ClientError::Protocol(_))) => {
                            warn!(inbox = %inbox_hash, email = %email_id, %err, "skipping email");
                        },
                        Err(ClientError::Disposed) if inbox.is_disposed() => {
                            debug!(inbox = %inbox_hash, "inbox disposed during fetch");
                        },
                        Err(err) => return Err(err),
                    }
                    continue;
                }

                match next_delivery(&mut state.merged).await? {
                    Delivery::Event(event) => {
                        let inbox_hash = event.inbox_hash;
                        state.pending.extend(
                            event.email_ids.into_iter().map(|id| (inbox_hash.clone(), id)),
                        );
                    },
                    Delivery::Failed { inbox_hash, reason } => {
                        return Err(ClientError::DeliveryFailed { inbox_hash, reason });
                    },
                }
            }
        })
        .await
    }

    /// Cancel the monitor's subscriptions. The inboxes stay usable.
    pub fn dispose(&self) {
        self.disposed.cancel();
        for token in &self.tokens {
            token.cancel();
        }
    }

    async fn bounded<T>(
        &self,
        timeout: Duration,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            () = self.disposed.cancelled() => Err(ClientError::Disposed),
            () = self.env.sleep(timeout) => Err(ClientError::Timeout(timeout)),
            result = work => result,
        }
    }
}

impl Drop for InboxMonitor {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for InboxMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboxMonitor")
            .field("inboxes", &self.inboxes.keys())
            .finish_non_exhaustive()
    }
}

async fn next_delivery(merged: &mut SelectAll<Subscription>) -> Result<Delivery> {
    merged.next().await.ok_or(ClientError::Disposed)
}
