//! Polling delivery strategy.
//!
//! A single timer task serves every subscription. Each tick it asks the
//! server for each subscribed inbox's sync state and only lists emails when
//! some subscriber's checkpoint has not seen that hash. Transient errors are
//! retried on the next tick; anything else ends that inbox's subscriptions
//! with [`Delivery::Failed`].

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use sandmail_core::{
    Delivery, DeliveryEvent, Environment, PollCheckpoint, StrategyKind, SubscriptionId,
    SubscriptionRegistry,
};
use sandmail_proto::{EmailId, InboxHash};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::DeliveryStrategy;
use crate::{
    error::TransportError,
    subscription::{self, Subscriber, Subscription},
    transport::Transport,
};

struct PollSubscriber {
    subscriber: Subscriber,
    checkpoint: PollCheckpoint,
}

struct State {
    registry: SubscriptionRegistry<PollSubscriber>,
    driver_running: bool,
}

struct Shared {
    transport: Arc<dyn Transport>,
    env: Arc<dyn Environment>,
    interval: Duration,
    state: Mutex<State>,
    /// Cuts the current sleep short so a new subscriber is polled at once
    wake: Notify,
    shutdown: CancellationToken,
}

/// Pull delivery driven by the server's sync hash.
#[derive(Clone)]
pub struct PollingStrategy {
    shared: Arc<Shared>,
}

impl PollingStrategy {
    /// Create an idle strategy polling every `interval` once subscribed.
    pub fn new(
        interval: Duration,
        transport: Arc<dyn Transport>,
        env: Arc<dyn Environment>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                env,
                interval,
                state: Mutex::new(State {
                    registry: SubscriptionRegistry::new(),
                    driver_running: false,
                }),
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Subscribe with a checkpoint that already knows `seen`.
    ///
    /// The first poll reports every listed email not in `seen` instead of
    /// recording a silent baseline.
    pub fn subscribe_seeded(
        &self,
        inbox_hash: InboxHash,
        seen: impl IntoIterator<Item = EmailId>,
    ) -> Subscription {
        self.register(inbox_hash, PollCheckpoint::seeded(seen))
    }

    /// Ids currently listed for `inbox_hash`.
    pub async fn snapshot(&self, inbox_hash: &InboxHash) -> Result<Vec<EmailId>, TransportError> {
        let records = self.shared.transport.list_emails(inbox_hash).await?;
        Ok(records.into_iter().map(|record| record.id).collect())
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.shared.lock().registry.len()
    }

    fn register(&self, inbox_hash: InboxHash, checkpoint: PollCheckpoint) -> Subscription {
        let (subscriber, pending) = subscription::channel(&self.shared.shutdown);
        let token = subscriber.token();

        let mut state = self.shared.lock();
        let registered =
            state.registry.register(inbox_hash.clone(), PollSubscriber { subscriber, checkpoint });
        if state.driver_running {
            self.shared.wake.notify_one();
        } else {
            state.driver_running = true;
            tokio::spawn(drive(Arc::clone(&self.shared)));
        }
        drop(state);

        debug!(inbox = %inbox_hash, id = %registered.id, "polling subscribe");
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(watch_cancel(weak, registered.id, token));

        pending.into_subscription(registered.id, inbox_hash)
    }
}

impl DeliveryStrategy for PollingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Polling
    }

    fn subscribe(&self, inbox_hash: InboxHash) -> Subscription {
        self.register(inbox_hash, PollCheckpoint::fresh())
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.shared.remove(id);
    }

    fn dispose(&self) {
        self.shared.shutdown.cancel();
        let mut state = self.shared.lock();
        state.registry.drain();
        state.driver_running = false;
    }
}

async fn watch_cancel(shared: Weak<Shared>, id: SubscriptionId, token: CancellationToken) {
    token.cancelled().await;
    if let Some(shared) = shared.upgrade() {
        shared.remove(id);
    }
}

async fn drive(shared: Arc<Shared>) {
    loop {
        let inboxes = {
            let mut state = shared.lock();
            if state.registry.is_empty() || shared.shutdown.is_cancelled() {
                state.driver_running = false;
                debug!("polling stopped, no subscribers");
                return;
            }
            state.registry.inbox_hashes()
        };

        for inbox_hash in &inboxes {
            tokio::select! {
                () = shared.shutdown.cancelled() => return,
                () = shared.poll_inbox(inbox_hash) => {},
            }
        }

        let sleep = shared.env.sleep(shared.interval);
        tokio::select! {
            () = shared.shutdown.cancelled() => return,
            () = shared.wake.notified() => trace!("polling woken early"),
            () = sleep => {},
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: SubscriptionId) {
        let removed = self.lock().registry.unregister(id);
        if let Some(removed) = removed {
            removed.payload.subscriber.cancel();
            debug!(inbox = %removed.inbox_hash, %id, "polling unsubscribe");
        }
    }

    async fn poll_inbox(&self, inbox_hash: &InboxHash) {
        let sync = match self.transport.sync_state(inbox_hash).await {
            Ok(sync) => sync,
            Err(err) => return self.on_error(inbox_hash, &err),
        };

        let needs_listing = self
            .lock()
            .registry
            .subscribers(inbox_hash)
            .filter(|(_, sub)| !sub.subscriber.is_cancelled())
            .any(|(_, sub)| sub.checkpoint.needs_listing(&sync));
        if !needs_listing {
            trace!(inbox = %inbox_hash, "sync hash unchanged");
            return;
        }

        let listed: Vec<EmailId> = match self.transport.list_emails(inbox_hash).await {
            Ok(records) => records.into_iter().map(|record| record.id).collect(),
            Err(err) => return self.on_error(inbox_hash, &err),
        };

        let timestamp = self.env.wall_clock();
        let mut state = self.lock();
        let ids: Vec<SubscriptionId> =
            state.registry.subscribers(inbox_hash).map(|(id, _)| id).collect();

        for id in ids {
            let Some(sub) = state.registry.get_mut(id) else {
                continue;
            };
            let new_ids = sub.checkpoint.observe(&sync.emails_hash, &listed);
            if new_ids.is_empty() {
                continue;
            }
            debug!(inbox = %inbox_hash, %id, count = new_ids.len(), "new emails");
            sub.subscriber.deliver(Delivery::Event(DeliveryEvent {
                inbox_hash: inbox_hash.clone(),
                email_ids: new_ids,
                timestamp,
            }));
        }
    }

    fn on_error(&self, inbox_hash: &InboxHash, err: &TransportError) {
        if err.is_transient() {
            warn!(inbox = %inbox_hash, %err, "poll failed, retrying next tick");
            return;
        }

        warn!(inbox = %inbox_hash, %err, "poll failed permanently");
        let mut state = self.lock();
        let ids: Vec<SubscriptionId> =
            state.registry.subscribers(inbox_hash).map(|(id, _)| id).collect();
        for id in ids {
            if let Some(removed) = state.registry.unregister(id) {
                removed.payload.subscriber.deliver(Delivery::Failed {
                    inbox_hash: inbox_hash.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }
}
