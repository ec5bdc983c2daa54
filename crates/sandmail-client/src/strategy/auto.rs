//! Stream-first delivery with a polling fallback.
//!
//! Each Auto subscription is backed by one inner subscription, first on the
//! event stream and, once the stream has failed, on polling. A forwarding
//! task sits between the two and hides the switch: the inner
//! [`Delivery::Failed`] from the stream never reaches the caller, and the
//! polling checkpoint is seeded so nothing already reported is reported
//! again.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use sandmail_core::{Delivery, StrategyKind, SubscriptionId, SubscriptionRegistry};
use sandmail_proto::{EmailId, InboxHash};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DeliveryStrategy, PollingStrategy, SseStrategy};
use crate::subscription::{self, Subscriber, Subscription};

struct Shared {
    sse: SseStrategy,
    polling: PollingStrategy,
    registry: Mutex<SubscriptionRegistry<CancellationToken>>,
    shutdown: CancellationToken,
}

/// Decorator over [`SseStrategy`] and [`PollingStrategy`].
#[derive(Clone)]
pub struct AutoStrategy {
    shared: Arc<Shared>,
}

impl AutoStrategy {
    /// Compose the two strategies. Both are owned and disposed with this one.
    pub fn new(sse: SseStrategy, polling: PollingStrategy) -> Self {
        Self {
            shared: Arc::new(Shared {
                sse,
                polling,
                registry: Mutex::new(SubscriptionRegistry::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// The stream half.
    pub fn sse(&self) -> &SseStrategy {
        &self.shared.sse
    }

    /// The polling half.
    pub fn polling(&self) -> &PollingStrategy {
        &self.shared.polling
    }
}

impl DeliveryStrategy for AutoStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Auto
    }

    fn subscribe(&self, inbox_hash: InboxHash) -> Subscription {
        let (subscriber, pending) = subscription::channel(&self.shared.shutdown);
        let registered = self.shared.lock().register(inbox_hash.clone(), subscriber.token());

        let (inner, on_stream) = if self.shared.sse.is_failed() {
            debug!(inbox = %inbox_hash, "event stream already failed, polling directly");
            (self.shared.polling.subscribe(inbox_hash.clone()), false)
        } else {
            (self.shared.sse.subscribe(inbox_hash.clone()), true)
        };

        tokio::spawn(forward(
            Arc::clone(&self.shared),
            registered.id,
            inner,
            subscriber,
            on_stream,
        ));
        pending.into_subscription(registered.id, inbox_hash)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(removed) = self.shared.lock().unregister(id) {
            removed.payload.cancel();
        }
    }

    fn dispose(&self) {
        self.shared.shutdown.cancel();
        self.shared.lock().drain();
        self.shared.sse.dispose();
        self.shared.polling.dispose();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SubscriptionRegistry<CancellationToken>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pump one inner subscription into the caller's, switching to polling when
/// the stream fails.
async fn forward(
    shared: Arc<Shared>,
    id: SubscriptionId,
    mut inner: Subscription,
    subscriber: Subscriber,
    mut on_stream: bool,
) {
    let inbox_hash = inner.inbox_hash().clone();
    let mut known: HashSet<EmailId> = HashSet::new();

    // Best effort: without it the hand-off would report mail that was
    // already in the inbox when the subscription started.
    if on_stream {
        tokio::select! {
            () = subscriber.cancelled() => {},
            listed = shared.polling.snapshot(&inbox_hash) => match listed {
                Ok(ids) => known.extend(ids),
                Err(err) => debug!(inbox = %inbox_hash, %err, "no baseline for hand-off"),
            },
        }
    }

    loop {
        let next = tokio::select! {
            biased;
            () = subscriber.cancelled() => break,
            next = inner.recv() => next,
        };

        match next {
            Some(Delivery::Event(event)) => {
                if on_stream {
                    known.extend(event.email_ids.iter().cloned());
                }
                if !subscriber.deliver(Delivery::Event(event)) {
                    break;
                }
            },
            Some(Delivery::Failed { reason, .. }) if on_stream => {
                info!(inbox = %inbox_hash, %reason, "event stream failed, switching to polling");
                inner = shared.polling.subscribe_seeded(inbox_hash.clone(), known.drain());
                on_stream = false;
            },
            Some(failed @ Delivery::Failed { .. }) => {
                warn!(inbox = %inbox_hash, "polling failed");
                subscriber.deliver(failed);
                break;
            },
            None => break,
        }
    }

    inner.cancel();
    if let Some(removed) = shared.lock().unregister(id) {
        removed.payload.cancel();
    }
}
