//! Subscription handles.
//!
//! A [`Subscription`] is the caller's end of one logical subscription: a
//! stream of [`Delivery`] items plus a cancellation token. The strategy keeps
//! the matching [`Subscriber`] in its registry.
//!
//! # Cancellation
//!
//! `cancel()` never blocks and never fails. Once the token is cancelled the
//! stream yields `None`, even if items were already buffered, so an event
//! racing a cancellation is dropped rather than delivered. Dropping the
//! handle cancels it.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use sandmail_core::{Delivery, SubscriptionId};
use sandmail_proto::InboxHash;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};

/// Strategy-side end of a subscription.
#[derive(Debug)]
pub(crate) struct Subscriber {
    tx: mpsc::UnboundedSender<Delivery>,
    token: CancellationToken,
}

impl Subscriber {
    /// Push a delivery. Returns `false` once the subscription is gone.
    pub(crate) fn deliver(&self, delivery: Delivery) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.tx.send(delivery).is_ok()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }

    pub(crate) fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Receiving half before it has been assigned an id.
pub(crate) struct PendingSubscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
    token: CancellationToken,
}

impl PendingSubscription {
    pub(crate) fn into_subscription(
        self,
        id: SubscriptionId,
        inbox_hash: InboxHash,
    ) -> Subscription {
        let guard = self.token.clone().drop_guard();
        Subscription { id, inbox_hash, rx: self.rx, token: self.token, _guard: guard }
    }
}

/// Create both ends of a subscription.
///
/// The token is a child of `parent`, so disposing the strategy cancels
/// every subscription it handed out.
pub(crate) fn channel(parent: &CancellationToken) -> (Subscriber, PendingSubscription) {
    let (tx, rx) = mpsc::unbounded_channel();
    let token = parent.child_token();
    (Subscriber { tx, token: token.clone() }, PendingSubscription { rx, token })
}

/// Cancellable stream of deliveries for one inbox.
///
/// Ends after a [`Delivery::Failed`], on cancellation, or when the strategy
/// is disposed.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    inbox_hash: InboxHash,
    rx: mpsc::UnboundedReceiver<Delivery>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl Subscription {
    /// Subscription that has already failed.
    pub(crate) fn failed(
        id: SubscriptionId,
        inbox_hash: InboxHash,
        reason: String,
        parent: &CancellationToken,
    ) -> Self {
        let (subscriber, pending) = channel(parent);
        subscriber.deliver(Delivery::Failed { inbox_hash: inbox_hash.clone(), reason });
        pending.into_subscription(id, inbox_hash)
    }

    /// Subscription that yields nothing. Id 0 is never handed out by a
    /// registry, so unsubscribing it is a no-op.
    pub(crate) fn ended(inbox_hash: InboxHash) -> Self {
        let parent = CancellationToken::new();
        parent.cancel();
        let (_, pending) = channel(&parent);
        pending.into_subscription(SubscriptionId(0), inbox_hash)
    }

    /// Handle identifying this subscription to its strategy.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Inbox this subscription watches.
    pub fn inbox_hash(&self) -> &InboxHash {
        &self.inbox_hash
    }

    /// Stop delivery. Idempotent and non-blocking.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether [`Subscription::cancel`] was called or the strategy disposed.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Next delivery, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Delivery> {
        if self.token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            () = self.token.cancelled() => None,
            delivery = self.rx.recv() => delivery,
        }
    }
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.token.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use futures::StreamExt;
    use sandmail_core::DeliveryEvent;
    use sandmail_proto::EmailId;

    use super::*;

    fn event(id: &str) -> Delivery {
        Delivery::Event(DeliveryEvent {
            inbox_hash: InboxHash::new("A"),
            email_ids: vec![EmailId::new(id)],
            timestamp: DateTime::UNIX_EPOCH,
        })
    }

    fn pair() -> (Subscriber, Subscription) {
        let (subscriber, pending) = channel(&CancellationToken::new());
        (subscriber, pending.into_subscription(SubscriptionId(1), InboxHash::new("A")))
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let (subscriber, mut subscription) = pair();
        assert!(subscriber.deliver(event("1")));
        assert!(subscriber.deliver(event("2")));
        drop(subscriber);

        assert_eq!(subscription.next().await, Some(event("1")));
        assert_eq!(subscription.recv().await, Some(event("2")));
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test]
    async fn buffered_items_dropped_on_cancel() {
        let (subscriber, mut subscription) = pair();
        subscriber.deliver(event("1"));

        subscription.cancel();
        assert_eq!(subscription.next().await, None);
        assert!(!subscriber.deliver(event("2")));
    }

    #[tokio::test]
    async fn drop_cancels_subscriber_side() {
        let (subscriber, subscription) = pair();
        drop(subscription);

        assert!(subscriber.is_cancelled());
        subscriber.cancelled().await;
    }

    #[tokio::test]
    async fn parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let (subscriber, pending) = channel(&parent);
        let mut subscription = pending.into_subscription(SubscriptionId(2), InboxHash::new("B"));

        parent.cancel();
        assert!(subscriber.is_cancelled());
        assert_eq!(subscription.recv().await, None);
    }

    #[tokio::test]
    async fn failed_subscription_yields_failure_then_ends() {
        let mut subscription = Subscription::failed(
            SubscriptionId(3),
            InboxHash::new("C"),
            "stream failed".to_string(),
            &CancellationToken::new(),
        );

        assert!(matches!(subscription.next().await, Some(Delivery::Failed { .. })));
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test]
    async fn ended_subscription_yields_nothing() {
        let mut subscription = Subscription::ended(InboxHash::new("D"));
        assert!(subscription.is_cancelled());
        assert_eq!(subscription.recv().await, None);
    }
}
