//! Subscription registry for shared-transport multiplexing.
//!
//! The registry maintains bidirectional mappings: inbox → subscriptions (for
//! fan-out) and subscription → inbox (for cleanup on cancel). Many logical
//! subscriptions share one physical stream or timer; the registry tells the
//! driver when the first subscriber for an inbox arrives and when the last
//! one leaves, which is when the physical side must change.
//!
//! Not synchronized itself. Drivers wrap it in a mutex and never hold the
//! guard across an await point.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use sandmail_proto::InboxHash;

use crate::event::SubscriptionId;

/// Result of registering a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registered {
    /// Handle for the new subscription
    pub id: SubscriptionId,
    /// No other subscription existed for this inbox
    pub first_for_inbox: bool,
}

/// Result of removing a subscription.
#[derive(Debug)]
pub struct Unregistered<S> {
    /// Inbox the subscription was for
    pub inbox_hash: InboxHash,
    /// Per-subscription payload
    pub payload: S,
    /// No subscription remains for this inbox
    pub last_for_inbox: bool,
}

/// Registry of subscriptions keyed by inbox hash.
///
/// `S` is the per-subscription payload (typically the sender half of the
/// subscriber's channel plus any per-subscription state).
#[derive(Debug)]
pub struct SubscriptionRegistry<S> {
    /// Subscription ID → (inbox, payload)
    subscriptions: HashMap<SubscriptionId, (InboxHash, S)>,
    /// Inbox → subscription IDs. Ordered so the stream's inbox list is stable.
    by_inbox: BTreeMap<InboxHash, BTreeSet<SubscriptionId>>,
    next_id: u64,
}

impl<S> Default for SubscriptionRegistry<S> {
    fn default() -> Self {
        Self { subscriptions: HashMap::new(), by_inbox: BTreeMap::new(), next_id: 1 }
    }
}

impl<S> SubscriptionRegistry<S> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id without registering anything under it.
    ///
    /// Used for handles that are born terminal and never need fan-out.
    pub fn reserve_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Add a subscription for `inbox_hash`.
    pub fn register(&mut self, inbox_hash: InboxHash, payload: S) -> Registered {
        let id = self.reserve_id();

        let subscribers = self.by_inbox.entry(inbox_hash.clone()).or_default();
        let first_for_inbox = subscribers.is_empty();
        subscribers.insert(id);
        self.subscriptions.insert(id, (inbox_hash, payload));

        Registered { id, first_for_inbox }
    }

    /// Remove a subscription.
    ///
    /// Returns `None` if it was already removed, which makes cancellation
    /// idempotent.
    pub fn unregister(&mut self, id: SubscriptionId) -> Option<Unregistered<S>> {
        let (inbox_hash, payload) = self.subscriptions.remove(&id)?;

        let last_for_inbox = match self.by_inbox.get_mut(&inbox_hash) {
            Some(subscribers) => {
                subscribers.remove(&id);
                subscribers.is_empty()
            },
            None => true,
        };
        if last_for_inbox {
            self.by_inbox.remove(&inbox_hash);
        }

        Some(Unregistered { inbox_hash, payload, last_for_inbox })
    }

    /// Check if a subscription is registered.
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    /// Payload of a subscription.
    pub fn get(&self, id: SubscriptionId) -> Option<&S> {
        self.subscriptions.get(&id).map(|(_, payload)| payload)
    }

    /// Mutable payload of a subscription.
    pub fn get_mut(&mut self, id: SubscriptionId) -> Option<&mut S> {
        self.subscriptions.get_mut(&id).map(|(_, payload)| payload)
    }

    /// Inbox a subscription is for.
    pub fn inbox_of(&self, id: SubscriptionId) -> Option<&InboxHash> {
        self.subscriptions.get(&id).map(|(inbox, _)| inbox)
    }

    /// All subscriptions for an inbox, in registration order.
    pub fn subscribers(&self, inbox_hash: &InboxHash) -> impl Iterator<Item = (SubscriptionId, &S)> {
        self.by_inbox.get(inbox_hash).into_iter().flatten().filter_map(|id| {
            self.subscriptions.get(id).map(|(_, payload)| (*id, payload))
        })
    }

    /// All subscriptions with their inbox and payload.
    pub fn iter(&self) -> impl Iterator<Item = (SubscriptionId, &InboxHash, &S)> {
        self.subscriptions.iter().map(|(id, (inbox, payload))| (*id, inbox, payload))
    }

    /// Mutable iteration over all subscriptions.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SubscriptionId, &InboxHash, &mut S)> {
        self.subscriptions.iter_mut().map(|(id, (inbox, payload))| (*id, &*inbox, payload))
    }

    /// Distinct subscribed inbox hashes, sorted.
    pub fn inbox_hashes(&self) -> Vec<InboxHash> {
        self.by_inbox.keys().cloned().collect()
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Remove every subscription.
    pub fn drain(&mut self) -> Vec<(SubscriptionId, InboxHash, S)> {
        self.by_inbox.clear();
        let mut drained: Vec<_> =
            self.subscriptions.drain().map(|(id, (inbox, payload))| (id, inbox, payload)).collect();
        drained.sort_by_key(|(id, ..)| *id);
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbox(name: &str) -> InboxHash {
        InboxHash::new(name)
    }

    #[test]
    fn first_and_last_subscriber_are_reported() {
        let mut registry = SubscriptionRegistry::new();

        let a1 = registry.register(inbox("A"), "a1");
        let a2 = registry.register(inbox("A"), "a2");
        assert!(a1.first_for_inbox);
        assert!(!a2.first_for_inbox);

        assert!(!registry.unregister(a1.id).unwrap().last_for_inbox);
        let removed = registry.unregister(a2.id).unwrap();
        assert!(removed.last_for_inbox);
        assert_eq!(removed.payload, "a2");
        assert!(registry.inbox_hashes().is_empty());
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        let sub = registry.register(inbox("A"), ());

        assert!(registry.unregister(sub.id).is_some());
        assert!(registry.unregister(sub.id).is_none());
    }

    #[test]
    fn subscribers_are_per_inbox() {
        let mut registry = SubscriptionRegistry::new();
        let a = registry.register(inbox("A"), 1);
        registry.register(inbox("B"), 2);

        let for_a: Vec<_> = registry.subscribers(&inbox("A")).collect();
        assert_eq!(for_a, vec![(a.id, &1)]);
        assert_eq!(registry.subscribers(&inbox("C")).count(), 0);
    }

    #[test]
    fn inbox_hashes_sorted_and_distinct() {
        let mut registry = SubscriptionRegistry::new();
        registry.register(inbox("B"), ());
        registry.register(inbox("A"), ());
        registry.register(inbox("B"), ());

        assert_eq!(registry.inbox_hashes(), vec![inbox("A"), inbox("B")]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut registry = SubscriptionRegistry::new();
        let first = registry.register(inbox("A"), ());
        registry.unregister(first.id);
        let second = registry.register(inbox("A"), ());

        assert_ne!(first.id, second.id);
    }

    #[test]
    fn reserved_ids_are_unique() {
        let mut registry = SubscriptionRegistry::<()>::new();
        let reserved = registry.reserve_id();
        let registered = registry.register(inbox("A"), ());

        assert_ne!(reserved, registered.id);
        assert!(!registry.contains(reserved));
    }

    #[test]
    fn drain_empties_everything() {
        let mut registry = SubscriptionRegistry::new();
        registry.register(inbox("A"), 'a');
        registry.register(inbox("B"), 'b');

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
        assert!(registry.inbox_hashes().is_empty());
    }
}
