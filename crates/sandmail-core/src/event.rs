//! Units delivered to subscribers.

use std::fmt;

use chrono::{DateTime, Utc};
use sandmail_proto::{EmailId, InboxHash};

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// New emails observed for one inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEvent {
    /// Inbox the emails arrived in
    pub inbox_hash: InboxHash,
    /// Newly observed email identifiers, in arrival order
    pub email_ids: Vec<EmailId>,
    /// When the strategy observed them
    pub timestamp: DateTime<Utc>,
}

/// Item yielded by a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Content event
    Event(DeliveryEvent),

    /// The strategy gave up on this subscription. Terminal: nothing follows.
    Failed {
        /// Affected inbox
        inbox_hash: InboxHash,
        /// Human-readable cause
        reason: String,
    },
}

impl Delivery {
    /// Inbox this delivery concerns.
    pub fn inbox_hash(&self) -> &InboxHash {
        match self {
            Self::Event(event) => &event.inbox_hash,
            Self::Failed { inbox_hash, .. } => inbox_hash,
        }
    }

    /// Whether no further items will follow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}
