//! Delivery strategies.
//!
//! A strategy turns transport activity into [`Delivery`] items for
//! subscribers. Three implementations exist:
//!
//! - [`SseStrategy`]: one shared event stream with reconnect/backoff
//! - [`PollingStrategy`]: one shared timer driving sync checks
//! - [`AutoStrategy`]: decorator over the two, starting on the stream and
//!   switching a subscription to polling when the stream fails
//!
//! [`Delivery`]: sandmail_core::Delivery

mod auto;
mod polling;
mod sse;

use std::sync::Arc;

pub use auto::AutoStrategy;
pub use polling::PollingStrategy;
use sandmail_core::{ClientConfig, Environment, StrategyKind, SubscriptionId};
use sandmail_proto::InboxHash;
pub use sse::SseStrategy;

use crate::{subscription::Subscription, transport::Transport};

/// Subscribe/unsubscribe capability shared by every strategy.
///
/// All methods are synchronous and non-blocking; network work happens on
/// tasks the strategy spawns onto the current tokio runtime.
pub trait DeliveryStrategy: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> StrategyKind;

    /// Start watching `inbox_hash`.
    ///
    /// Many subscriptions, for the same or different inboxes, share one
    /// underlying stream or timer.
    fn subscribe(&self, inbox_hash: InboxHash) -> Subscription;

    /// Stop a subscription. Unknown or already-removed ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// End every subscription and stop background work.
    fn dispose(&self);
}

/// Build the strategy selected by `kind`.
///
/// Must be called from within a tokio runtime.
pub fn create_strategy(
    kind: StrategyKind,
    config: &ClientConfig,
    transport: Arc<dyn Transport>,
    env: Arc<dyn Environment>,
) -> Arc<dyn DeliveryStrategy> {
    match kind {
        StrategyKind::Sse => Arc::new(SseStrategy::new(config.reconnect_policy(), transport, env)),
        StrategyKind::Polling => {
            Arc::new(PollingStrategy::new(config.polling_interval, transport, env))
        },
        StrategyKind::Auto => Arc::new(AutoStrategy::new(
            SseStrategy::new(config.reconnect_policy(), Arc::clone(&transport), Arc::clone(&env)),
            PollingStrategy::new(config.polling_interval, transport, env),
        )),
    }
}
