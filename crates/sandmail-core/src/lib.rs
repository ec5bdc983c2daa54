//! Sandmail Delivery Core
//!
//! Sans-IO logic behind the delivery strategies: everything that decides
//! *what* should happen, with none of the I/O that makes it happen.
//!
//! - [`stream::StreamMachine`]: reconnect/backoff state machine for the
//!   shared event stream (action pattern)
//! - [`checkpoint::PollCheckpoint`]: per-subscription polling dedup
//! - [`registry::SubscriptionRegistry`]: reference-counted multiplexing of
//!   logical subscriptions over one transport
//! - [`config::ClientConfig`]: immutable configuration with pure validation
//! - [`env::Environment`]: clock, randomness and sleep, swappable for tests

pub mod checkpoint;
pub mod config;
pub mod env;
pub mod error;
pub mod event;
pub mod registry;
pub mod stream;

pub use checkpoint::PollCheckpoint;
pub use config::{ClientConfig, ConfigViolation, StrategyKind};
pub use env::Environment;
pub use error::StreamError;
pub use event::{Delivery, DeliveryEvent, SubscriptionId};
pub use registry::{Registered, SubscriptionRegistry, Unregistered};
pub use stream::{ReconnectPolicy, StreamAction, StreamMachine, StreamState};
