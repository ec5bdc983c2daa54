//! Client SDK for disposable, end-to-end encrypted test inboxes.
//!
//! Inboxes are created with a client-generated ML-KEM-768 keypair. The
//! server encrypts each email to that key and signs the envelope; this
//! crate verifies the signature against the key pinned at creation before
//! decrypting anything.
//!
//! # Delivery
//!
//! New-mail notifications come from one of three strategies, chosen by
//! [`ClientConfig::strategy`]:
//!
//! - `Sse`: one shared event stream, reconnecting with exponential backoff
//! - `Polling`: one shared timer comparing per-inbox sync hashes
//! - `Auto` (default): the stream, falling back to polling per subscription
//!   once the stream has given up
//!
//! ```text
//! SandboxClient ──create/import──▶ Inbox ──subscribe──▶ DeliveryStrategy
//!       │                            │                        │
//!       └──monitor──▶ InboxMonitor ◀─┘                        ▼
//!                                                         Transport
//! ```
//!
//! Network work runs on tasks spawned onto the ambient tokio runtime.
//! Nothing here installs a tracing subscriber.

mod client;
mod error;
mod filter;
mod inbox;
mod monitor;
pub mod strategy;
mod subscription;
mod system_env;
pub mod transport;

pub use client::{CreateInboxOptions, SandboxClient};
pub use error::{ClientError, Result, TransportError};
pub use filter::{EmailBatch, EmailFilter, WithheldEmail, WithheldReason};
pub use inbox::Inbox;
pub use monitor::InboxMonitor;
pub use sandmail_core::{
    ClientConfig, ConfigViolation, Delivery, DeliveryEvent, Environment, StrategyKind,
    SubscriptionId,
};
pub use sandmail_proto::{DecryptedEmail, EmailId, InboxExport, InboxHash, SyncState};
pub use strategy::{AutoStrategy, DeliveryStrategy, PollingStrategy, SseStrategy, create_strategy};
pub use subscription::Subscription;
pub use system_env::SystemEnv;
pub use transport::{ByteStream, HttpTransport, Transport};
