//! [`Environment`] backed by the host: `Utc::now` for expiry checks and
//! event timestamps, the tokio timer for backoff and polling, and the OS
//! entropy source for keypairs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sandmail_core::Environment;

/// Host environment used by [`SandboxClient::connect`].
///
/// Every inbox secret key is derived from `random_seed`, so entropy comes
/// straight from getrandom.
///
/// # Panics
///
/// `random_bytes` panics if the OS entropy source is unavailable; there is
/// no safe key to hand out in that case.
///
/// [`SandboxClient::connect`]: crate::SandboxClient::connect
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS entropy source available");
    }
}
