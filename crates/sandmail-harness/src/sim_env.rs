//! Simulated environment.
//!
//! Randomness comes from a seeded ChaCha20 stream, so the same seed yields
//! the same keypairs, inbox hashes and envelopes. Time is tokio time: under
//! a paused runtime sleeps complete as soon as the runtime is idle, and the
//! wall clock advances with them.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use rand_chacha::{
    ChaCha20Rng,
    rand_core::{RngCore, SeedableRng},
};
use sandmail_core::Environment;
use tokio::time::Instant;

/// 2030-01-01T00:00:00Z
const SIM_EPOCH_SECS: i64 = 1_893_456_000;

struct Inner {
    rng: Mutex<ChaCha20Rng>,
    started: Instant,
    base: DateTime<Utc>,
    offset: Mutex<TimeDelta>,
}

/// Deterministic environment. Clones share the RNG and clock.
///
/// Create it inside the runtime that will drive the test, since the wall
/// clock is measured from tokio's clock at construction.
#[derive(Clone)]
pub struct SimEnv {
    inner: Arc<Inner>,
}

impl SimEnv {
    /// Environment seeded with 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with a specific RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
                started: Instant::now(),
                base: DateTime::UNIX_EPOCH + TimeDelta::seconds(SIM_EPOCH_SECS),
                offset: Mutex::new(TimeDelta::zero()),
            }),
        }
    }

    /// Move the wall clock forward without touching tokio time.
    ///
    /// Pending sleeps are unaffected; use `tokio::time::advance` for those.
    pub fn advance_wall_clock(&self, by: TimeDelta) {
        let mut offset = self.inner.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }

    /// Jump the wall clock to `at`.
    pub fn set_wall_clock(&self, at: DateTime<Utc>) {
        let current = self.wall_clock();
        self.advance_wall_clock(at - current);
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("wall_clock", &self.wall_clock()).finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    fn wall_clock(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.inner.started.elapsed()).unwrap_or_default();
        let offset = *self.inner.offset.lock().unwrap_or_else(PoisonError::into_inner);
        self.inner.base + elapsed + offset
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.inner.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
