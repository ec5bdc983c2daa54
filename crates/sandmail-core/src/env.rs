//! Environment abstraction for deterministic testing.
//!
//! Decouples delivery logic from system resources (wall clock, randomness,
//! timers). Production uses the OS clock and entropy; tests use a seeded RNG
//! and a controllable clock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

/// Abstract environment providing time, randomness, and async sleep.
///
/// Object safe so one environment can be shared as `Arc<dyn Environment>`
/// by every inbox and strategy spawned from a client.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - `sleep()` is driven by the same clock the host runtime's timers use
pub trait Environment: Send + Sync + 'static {
    /// Current wall-clock time.
    ///
    /// Used for inbox expiry checks and event timestamps, never for
    /// scheduling.
    fn wall_clock(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    fn random_bytes(&self, buffer: &mut [u8]);

    /// 32 random bytes, the seed size every crypto operation takes.
    fn random_seed(&self) -> [u8; 32] {
        let mut seed = [0u8; 32];
        self.random_bytes(&mut seed);
        seed
    }

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
