//! Deterministic simulation harness for the sandmail client.
//!
//! [`SimEnv`] implements the client's `Environment` with a seeded RNG and a
//! wall clock that follows tokio's (pausable) clock plus a settable offset.
//! [`SimServer`] implements `Transport` in memory: it encrypts and signs
//! every email exactly like the real service, serves sync state and event
//! streams, and exposes fault injection for connection failures, dropped
//! streams, transient errors and tampered envelopes.
//!
//! Tests run under `#[tokio::test(start_paused = true)]` so backoff and
//! polling intervals elapse instantly and in a reproducible order.

#![forbid(unsafe_code)]

pub mod sim_env;
pub mod sim_server;

pub use sim_env::SimEnv;
pub use sim_server::{CallCounts, SimEmail, SimServer};
