//! Client configuration.
//!
//! `ClientConfig` is a plain value with public fields. Nothing validates on
//! construction; [`ClientConfig::validate`] reports every problem at once and
//! the client refuses to start while the list is non-empty.

use std::{fmt, time::Duration};

use thiserror::Error;

use crate::stream::ReconnectPolicy;

/// Interval between polling ticks.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(2);

/// Base delay before the first event-stream reconnect.
pub const DEFAULT_SSE_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound for the exponential reconnect delay.
pub const DEFAULT_SSE_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Consecutive failed connection attempts that mark the event stream failed.
pub const DEFAULT_SSE_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// How long `wait_for_*` operations wait when no timeout is given.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request HTTP timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How new emails are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StrategyKind {
    /// Server-sent events over one shared stream
    Sse,
    /// Periodic sync checks
    Polling,
    /// Event stream, falling back to polling once it fails
    #[default]
    Auto,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sse => "sse",
            Self::Polling => "polling",
            Self::Auto => "auto",
        })
    }
}

/// Client configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Service root, e.g. `https://sandbox.example.com`
    pub base_url: String,
    /// Value of the `X-API-Key` header
    pub api_key: String,
    /// Delivery strategy
    pub strategy: StrategyKind,
    /// Polling tick interval
    pub polling_interval: Duration,
    /// Base reconnect delay
    pub sse_reconnect_interval: Duration,
    /// Reconnect delay cap
    pub sse_max_reconnect_delay: Duration,
    /// Consecutive failed connection attempts that fail the stream
    pub sse_max_reconnect_attempts: u32,
    /// Default for `wait_for_*` timeouts
    pub default_wait_timeout: Duration,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            strategy: StrategyKind::default(),
            polling_interval: DEFAULT_POLLING_INTERVAL,
            sse_reconnect_interval: DEFAULT_SSE_RECONNECT_INTERVAL,
            sse_max_reconnect_delay: DEFAULT_SSE_MAX_RECONNECT_DELAY,
            sse_max_reconnect_attempts: DEFAULT_SSE_MAX_RECONNECT_ATTEMPTS,
            default_wait_timeout: DEFAULT_WAIT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("strategy", &self.strategy)
            .field("polling_interval", &self.polling_interval)
            .field("sse_reconnect_interval", &self.sse_reconnect_interval)
            .field("sse_max_reconnect_delay", &self.sse_max_reconnect_delay)
            .field("sse_max_reconnect_attempts", &self.sse_max_reconnect_attempts)
            .field("default_wait_timeout", &self.default_wait_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// One problem found by [`ClientConfig::validate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigViolation {
    /// `base_url` is empty
    #[error("base_url is required")]
    MissingBaseUrl,

    /// `base_url` is not an http(s) URL
    #[error("base_url must start with http:// or https://, got {0:?}")]
    InvalidBaseUrl(String),

    /// `api_key` is empty
    #[error("api_key is required")]
    MissingApiKey,

    /// A duration that must be positive is zero
    #[error("{field} must be greater than zero")]
    ZeroDuration {
        /// Offending field
        field: &'static str,
    },

    /// `sse_max_reconnect_attempts` is zero
    #[error("sse_max_reconnect_attempts must be at least 1")]
    ZeroReconnectAttempts,

    /// Delay cap is below the base delay
    #[error("sse_max_reconnect_delay ({max:?}) is shorter than sse_reconnect_interval ({base:?})")]
    MaxDelayBelowInterval {
        /// Base delay
        base: Duration,
        /// Cap
        max: Duration,
    },
}

impl ClientConfig {
    /// Default configuration for a service and key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), api_key: api_key.into(), ..Self::default() }
    }

    /// Every violation, in field order. Empty means valid.
    pub fn validate(&self) -> Vec<ConfigViolation> {
        let mut violations = Vec::new();

        let base_url = self.base_url.trim();
        if base_url.is_empty() {
            violations.push(ConfigViolation::MissingBaseUrl);
        } else if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            violations.push(ConfigViolation::InvalidBaseUrl(self.base_url.clone()));
        }

        if self.api_key.trim().is_empty() {
            violations.push(ConfigViolation::MissingApiKey);
        }

        for (field, value) in [
            ("polling_interval", self.polling_interval),
            ("sse_reconnect_interval", self.sse_reconnect_interval),
            ("sse_max_reconnect_delay", self.sse_max_reconnect_delay),
            ("default_wait_timeout", self.default_wait_timeout),
            ("request_timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                violations.push(ConfigViolation::ZeroDuration { field });
            }
        }

        if self.sse_max_reconnect_attempts == 0 {
            violations.push(ConfigViolation::ZeroReconnectAttempts);
        }

        if self.sse_max_reconnect_delay < self.sse_reconnect_interval {
            violations.push(ConfigViolation::MaxDelayBelowInterval {
                base: self.sse_reconnect_interval,
                max: self.sse_max_reconnect_delay,
            });
        }

        violations
    }

    /// Reconnect policy for the event stream.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            interval: self.sse_reconnect_interval,
            max_delay: self.sse_max_reconnect_delay,
            max_attempts: self.sse_max_reconnect_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.strategy, StrategyKind::Auto);
        assert_eq!(config.polling_interval, Duration::from_secs(2));
        assert_eq!(config.sse_reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.sse_max_reconnect_delay, Duration::from_secs(60));
        assert_eq!(config.sse_max_reconnect_attempts, 10);
        assert_eq!(config.default_wait_timeout, Duration::from_secs(30));
    }

    #[test]
    fn valid_config_has_no_violations() {
        let config = ClientConfig::new("https://sandbox.test", "key");
        assert_eq!(config.validate(), vec![]);
    }

    #[test]
    fn reports_every_violation() {
        let config = ClientConfig {
            polling_interval: Duration::ZERO,
            sse_max_reconnect_attempts: 0,
            sse_max_reconnect_delay: Duration::from_secs(1),
            ..ClientConfig::default()
        };

        assert_eq!(config.validate(), vec![
            ConfigViolation::MissingBaseUrl,
            ConfigViolation::MissingApiKey,
            ConfigViolation::ZeroDuration { field: "polling_interval" },
            ConfigViolation::ZeroReconnectAttempts,
            ConfigViolation::MaxDelayBelowInterval {
                base: Duration::from_secs(5),
                max: Duration::from_secs(1),
            },
        ]);
    }

    #[test]
    fn rejects_non_http_url() {
        let config = ClientConfig::new("ftp://sandbox.test", "key");
        assert_eq!(config.validate(), vec![ConfigViolation::InvalidBaseUrl(
            "ftp://sandbox.test".to_string()
        )]);
    }

    #[test]
    fn debug_redacts_api_key() {
        let debug = format!("{:?}", ClientConfig::new("https://sandbox.test", "sk-secret"));
        assert!(!debug.contains("sk-secret"));
    }
}
