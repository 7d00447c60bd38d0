//! ## Configuration
//!
//! Per-session tuning, deserializable from any serde format. Durations are written in
//! humantime form (`"100ms"`, `"10s"`).
//!

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::session::*;
use crate::transport::TransportOptions;

/// ### Session Config
///
/// Readiness polling, error draining and the options handed to the transport when the
/// session opens it from a locator.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub ready_timeout: Duration,
    pub max_queued_errors: usize,
    pub transport: TransportOptions,
}

impl Default for SessionConfig {
    fn default() -> SessionConfig {
        SessionConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            max_queued_errors: DEFAULT_MAX_QUEUED_ERRORS,
            transport: TransportOptions::new(),
        }
    }
}

impl SessionConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_max_queued_errors(mut self, max: usize) -> Self {
        self.max_queued_errors = max;
        self
    }

    pub fn with_transport_option(mut self, key: &str, value: &str) -> Self {
        self.transport.insert(key.to_string(), value.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = SessionConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.ready_timeout, Duration::from_secs(10));
        assert_eq!(config.max_queued_errors, 100);
        assert!(config.transport.is_empty());
    }

    #[test]
    fn builders_set_fields() {
        let config = SessionConfig::default()
            .with_ready_timeout(Duration::from_secs(2))
            .with_transport_option("timeout", "500ms");
        assert_eq!(config.ready_timeout, Duration::from_secs(2));
        assert_eq!(config.transport.get("timeout").map(String::as_str), Some("500ms"));
    }
}
