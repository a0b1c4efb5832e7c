//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// longest delay any timer may be configured with
const MAX_CONFIGURED_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Error when load or validate a configuration
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ConfigError {
    /// config text is invalid json
    #[snafu(display("parse config json failed: {source}"))]
    ParseJSONFailed {
        /// source error
        source: serde_json::Error,
    },

    /// a duration that must be positive is zero
    #[snafu(display("{name} must be greater than zero"))]
    ZeroDuration {
        /// option name
        name: &'static str,
    },

    /// a duration is unreasonably long
    #[snafu(display("{name} of {value}ms is longer than one day"))]
    DurationTooLong {
        /// option name
        name: &'static str,
        /// configured value
        value: u64,
    },

    /// base reconnect delay is above the max reconnect delay
    #[snafu(display("baseReconnectDelayMs {base} is above maxReconnectDelayMs {max}"))]
    DelayRange {
        /// configured base delay
        base: u64,
        /// configured max delay
        max: u64,
    },

    /// a bounded outbound queue must hold at least one message
    #[snafu(display("maxQueuedMessages must be at least 1, omit it for no bound"))]
    ZeroQueueCapacity,
}

/// Options recognized by the client, every one has a default.
///
/// Serialized keys are camelCase, so a host can pass the same JSON object it
/// keeps in its own settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// failed attempts tolerated for network and timeout failures
    pub max_reconnect_attempts: u32,
    /// delay before the first reconnect attempt
    pub base_reconnect_delay_ms: u64,
    /// upper bound of the reconnect delay
    pub max_reconnect_delay_ms: u64,
    /// interval between heartbeat probes
    pub ping_interval_ms: u64,
    /// how long a probe may go unanswered
    pub pong_timeout_ms: u64,
    /// how long a connect attempt may take
    pub connection_timeout_ms: u64,
    /// outbound queue bound, `None` for unbounded
    pub max_queued_messages: Option<usize>,
    /// outbound queue size that logs a warning
    pub queue_warning_threshold: usize,
    /// how often a failed retry precondition is checked again
    pub precondition_recheck_ms: u64,
    /// JSON field carrying the server sequence number, enables duplicate
    /// suppression of inbound messages
    pub inbound_sequence_field: Option<String>,
    /// run the heartbeat monitor while connected
    pub enable_heartbeat: bool,
    /// reconnect after failures, otherwise every failure suspends
    pub enable_auto_reconnect: bool,
    /// pick recovery strategies per failure class, otherwise one strategy
    /// built from this config applies to every class
    pub enable_error_recovery: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            base_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            ping_interval_ms: 30_000,
            pong_timeout_ms: 10_000,
            connection_timeout_ms: 10_000,
            max_queued_messages: None,
            queue_warning_threshold: 1000,
            precondition_recheck_ms: 1000,
            inbound_sequence_field: None,
            enable_heartbeat: true,
            enable_auto_reconnect: true,
            enable_error_recovery: true,
        }
    }
}

impl Config {
    /// Parse from JSON and validate, missing keys take their default.
    pub fn from_json<S: AsRef<str> + ?Sized>(s: &S) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s.as_ref()).context(error::ParseJSONFailed)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the options are usable together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("baseReconnectDelayMs", self.base_reconnect_delay_ms),
            ("maxReconnectDelayMs", self.max_reconnect_delay_ms),
            ("pingIntervalMs", self.ping_interval_ms),
            ("pongTimeoutMs", self.pong_timeout_ms),
            ("connectionTimeoutMs", self.connection_timeout_ms),
            ("preconditionRecheckMs", self.precondition_recheck_ms),
        ];

        for (name, value) in durations {
            ensure!(value > 0, error::ZeroDuration { name });
            ensure!(
                value <= MAX_CONFIGURED_DELAY_MS,
                error::DurationTooLong { name, value }
            );
        }

        ensure!(
            self.base_reconnect_delay_ms <= self.max_reconnect_delay_ms,
            error::DelayRange {
                base: self.base_reconnect_delay_ms,
                max: self.max_reconnect_delay_ms,
            }
        );

        ensure!(self.max_queued_messages != Some(0), error::ZeroQueueCapacity);

        Ok(())
    }

    /// `base_reconnect_delay_ms` as a duration
    pub fn base_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.base_reconnect_delay_ms)
    }

    /// `max_reconnect_delay_ms` as a duration
    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    /// `ping_interval_ms` as a duration
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// `pong_timeout_ms` as a duration
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    /// `connection_timeout_ms` as a duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// `precondition_recheck_ms` as a duration
    pub fn precondition_recheck(&self) -> Duration {
        Duration::from_millis(self.precondition_recheck_ms)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json() {
        let config = Config::from_json(
            &json!({
                "maxReconnectAttempts": 2,
                "pingIntervalMs": 100,
                "pongTimeoutMs": 50,
                "maxQueuedMessages": 16,
                "enableHeartbeat": false,
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.ping_interval(), Duration::from_millis(100));
        assert_eq!(config.pong_timeout(), Duration::from_millis(50));
        assert_eq!(config.max_queued_messages, Some(16));
        assert!(!config.enable_heartbeat);
        assert!(config.enable_auto_reconnect);
        assert_eq!(config.base_reconnect_delay_ms, 1000);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = Config::from_json(r#"{"pongTimeoutMs": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { name: "pongTimeoutMs" }));
    }

    #[test]
    fn test_delay_range_rejected() {
        let err = Config::from_json(r#"{"baseReconnectDelayMs": 5000, "maxReconnectDelayMs": 10}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::DelayRange { base: 5000, max: 10 }));
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let err = Config::from_json(r#"{"maxQueuedMessages": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroQueueCapacity));

        let config = Config::from_json(r#"{"maxQueuedMessages": null}"#).unwrap();
        assert_eq!(config.max_queued_messages, None);
    }

    #[test]
    fn test_invalid_json() {
        let err = Config::from_json("{").unwrap_err();
        assert!(matches!(err, ConfigError::ParseJSONFailed { .. }));
    }
}
