//! Engine configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};
use crate::types::{ChannelType, Priority};

/// Digest mode settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    /// Whether low-priority alerts are batched.
    pub enabled: bool,
    /// Minutes between digest flushes.
    pub interval_minutes: u64,
    /// Alerts strictly below this priority are queued.
    pub below_priority: Priority,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 15,
            below_priority: Priority::High,
        }
    }
}

/// Configuration of the alerting engine.
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between metric polls.
    pub poll_interval_secs: u64,
    /// Retries after the first delivery attempt.
    pub max_retries: u32,
    /// Timeout of one delivery attempt in seconds.
    pub attempt_timeout_secs: u64,
    /// Seconds a recorder write may take before it is abandoned.
    pub record_timeout_secs: u64,
    /// Consecutive failures before a channel is disabled.
    pub failure_threshold: u32,
    /// Minutes a disabled channel is skipped.
    pub disable_minutes: u64,
    /// Alerts dispatched concurrently.
    pub max_concurrent_dispatches: usize,
    /// Capacity of the queue between evaluation and dispatch.
    pub dispatch_queue_capacity: usize,
    /// Cooldown applied to rules that do not set one.
    pub default_cooldown_minutes: u32,
    /// Maximum sends per hour, per channel type.
    pub rate_limits: BTreeMap<ChannelType, u32>,
    /// Digest mode.
    pub digest: DigestConfig,
    /// Label sent as `source` in webhook payloads.
    pub source: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            max_retries: 2,
            attempt_timeout_secs: 10,
            record_timeout_secs: 5,
            failure_threshold: 5,
            disable_minutes: 30,
            max_concurrent_dispatches: 16,
            dispatch_queue_capacity: 1024,
            default_cooldown_minutes: 5,
            rate_limits: BTreeMap::from([
                (ChannelType::Email, 60),
                (ChannelType::Chat, 120),
                (ChannelType::Webhook, 120),
            ]),
            digest: DigestConfig::default(),
            source: "harbor".to_string(),
        }
    }
}

impl EngineConfig {
    /// Returns the poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Returns the per-attempt timeout.
    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Returns how long one recorder write may take.
    #[must_use]
    pub const fn record_timeout(&self) -> Duration {
        Duration::from_secs(self.record_timeout_secs)
    }

    /// Returns how long a disabled channel stays disabled.
    #[must_use]
    pub const fn disable_window(&self) -> Duration {
        Duration::from_secs(self.disable_minutes * 60)
    }

    /// Returns the digest flush interval.
    #[must_use]
    pub const fn digest_interval(&self) -> Duration {
        Duration::from_secs(self.digest.interval_minutes * 60)
    }

    /// Returns the total number of delivery attempts per channel.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` for zero intervals, thresholds or
    /// capacities.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.poll_interval_secs == 0, "poll_interval_secs must be greater than zero"),
            (self.attempt_timeout_secs == 0, "attempt_timeout_secs must be greater than zero"),
            (self.record_timeout_secs == 0, "record_timeout_secs must be greater than zero"),
            (self.failure_threshold == 0, "failure_threshold must be greater than zero"),
            (self.disable_minutes == 0, "disable_minutes must be greater than zero"),
            (
                self.max_concurrent_dispatches == 0,
                "max_concurrent_dispatches must be greater than zero",
            ),
            (
                self.dispatch_queue_capacity == 0,
                "dispatch_queue_capacity must be greater than zero",
            ),
            (
                self.default_cooldown_minutes == 0,
                "default_cooldown_minutes must be greater than zero",
            ),
            (
                self.digest.enabled && self.digest.interval_minutes == 0,
                "digest.interval_minutes must be greater than zero",
            ),
            (self.source.trim().is_empty(), "source cannot be empty"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(AlertError::InvalidConfig {
                reason: (*reason).to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_attempts(), 3);
        assert_eq!(config.attempt_timeout(), Duration::from_secs(10));
        assert_eq!(config.record_timeout(), Duration::from_secs(5));
        assert_eq!(config.disable_window(), Duration::from_secs(1800));
        assert_eq!(config.rate_limits.get(&ChannelType::Email), Some(&60));
    }

    #[test]
    fn empty_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_json_overrides() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"max_retries": 0, "rate_limits": {"webhook": 1}, "digest": {"enabled": true}}"#,
        )
        .unwrap();
        assert_eq!(config.max_attempts(), 1);
        assert_eq!(config.rate_limits.len(), 1);
        assert!(config.digest.enabled);
        assert_eq!(config.digest.interval_minutes, 15);
        assert_eq!(config.digest.below_priority, Priority::High);
    }

    #[test]
    fn rejects_zero_values() {
        let mut config = EngineConfig {
            poll_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AlertError::InvalidConfig { reason }) if reason.contains("poll_interval_secs")
        ));

        config.poll_interval_secs = 30;
        config.max_concurrent_dispatches = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_digest_interval_only_matters_when_enabled() {
        let mut config = EngineConfig::default();
        config.digest.interval_minutes = 0;
        assert!(config.validate().is_ok());
        config.digest.enabled = true;
        assert!(config.validate().is_err());
    }
}
