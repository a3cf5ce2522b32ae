//! Per-channel health tracking.
//!
//! Each channel type carries a consecutive-failure counter. Reaching the
//! failure threshold disables the channel for a window; while disabled, new
//! alerts skip it. Once the window has elapsed the next dispatch acts as a
//! trial send. Any success resets the counter to zero and clears the disabled
//! state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use crate::types::{ChannelHealth, ChannelType};

/// State change caused by recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// Nothing noteworthy changed.
    Unchanged,
    /// The channel just became disabled.
    Disabled,
    /// A previously disabled channel is healthy again.
    Recovered,
}

/// Tracks consecutive failures per channel type.
///
/// Updates for one channel are serialized by the map's per-key locking;
/// different channels never contend.
#[derive(Debug)]
pub struct ChannelHealthTracker {
    failure_threshold: u32,
    disable_window: Duration,
    channels: DashMap<ChannelType, ChannelHealth>,
}

impl ChannelHealthTracker {
    /// Default consecutive failures before a channel is disabled.
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

    /// Default time a disabled channel stays disabled.
    pub const DEFAULT_DISABLE_WINDOW: Duration = Duration::from_secs(30 * 60);

    /// Creates a tracker.
    #[must_use]
    pub fn new(failure_threshold: u32, disable_window: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            disable_window,
            channels: DashMap::new(),
        }
    }

    /// Returns the failure threshold.
    #[must_use]
    pub const fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Returns true if the channel is disabled now.
    #[must_use]
    pub fn is_disabled(&self, channel: ChannelType) -> bool {
        self.is_disabled_at(channel, Utc::now())
    }

    /// Returns true if the channel is disabled at `now`.
    #[must_use]
    pub fn is_disabled_at(&self, channel: ChannelType, now: DateTime<Utc>) -> bool {
        self.channels
            .get(&channel)
            .is_some_and(|health| health.is_disabled_at(now))
    }

    /// Records the outcome of a delivery against `channel` now.
    pub fn record_outcome(&self, channel: ChannelType, success: bool, error: Option<&str>) -> HealthTransition {
        self.record_outcome_at(channel, success, error, Utc::now())
    }

    /// Records the outcome of a delivery against `channel` at `now`.
    pub fn record_outcome_at(
        &self,
        channel: ChannelType,
        success: bool,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> HealthTransition {
        let mut health = self
            .channels
            .entry(channel)
            .or_insert_with(|| ChannelHealth::healthy(channel));

        if success {
            let was_disabled = health.disabled_until.is_some();
            let previous_failures = health.consecutive_failures;
            health.consecutive_failures = 0;
            health.disabled_until = None;
            health.last_success_at = Some(now);

            if was_disabled {
                info!(
                    channel = %channel,
                    previous_failures,
                    "channel recovered"
                );
                return HealthTransition::Recovered;
            }
            return HealthTransition::Unchanged;
        }

        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        if let Some(error) = error {
            health.last_error = Some(error.to_string());
        }

        if health.consecutive_failures < self.failure_threshold {
            return HealthTransition::Unchanged;
        }

        let was_disabled = health.is_disabled_at(now);
        let window = chrono::Duration::from_std(self.disable_window).unwrap_or(chrono::Duration::MAX);
        health.disabled_until = Some(now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC));

        if was_disabled {
            HealthTransition::Unchanged
        } else {
            warn!(
                channel = %channel,
                consecutive_failures = health.consecutive_failures,
                disabled_until = ?health.disabled_until,
                "channel temporarily disabled"
            );
            HealthTransition::Disabled
        }
    }

    /// Returns the health of one channel.
    #[must_use]
    pub fn health(&self, channel: ChannelType) -> ChannelHealth {
        self.channels
            .get(&channel)
            .map_or_else(|| ChannelHealth::healthy(channel), |h| h.clone())
    }

    /// Returns the health of every channel type.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ChannelHealth> {
        ChannelType::ALL.iter().map(|c| self.health(*c)).collect()
    }

    /// Manually resets a channel to healthy.
    pub fn reset(&self, channel: ChannelType) {
        self.channels.insert(channel, ChannelHealth::healthy(channel));
        info!(channel = %channel, "channel health reset");
    }
}

impl Default for ChannelHealthTracker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FAILURE_THRESHOLD, Self::DEFAULT_DISABLE_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fail(tracker: &ChannelHealthTracker, n: u32, now: DateTime<Utc>) {
        for _ in 0..n {
            tracker.record_outcome_at(ChannelType::Webhook, false, Some("503"), now);
        }
    }

    #[test]
    fn starts_healthy() {
        let tracker = ChannelHealthTracker::default();
        assert!(!tracker.is_disabled(ChannelType::Email));
        assert_eq!(tracker.health(ChannelType::Email).consecutive_failures, 0);
        assert_eq!(tracker.snapshot().len(), 3);
    }

    #[test]
    fn four_failures_keep_channel_enabled() {
        let tracker = ChannelHealthTracker::default();
        let now = Utc::now();
        fail(&tracker, 4, now);
        assert!(!tracker.is_disabled_at(ChannelType::Webhook, now));
        assert_eq!(tracker.health(ChannelType::Webhook).consecutive_failures, 4);
    }

    #[test]
    fn fifth_failure_disables() {
        let tracker = ChannelHealthTracker::default();
        let now = Utc::now();
        fail(&tracker, 4, now);
        let transition = tracker.record_outcome_at(ChannelType::Webhook, false, Some("timeout"), now);
        assert_eq!(transition, HealthTransition::Disabled);
        assert!(tracker.is_disabled_at(ChannelType::Webhook, now));
        assert_eq!(
            tracker.health(ChannelType::Webhook).last_error.as_deref(),
            Some("timeout")
        );
    }

    #[test]
    fn one_success_resets_and_recovers() {
        let tracker = ChannelHealthTracker::default();
        let now = Utc::now();
        fail(&tracker, 7, now);
        let transition = tracker.record_outcome_at(ChannelType::Webhook, true, None, now);
        assert_eq!(transition, HealthTransition::Recovered);

        let health = tracker.health(ChannelType::Webhook);
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.disabled_until.is_none());
        assert!(!tracker.is_disabled_at(ChannelType::Webhook, now));
    }

    #[test]
    fn disable_window_elapses() {
        let tracker = ChannelHealthTracker::new(5, Duration::from_secs(600));
        let now = Utc::now();
        fail(&tracker, 5, now);
        assert!(tracker.is_disabled_at(ChannelType::Webhook, now + chrono::Duration::minutes(9)));
        assert!(!tracker.is_disabled_at(ChannelType::Webhook, now + chrono::Duration::minutes(10)));
    }

    #[test]
    fn failed_trial_send_disables_again() {
        let tracker = ChannelHealthTracker::new(5, Duration::from_secs(600));
        let now = Utc::now();
        fail(&tracker, 5, now);

        let later = now + chrono::Duration::minutes(11);
        let transition = tracker.record_outcome_at(ChannelType::Webhook, false, None, later);
        assert_eq!(transition, HealthTransition::Disabled);
        assert!(tracker.is_disabled_at(ChannelType::Webhook, later));
    }

    #[test]
    fn channels_are_independent() {
        let tracker = ChannelHealthTracker::default();
        let now = Utc::now();
        fail(&tracker, 5, now);
        assert!(tracker.is_disabled_at(ChannelType::Webhook, now));
        assert!(!tracker.is_disabled_at(ChannelType::Email, now));
        assert!(!tracker.is_disabled_at(ChannelType::Chat, now));
    }

    #[test]
    fn manual_reset() {
        let tracker = ChannelHealthTracker::default();
        fail(&tracker, 5, Utc::now());
        tracker.reset(ChannelType::Webhook);
        assert!(!tracker.is_disabled(ChannelType::Webhook));
        assert_eq!(tracker.health(ChannelType::Webhook).consecutive_failures, 0);
    }

    proptest! {
        #[test]
        fn counter_tracks_trailing_failures(outcomes in proptest::collection::vec(any::<bool>(), 0..64)) {
            let tracker = ChannelHealthTracker::default();
            let now = Utc::now();
            for success in &outcomes {
                tracker.record_outcome_at(ChannelType::Chat, *success, None, now);
            }

            let trailing = outcomes.iter().rev().take_while(|s| !**s).count() as u32;
            let health = tracker.health(ChannelType::Chat);
            prop_assert_eq!(health.consecutive_failures, trailing);
            prop_assert_eq!(tracker.is_disabled_at(ChannelType::Chat, now), trailing >= 5);
        }
    }
}
