//! Sliding-window rate limiting per channel type.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::warn;

use crate::types::ChannelType;

/// Result of asking the limiter for a send slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The send may proceed; a slot has been consumed.
    Allowed,
    /// The window is full.
    Limited {
        /// True for the first refusal since the window last had room.
        first_in_window: bool,
    },
}

impl RateDecision {
    /// Returns true if the send may proceed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Default)]
struct WindowState {
    sends: VecDeque<DateTime<Utc>>,
    warned: bool,
}

impl WindowState {
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        while self.sends.front().is_some_and(|t| *t <= cutoff) {
            self.sends.pop_front();
        }
    }
}

/// Limits sends per channel type within a rolling window (one hour by default).
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    limits: BTreeMap<ChannelType, u32>,
    state: DashMap<ChannelType, WindowState>,
}

impl RateLimiter {
    /// The rolling window used for `max_per_hour` limits.
    pub const HOUR: Duration = Duration::from_secs(3600);

    /// Creates a limiter with per-channel `max_per_hour` limits.
    ///
    /// Channel types without an entry are unlimited.
    #[must_use]
    pub fn hourly(limits: BTreeMap<ChannelType, u32>) -> Self {
        Self::with_window(limits, Self::HOUR)
    }

    /// Creates a limiter with a custom window length.
    #[must_use]
    pub fn with_window(limits: BTreeMap<ChannelType, u32>, window: Duration) -> Self {
        Self {
            window,
            limits,
            state: DashMap::new(),
        }
    }

    /// Returns the configured limit for a channel type.
    #[must_use]
    pub fn limit(&self, channel: ChannelType) -> Option<u32> {
        self.limits.get(&channel).copied()
    }

    /// Tries to consume a send slot now.
    pub fn try_acquire(&self, channel: ChannelType) -> RateDecision {
        self.try_acquire_at(channel, Utc::now())
    }

    /// Tries to consume a send slot at `now`.
    pub fn try_acquire_at(&self, channel: ChannelType, now: DateTime<Utc>) -> RateDecision {
        let Some(max) = self.limit(channel) else {
            return RateDecision::Allowed;
        };

        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::hours(1));
        let mut state = self.state.entry(channel).or_default();
        state.prune(now - window);

        if state.sends.len() < max as usize {
            state.sends.push_back(now);
            state.warned = false;
            return RateDecision::Allowed;
        }

        let first_in_window = !state.warned;
        state.warned = true;
        if first_in_window {
            warn!(
                channel = %channel,
                max_per_window = max,
                window_secs = self.window.as_secs(),
                "rate limit exceeded, suppressing notifications"
            );
        }
        RateDecision::Limited { first_in_window }
    }

    /// Returns how many sends remain in the current window at `now`.
    #[must_use]
    pub fn remaining_at(&self, channel: ChannelType, now: DateTime<Utc>) -> Option<u32> {
        let max = self.limit(channel)?;
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::hours(1));
        let used = self.state.get(&channel).map_or(0, |state| {
            state.sends.iter().filter(|t| **t > now - window).count()
        });
        Some(max.saturating_sub(used as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32) -> RateLimiter {
        RateLimiter::hourly(BTreeMap::from([(ChannelType::Webhook, max)]))
    }

    #[test]
    fn unlimited_channel_always_allowed() {
        let limiter = limiter(1);
        for _ in 0..100 {
            assert!(limiter.try_acquire(ChannelType::Email).is_allowed());
        }
        assert_eq!(limiter.remaining_at(ChannelType::Email, Utc::now()), None);
    }

    #[test]
    fn n_plus_one_is_limited() {
        let limiter = limiter(3);
        let now = Utc::now();
        for _ in 0..3 {
            assert!(limiter.try_acquire_at(ChannelType::Webhook, now).is_allowed());
        }
        assert_eq!(
            limiter.try_acquire_at(ChannelType::Webhook, now),
            RateDecision::Limited { first_in_window: true }
        );
        assert_eq!(
            limiter.try_acquire_at(ChannelType::Webhook, now),
            RateDecision::Limited { first_in_window: false }
        );
        assert_eq!(limiter.remaining_at(ChannelType::Webhook, now), Some(0));
    }

    #[test]
    fn window_slides() {
        let limiter = limiter(1);
        let start = Utc::now();
        assert!(limiter.try_acquire_at(ChannelType::Webhook, start).is_allowed());
        assert!(!limiter
            .try_acquire_at(ChannelType::Webhook, start + chrono::Duration::minutes(59))
            .is_allowed());
        assert!(limiter
            .try_acquire_at(ChannelType::Webhook, start + chrono::Duration::minutes(61))
            .is_allowed());
    }

    #[test]
    fn warning_rearms_after_room_frees_up() {
        let limiter = limiter(1);
        let start = Utc::now();
        limiter.try_acquire_at(ChannelType::Webhook, start);
        assert_eq!(
            limiter.try_acquire_at(ChannelType::Webhook, start),
            RateDecision::Limited { first_in_window: true }
        );

        let later = start + chrono::Duration::minutes(61);
        assert!(limiter.try_acquire_at(ChannelType::Webhook, later).is_allowed());
        assert_eq!(
            limiter.try_acquire_at(ChannelType::Webhook, later),
            RateDecision::Limited { first_in_window: true }
        );
    }

    #[test]
    fn zero_limit_blocks_everything() {
        let limiter = limiter(0);
        assert!(!limiter.try_acquire(ChannelType::Webhook).is_allowed());
    }
}
