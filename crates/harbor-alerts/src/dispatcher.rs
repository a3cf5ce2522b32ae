//! Channel dispatch with retries, timeouts, rate limits and health gating.
//!
//! For every enabled channel of an alert the dispatcher, in order:
//!
//! 1. skips the channel if its health tracker reports it disabled,
//! 2. takes a slot from the channel type's rate limiter,
//! 3. renders the payload and sends it, retrying retriable failures up to
//!    the attempt limit, each attempt bounded by a timeout,
//! 4. reports the outcome to the health tracker and the recorder.
//!
//! Recorder writes are bounded by their own timeout; a stalled history
//! store never holds up delivery.
//!
//! Channels of one alert are dispatched concurrently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::channels::{Notice, Payload, Transport, Transports};
use crate::config::EngineConfig;
use crate::digest::Digest;
use crate::error::TransportError;
use crate::health::ChannelHealthTracker;
use crate::ratelimit::{RateDecision, RateLimiter};
use crate::source::AlertRecorder;
use crate::types::{
    Alert, ChannelConfig, ChannelType, DispatchAttempt, DispatchStatus, REASON_CHANNEL_DISABLED,
    REASON_COOLDOWN, REASON_RATE_LIMITED,
};

/// Delivery settings shared by every channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Total attempts per channel, first try included.
    pub max_attempts: u32,
    /// Timeout of a single attempt.
    pub attempt_timeout: Duration,
    /// Time a recorder write may take before the attempt is dropped from
    /// the history.
    pub record_timeout: Duration,
    /// Alerts dispatched concurrently by the engine.
    pub max_concurrent: usize,
    /// Label sent as `source` in webhook payloads.
    pub source: String,
}

impl DispatchSettings {
    /// Extracts the dispatch settings from the engine configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts(),
            attempt_timeout: config.attempt_timeout(),
            record_timeout: config.record_timeout(),
            max_concurrent: config.max_concurrent_dispatches,
            source: config.source.clone(),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Outcome of delivering one payload to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Delivered on attempt `attempts`.
    Sent {
        /// Attempts made.
        attempts: u32,
    },
    /// Not delivered.
    Failed {
        /// Attempts made.
        attempts: u32,
        /// The last error.
        error: TransportError,
    },
    /// Deliberately skipped.
    Suppressed {
        /// Why the channel was skipped.
        reason: &'static str,
    },
}

impl DeliveryOutcome {
    /// Returns the status recorded for this outcome.
    #[must_use]
    pub const fn status(&self) -> DispatchStatus {
        match self {
            Self::Sent { .. } => DispatchStatus::Sent,
            Self::Failed { .. } => DispatchStatus::Failed,
            Self::Suppressed { .. } => DispatchStatus::Suppressed,
        }
    }

    /// Returns the number of attempts made.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Sent { attempts } | Self::Failed { attempts, .. } => *attempts,
            Self::Suppressed { .. } => 0,
        }
    }

    /// Converts the outcome into the record for `alert`.
    #[must_use]
    pub fn to_attempt(&self, alert: &Alert, channel: ChannelType) -> DispatchAttempt {
        match self {
            Self::Sent { attempts } => DispatchAttempt::sent(alert, channel, *attempts),
            Self::Failed { attempts, error } => {
                DispatchAttempt::failed(alert, channel, *attempts, error.to_string())
            }
            Self::Suppressed { reason } => DispatchAttempt::suppressed(alert, channel, *reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    /// Apply health gating and rate limits.
    Enforce,
    /// Operator test: skip both, still report health.
    Bypass,
}

/// Sends alerts and digests to their channels.
#[derive(Debug)]
pub struct ChannelDispatcher {
    settings: DispatchSettings,
    transports: Transports,
    health: Arc<ChannelHealthTracker>,
    limiter: Arc<RateLimiter>,
    recorder: Arc<dyn AlertRecorder>,
    permits: Arc<Semaphore>,
}

impl ChannelDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        settings: DispatchSettings,
        transports: Transports,
        health: Arc<ChannelHealthTracker>,
        limiter: Arc<RateLimiter>,
        recorder: Arc<dyn AlertRecorder>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            settings,
            transports,
            health,
            limiter,
            recorder,
            permits,
        }
    }

    /// Creates a dispatcher with health tracking and rate limits from `config`.
    #[must_use]
    pub fn from_config(
        config: &EngineConfig,
        transports: Transports,
        recorder: Arc<dyn AlertRecorder>,
    ) -> Self {
        Self::new(
            DispatchSettings::from_config(config),
            transports,
            Arc::new(ChannelHealthTracker::new(
                config.failure_threshold,
                config.disable_window(),
            )),
            Arc::new(RateLimiter::hourly(config.rate_limits.clone())),
            recorder,
        )
    }

    /// Returns the dispatch settings.
    #[must_use]
    pub const fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Returns the channel health tracker.
    #[must_use]
    pub fn health(&self) -> &Arc<ChannelHealthTracker> {
        &self.health
    }

    /// Returns the rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Returns the recorder.
    #[must_use]
    pub fn recorder(&self) -> &Arc<dyn AlertRecorder> {
        &self.recorder
    }

    /// Waits for a dispatch slot. Holding the permit counts against the
    /// concurrency cap.
    pub async fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).acquire_owned().await.ok()
    }

    /// Dispatches an alert to every enabled channel of its rule.
    pub async fn dispatch(&self, alert: &Alert) -> Vec<DispatchAttempt> {
        self.dispatch_at(alert, Utc::now()).await
    }

    /// Dispatches an alert at `now`, returning one record per enabled channel.
    pub async fn dispatch_at(&self, alert: &Alert, now: DateTime<Utc>) -> Vec<DispatchAttempt> {
        let notice = Notice::from_alert(alert);
        let channels: Vec<_> = alert.rule.enabled_channels().collect();
        if channels.is_empty() {
            debug!(alert_id = %alert.id, rule_id = %alert.rule.id, "rule has no enabled channels");
            return Vec::new();
        }

        let per_channel = channels.into_iter().map(|channel| {
            let notice = &notice;
            async move {
                let payload = Payload::render(notice, &channel.config, &self.settings.source);
                let outcome = self.deliver(&channel.config, &payload, Gate::Enforce, now).await;
                let attempt = outcome.to_attempt(alert, channel.channel_type());
                log_attempt(&attempt);
                self.record(&attempt).await;
                attempt
            }
        });

        join_all(per_channel).await
    }

    /// Records a cooldown suppression for every enabled channel of the alert.
    pub async fn record_suppressed(&self, alert: &Alert) -> Vec<DispatchAttempt> {
        let mut attempts = Vec::new();
        for channel in alert.rule.enabled_channels() {
            let attempt = DispatchAttempt::suppressed(alert, channel.channel_type(), REASON_COOLDOWN);
            self.record(&attempt).await;
            attempts.push(attempt);
        }
        attempts
    }

    /// Sends one digest and records its outcome against every merged alert.
    pub async fn dispatch_digest(&self, digest: &Digest) -> Vec<DispatchAttempt> {
        let now = Utc::now();
        let payload = Payload::render(&digest.notice(), &digest.channel, &self.settings.source);
        let outcome = self.deliver(&digest.channel, &payload, Gate::Enforce, now).await;
        let channel = digest.channel.channel_type();

        match &outcome {
            DeliveryOutcome::Sent { attempts } => info!(
                channel = %channel,
                alerts = digest.total(),
                attempts,
                "digest sent"
            ),
            DeliveryOutcome::Failed { attempts, error } => warn!(
                channel = %channel,
                alerts = digest.total(),
                attempts,
                error = %error,
                "digest delivery failed"
            ),
            DeliveryOutcome::Suppressed { reason } => warn!(
                channel = %channel,
                alerts = digest.total(),
                reason,
                "digest suppressed"
            ),
        }

        let mut attempts = Vec::with_capacity(digest.total());
        for alert in &digest.alerts {
            let attempt = outcome.to_attempt(alert, channel);
            self.record(&attempt).await;
            attempts.push(attempt);
        }
        attempts
    }

    /// Sends a test notification, bypassing health gating and rate limits.
    ///
    /// The outcome still updates channel health, so a successful test
    /// re-enables a disabled channel.
    pub async fn test_channel(&self, config: &ChannelConfig) -> DeliveryOutcome {
        let notice = Notice::test(config.channel_type());
        let payload = Payload::render(&notice, config, &self.settings.source);
        let outcome = self.deliver(config, &payload, Gate::Bypass, Utc::now()).await;
        info!(
            channel = %config.channel_type(),
            status = %outcome.status(),
            attempts = outcome.attempts(),
            "channel test finished"
        );
        outcome
    }

    async fn deliver(
        &self,
        config: &ChannelConfig,
        payload: &Payload,
        gate: Gate,
        now: DateTime<Utc>,
    ) -> DeliveryOutcome {
        let channel = config.channel_type();

        if gate == Gate::Enforce {
            if self.health.is_disabled_at(channel, now) {
                return DeliveryOutcome::Suppressed {
                    reason: REASON_CHANNEL_DISABLED,
                };
            }
            if let RateDecision::Limited { .. } = self.limiter.try_acquire_at(channel, now) {
                return DeliveryOutcome::Suppressed {
                    reason: REASON_RATE_LIMITED,
                };
            }
        }

        let started = Instant::now();
        let outcome = match self.transports.get(channel) {
            Some(transport) => self.send_with_retry(transport.as_ref(), config, payload).await,
            None => DeliveryOutcome::Failed {
                attempts: 0,
                error: TransportError::terminal(format!("no transport registered for {channel}")),
            },
        };

        let error = match &outcome {
            DeliveryOutcome::Failed { error, .. } => Some(error.message.as_str()),
            _ => None,
        };
        // Retries can take several attempt timeouts; stamp health when they ended.
        let finished = chrono::Duration::from_std(started.elapsed())
            .map_or(now, |elapsed| now + elapsed);
        self.health.record_outcome_at(
            channel,
            matches!(outcome, DeliveryOutcome::Sent { .. }),
            error,
            finished,
        );
        outcome
    }

    async fn send_with_retry(
        &self,
        transport: &dyn Transport,
        config: &ChannelConfig,
        payload: &Payload,
    ) -> DeliveryOutcome {
        let max_attempts = self.settings.max_attempts.max(1);
        let timeout = self.settings.attempt_timeout;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = match tokio::time::timeout(timeout, transport.send(config, payload)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::retriable(format!(
                    "timed out after {}ms",
                    timeout.as_millis()
                ))),
            };

            match result {
                Ok(()) => return DeliveryOutcome::Sent { attempts },
                Err(error) if error.is_retriable() && attempts < max_attempts => {
                    warn!(
                        channel = %config.channel_type(),
                        attempt = attempts,
                        max_attempts,
                        error = %error,
                        "delivery attempt failed, retrying"
                    );
                }
                Err(error) => return DeliveryOutcome::Failed { attempts, error },
            }
        }
    }

    async fn record(&self, attempt: &DispatchAttempt) {
        let write = self.recorder.record(attempt);
        match tokio::time::timeout(self.settings.record_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                alert_id = %attempt.alert_id,
                channel = %attempt.channel_type,
                status = %attempt.status,
                error = %e,
                "failed to record dispatch attempt"
            ),
            Err(_) => warn!(
                alert_id = %attempt.alert_id,
                channel = %attempt.channel_type,
                status = %attempt.status,
                timeout_ms = u64::try_from(self.settings.record_timeout.as_millis()).unwrap_or(u64::MAX),
                "recorder timed out, dispatch attempt not recorded"
            ),
        }
    }
}

fn log_attempt(attempt: &DispatchAttempt) {
    match attempt.status {
        DispatchStatus::Sent => info!(
            alert_id = %attempt.alert_id,
            rule_id = %attempt.rule_id,
            channel = %attempt.channel_type,
            attempts = attempt.attempt_count,
            "notification sent"
        ),
        DispatchStatus::Failed => warn!(
            alert_id = %attempt.alert_id,
            rule_id = %attempt.rule_id,
            channel = %attempt.channel_type,
            attempts = attempt.attempt_count,
            error = attempt.error.as_deref().unwrap_or_default(),
            "notification failed"
        ),
        DispatchStatus::Suppressed => debug!(
            alert_id = %attempt.alert_id,
            rule_id = %attempt.rule_id,
            channel = %attempt.channel_type,
            reason = attempt.error.as_deref().unwrap_or_default(),
            "notification suppressed"
        ),
    }
}
