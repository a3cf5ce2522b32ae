//! Administrative operations on a running engine.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::info;

use crate::dispatcher::{ChannelDispatcher, DeliveryOutcome};
use crate::error::{AlertError, Result};
use crate::source::RuleStore;
use crate::types::{ChannelConfig, ChannelHealth, ChannelType, DispatchAttempt};

/// Remaining rate-limit budget of one channel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    /// The channel type.
    pub channel_type: ChannelType,
    /// Configured sends per hour; `None` means unlimited.
    pub limit: Option<u32>,
    /// Sends left in the current window.
    pub remaining: Option<u32>,
}

/// Read and reset channel state, send test notifications.
#[derive(Debug, Clone)]
pub struct AdminHandle {
    dispatcher: Arc<ChannelDispatcher>,
    rules: Arc<dyn RuleStore>,
}

impl AdminHandle {
    /// Creates a handle over the engine's dispatcher and rule store.
    #[must_use]
    pub fn new(dispatcher: Arc<ChannelDispatcher>, rules: Arc<dyn RuleStore>) -> Self {
        Self { dispatcher, rules }
    }

    /// Returns the current health of every channel type.
    #[must_use]
    pub fn channel_health(&self) -> Vec<ChannelHealth> {
        self.dispatcher.health().snapshot()
    }

    /// Marks a channel healthy, clearing failures and any disabled window.
    pub fn reset_channel(&self, channel: ChannelType) {
        self.dispatcher.health().reset(channel);
    }

    /// Returns the rate-limit budget of every channel type.
    #[must_use]
    pub fn rate_budgets(&self) -> Vec<RateBudget> {
        let limiter = self.dispatcher.rate_limiter();
        let now = Utc::now();
        ChannelType::ALL
            .iter()
            .map(|channel| RateBudget {
                channel_type: *channel,
                limit: limiter.limit(*channel),
                remaining: limiter.remaining_at(*channel, now),
            })
            .collect()
    }

    /// Sends a test notification through one channel configuration.
    ///
    /// Rate limits and the disabled state are bypassed; the result still
    /// counts towards channel health.
    pub async fn test_channel(&self, config: &ChannelConfig) -> Result<DeliveryOutcome> {
        config.validate()?;
        Ok(self.dispatcher.test_channel(config).await)
    }

    /// Sends a test notification through every enabled channel of a rule.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` if no enabled rule has the id, or
    /// the rule store error if rules cannot be read.
    pub async fn test_rule_channels(&self, rule_id: &str) -> Result<Vec<(ChannelType, DeliveryOutcome)>> {
        let rules = self.rules.list_enabled_rules().await?;
        let rule = rules
            .into_iter()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| AlertError::InvalidRule {
                reason: format!("no enabled rule with id '{rule_id}'"),
            })?;

        info!(rule_id, channels = rule.enabled_channels().count(), "testing rule channels");
        let tests = rule.enabled_channels().map(|channel| async move {
            (channel.channel_type(), self.dispatcher.test_channel(&channel.config).await)
        });
        Ok(join_all(tests).await)
    }

    /// Returns up to `limit` recorded dispatch outcomes, newest first.
    pub async fn recent_attempts(&self, limit: usize) -> Result<Vec<DispatchAttempt>> {
        self.dispatcher.recorder().recent(limit).await
    }
}
