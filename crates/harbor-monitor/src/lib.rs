//! harbor-monitor - container health monitoring daemon
//!
//! Wires the `harbor-alerts` engine to files on disk: rules and samples are
//! read from JSON, dispatch history is appended to a JSON-lines file.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod sources;

use std::sync::Arc;

use harbor_alerts::{
    AlertEngine, AlertRule, ChannelConfig, ChannelType, ComparisonOperator, MetricType, Priority,
    WebhookConfig,
};
use tracing::info;

pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use sources::{FileMetricSource, FileRuleStore, JsonlRecorder};

/// Builds an engine backed by the files named in `config`.
///
/// # Errors
///
/// Returns an error if the history file cannot be opened or the engine
/// settings are invalid.
pub fn build_engine(config: &MonitorConfig) -> Result<AlertEngine> {
    let recorder = JsonlRecorder::open(&config.history_path)?;
    let engine = AlertEngine::builder(config.engine.clone())
        .source(Arc::new(FileMetricSource::new(
            &config.samples_path,
            config.max_sample_age(),
        )))
        .rules(Arc::new(FileRuleStore::new(
            &config.rules_path,
            config.engine.default_cooldown_minutes,
        )))
        .recorder(Arc::new(recorder))
        .build()?;

    info!(
        rules = %config.rules_path.display(),
        samples = %config.samples_path.display(),
        history = %config.history_path.display(),
        "engine ready"
    );
    Ok(engine)
}

/// Logs the health and remaining rate budget of every channel type.
pub fn log_channel_health(engine: &AlertEngine) {
    let admin = engine.admin();
    for health in admin.channel_health() {
        info!(
            channel = %health.channel_type,
            failures = health.consecutive_failures,
            disabled_until = ?health.disabled_until,
            last_error = ?health.last_error,
            "channel health"
        );
    }
    for budget in admin.rate_budgets() {
        info!(
            channel = %budget.channel_type,
            limit = ?budget.limit,
            remaining = ?budget.remaining,
            "rate budget"
        );
    }
}

/// Starter rules written by `init-config`.
///
/// # Errors
///
/// Returns an error if a rule fails validation.
pub fn sample_rules() -> Result<Vec<AlertRule>> {
    let webhook = ChannelConfig::Webhook(WebhookConfig::new("https://hooks.example.com/harbor"));

    let rules = vec![
        AlertRule::builder("High CPU", MetricType::Cpu, ComparisonOperator::GreaterThan, 80.0)
            .id("cpu-high")
            .priority(Priority::High)
            .cooldown_minutes(10)
            .channel(webhook.clone())
            .build()?,
        AlertRule::builder("High memory", MetricType::Memory, ComparisonOperator::GreaterThanOrEqual, 90.0)
            .id("memory-high")
            .priority(Priority::Medium)
            .channel(webhook.clone())
            .build()?,
        AlertRule::builder("Container down", MetricType::UpState, ComparisonOperator::Equal, 0.0)
            .id("unit-down")
            .priority(Priority::Critical)
            .cooldown_minutes(1)
            .channel(webhook)
            .build()?,
    ];
    Ok(rules)
}

/// Channel types referenced by enabled channels of `rules`.
#[must_use]
pub fn referenced_channels(rules: &[AlertRule]) -> Vec<ChannelType> {
    let mut channels: Vec<ChannelType> = rules
        .iter()
        .flat_map(|r| r.enabled_channels().map(|c| c.config.channel_type()))
        .collect();
    channels.sort();
    channels.dedup();
    channels
}
