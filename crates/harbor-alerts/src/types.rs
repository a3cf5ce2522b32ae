//! Core types for the alerting engine.
//!
//! This module provides the fundamental types used throughout the harbor-alerts crate:
//! - [`MetricType`] and [`Sample`]: what the metric source produces
//! - [`Priority`] and [`Severity`]: how urgent an alert is
//! - [`ComparisonOperator`]: operators for comparing metric values
//! - [`ChannelConfig`] and [`RuleChannel`]: where notifications go
//! - [`AlertRule`]: a rule that defines when and how to alert
//! - [`Alert`]: one firing of a rule for one unit
//! - [`DispatchAttempt`] and [`ChannelHealth`]: dispatch outcomes and channel state

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AlertError, Result};

/// The kind of measurement carried by a [`Sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// CPU usage in percent.
    Cpu,
    /// Memory usage in percent.
    Memory,
    /// Disk usage in percent.
    Disk,
    /// Network throughput.
    Network,
    /// Number of container restarts.
    RestartCount,
    /// 1.0 when the unit is up, 0.0 when it is down.
    UpState,
    /// 1.0 when the liveness check passed, 0.0 otherwise.
    Liveness,
}

impl MetricType {
    /// Returns the metric type as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::Network => "network",
            Self::RestartCount => "restart_count",
            Self::UpState => "up_state",
            Self::Liveness => "liveness",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single measurement of one unit, produced once per poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Stable identifier of the monitored unit.
    pub unit_id: String,
    /// Display name of the unit.
    pub unit_name: String,
    /// What was measured.
    pub metric_type: MetricType,
    /// The measured value.
    pub value: f64,
    /// When the value was observed.
    pub observed_at: DateTime<Utc>,
}

impl Sample {
    /// Creates a sample observed now.
    #[must_use]
    pub fn new(
        unit_id: impl Into<String>,
        unit_name: impl Into<String>,
        metric_type: MetricType,
        value: f64,
    ) -> Self {
        Self {
            unit_id: unit_id.into(),
            unit_name: unit_name.into(),
            metric_type,
            value,
            observed_at: Utc::now(),
        }
    }

    /// Sets the observation time.
    #[must_use]
    pub const fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }
}

/// How urgent an alert rule is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Low priority; eligible for digests.
    Low,
    /// Medium priority.
    #[default]
    Medium,
    /// High priority.
    High,
    /// Critical, requires immediate attention.
    Critical,
}

impl Priority {
    /// All priorities from lowest to highest.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Returns the priority as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Returns the upper-case tag used in email subjects.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Maps the priority onto a notification severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Low => Severity::Info,
            Self::Medium | Self::High => Severity::Warning,
            Self::Critical => Severity::Critical,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The severity marker shown by notification channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Info,
    /// Should be investigated.
    Warning,
    /// Requires immediate attention.
    Critical,
}

impl Severity {
    /// Returns the severity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Returns the chat attachment color for this severity.
    #[must_use]
    pub const fn chat_color(&self) -> &'static str {
        match self {
            Self::Info => "good",
            Self::Warning => "warning",
            Self::Critical => "danger",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Comparison operators for alert rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    /// Greater than (>).
    #[serde(rename = ">")]
    GreaterThan,
    /// Greater than or equal (>=).
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    /// Less than (<).
    #[serde(rename = "<")]
    LessThan,
    /// Less than or equal (<=).
    #[serde(rename = "<=")]
    LessThanOrEqual,
    /// Equal (=).
    #[serde(rename = "=", alias = "==")]
    Equal,
    /// Not equal (!=).
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOperator {
    /// Evaluates `left <op> right` with exact floating point comparison.
    #[must_use]
    pub fn evaluate(&self, left: f64, right: f64) -> bool {
        match self {
            Self::GreaterThan => left > right,
            Self::GreaterThanOrEqual => left >= right,
            Self::LessThan => left < right,
            Self::LessThanOrEqual => left <= right,
            Self::Equal => left == right,
            Self::NotEqual => left != right,
        }
    }

    /// Returns the operator as a string symbol.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Equal => "=",
            Self::NotEqual => "!=",
        }
    }
}

impl std::fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_symbol())
    }
}

/// The notification transport a channel uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// SMTP email.
    Email,
    /// Chat incoming webhook (Slack-compatible attachments).
    Chat,
    /// Generic JSON webhook.
    Webhook,
}

impl ChannelType {
    /// All channel types.
    pub const ALL: [Self; 3] = [Self::Email, Self::Chat, Self::Webhook];

    /// Returns the channel type as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Chat => "chat",
            Self::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

/// SMTP delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailConfig {
    /// SMTP relay host.
    pub smtp_host: String,
    /// SMTP port.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Optional SMTP username.
    #[serde(default)]
    pub username: Option<String>,
    /// Optional SMTP password.
    #[serde(default)]
    pub password: Option<String>,
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Use STARTTLS; plain connections are only for local relays.
    #[serde(default = "default_true")]
    pub starttls: bool,
}

/// Chat webhook settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Incoming webhook URL.
    pub webhook_url: String,
    /// Optional channel override.
    #[serde(default)]
    pub channel: Option<String>,
    /// Optional bot display name.
    #[serde(default)]
    pub username: Option<String>,
}

/// Generic webhook settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Target URL.
    pub url: String,
    /// Extra headers merged into every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl WebhookConfig {
    /// Creates a webhook configuration without custom headers.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Adds a header to the configuration.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Per-type channel configuration, tagged by channel type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Email channel.
    Email(EmailConfig),
    /// Chat webhook channel.
    Chat(ChatConfig),
    /// Generic webhook channel.
    Webhook(WebhookConfig),
}

impl ChannelConfig {
    /// Returns the channel type of this configuration.
    #[must_use]
    pub const fn channel_type(&self) -> ChannelType {
        match self {
            Self::Email(_) => ChannelType::Email,
            Self::Chat(_) => ChannelType::Chat,
            Self::Webhook(_) => ChannelType::Webhook,
        }
    }

    /// Validates the configuration against its type's schema.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidChannel` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Email(email) => {
                if email.smtp_host.trim().is_empty() {
                    return Err(invalid_channel("email smtp_host cannot be empty"));
                }
                parse_mailbox(&email.from)?;
                if email.to.is_empty() {
                    return Err(invalid_channel("email channel needs at least one recipient"));
                }
                for recipient in &email.to {
                    parse_mailbox(recipient)?;
                }
                Ok(())
            }
            Self::Chat(chat) => validate_http_url(&chat.webhook_url),
            Self::Webhook(webhook) => {
                validate_http_url(&webhook.url)?;
                if webhook.headers.keys().any(|k| k.trim().is_empty()) {
                    return Err(invalid_channel("webhook header names cannot be empty"));
                }
                Ok(())
            }
        }
    }
}

fn invalid_channel(reason: impl Into<String>) -> AlertError {
    AlertError::InvalidChannel {
        reason: reason.into(),
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse::<Mailbox>()
        .map_err(|e| invalid_channel(format!("invalid email address '{address}': {e}")))
}

fn validate_http_url(raw: &str) -> Result<()> {
    let url = url::Url::parse(raw).map_err(|e| invalid_channel(format!("invalid URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid_channel(format!(
            "URL '{raw}' must use http or https, not {other}"
        ))),
    }
}

/// A channel attached to a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleChannel {
    /// The channel configuration.
    #[serde(flatten)]
    pub config: ChannelConfig,
    /// Whether this channel receives alerts for the rule.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RuleChannel {
    /// Creates an enabled channel.
    #[must_use]
    pub const fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            enabled: true,
        }
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns the channel type.
    #[must_use]
    pub const fn channel_type(&self) -> ChannelType {
        self.config.channel_type()
    }
}

/// A rule that defines when and how to trigger an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    /// Unique identifier for the rule.
    pub id: String,
    /// Human-readable name for the rule.
    pub name: String,
    /// Restricts the rule to one unit; `None` applies it to all units.
    #[serde(default)]
    pub scope_unit_id: Option<String>,
    /// The metric this rule watches.
    pub metric_type: MetricType,
    /// The comparison operator.
    pub operator: ComparisonOperator,
    /// The threshold value to compare against.
    pub threshold_value: f64,
    /// Priority of alerts generated by this rule.
    #[serde(default)]
    pub priority: Priority,
    /// Minutes during which the same (rule, unit) pair cannot fire again.
    pub cooldown_minutes: u32,
    /// Notification channels, in order.
    #[serde(default)]
    pub channels: Vec<RuleChannel>,
    /// Whether this rule is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl AlertRule {
    /// Maximum allowed length for rule names.
    pub const MAX_NAME_LENGTH: usize = 256;

    /// Creates a new alert rule builder.
    pub fn builder(
        name: impl Into<String>,
        metric_type: MetricType,
        operator: ComparisonOperator,
        threshold_value: f64,
    ) -> AlertRuleBuilder {
        AlertRuleBuilder::new(name, metric_type, operator, threshold_value)
    }

    /// Returns the cooldown as a [`Duration`].
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_minutes as u64 * 60)
    }

    /// Returns true if the rule applies to the given unit.
    #[must_use]
    pub fn applies_to(&self, unit_id: &str) -> bool {
        self.scope_unit_id.as_deref().is_none_or(|scope| scope == unit_id)
    }

    /// Returns the enabled channels of this rule.
    pub fn enabled_channels(&self) -> impl Iterator<Item = &RuleChannel> {
        self.channels.iter().filter(|c| c.enabled)
    }

    /// Validates the rule and every channel it references.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidRule` or `AlertError::InvalidChannel`.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(invalid_rule("rule id cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(invalid_rule("rule name cannot be empty"));
        }
        if self.name.len() > Self::MAX_NAME_LENGTH {
            return Err(invalid_rule(format!(
                "rule name exceeds maximum length of {}",
                Self::MAX_NAME_LENGTH
            )));
        }
        if self.cooldown_minutes == 0 {
            return Err(invalid_rule("cooldown_minutes must be at least 1"));
        }
        if !self.threshold_value.is_finite() {
            return Err(invalid_rule("threshold must be a finite number"));
        }
        for channel in &self.channels {
            channel.config.validate()?;
        }
        Ok(())
    }
}

fn invalid_rule(reason: impl Into<String>) -> AlertError {
    AlertError::InvalidRule {
        reason: reason.into(),
    }
}

/// Builder for creating [`AlertRule`] instances.
#[derive(Debug)]
pub struct AlertRuleBuilder {
    id: Option<String>,
    name: String,
    scope_unit_id: Option<String>,
    metric_type: MetricType,
    operator: ComparisonOperator,
    threshold_value: f64,
    priority: Priority,
    cooldown_minutes: u32,
    channels: Vec<RuleChannel>,
    enabled: bool,
}

impl AlertRuleBuilder {
    /// Default cooldown for built rules.
    pub const DEFAULT_COOLDOWN_MINUTES: u32 = 5;

    fn new(
        name: impl Into<String>,
        metric_type: MetricType,
        operator: ComparisonOperator,
        threshold_value: f64,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            scope_unit_id: None,
            metric_type,
            operator,
            threshold_value,
            priority: Priority::default(),
            cooldown_minutes: Self::DEFAULT_COOLDOWN_MINUTES,
            channels: Vec::new(),
            enabled: true,
        }
    }

    /// Sets an explicit rule id (a random one is generated otherwise).
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Restricts the rule to a single unit.
    #[must_use]
    pub fn scope(mut self, unit_id: impl Into<String>) -> Self {
        self.scope_unit_id = Some(unit_id.into());
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the cooldown in minutes.
    #[must_use]
    pub const fn cooldown_minutes(mut self, minutes: u32) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    /// Adds an enabled channel.
    #[must_use]
    pub fn channel(mut self, config: ChannelConfig) -> Self {
        self.channels.push(RuleChannel::new(config));
        self
    }

    /// Adds a channel with explicit enabled flag.
    #[must_use]
    pub fn rule_channel(mut self, channel: RuleChannel) -> Self {
        self.channels.push(channel);
        self
    }

    /// Sets whether the rule is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builds and validates the rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule fails validation.
    pub fn build(self) -> Result<AlertRule> {
        let rule = AlertRule {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: self.name,
            scope_unit_id: self.scope_unit_id,
            metric_type: self.metric_type,
            operator: self.operator,
            threshold_value: self.threshold_value,
            priority: self.priority,
            cooldown_minutes: self.cooldown_minutes,
            channels: self.channels,
            enabled: self.enabled,
        };
        rule.validate()?;
        Ok(rule)
    }
}

/// One firing of a rule for one unit; the unit of dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Unique identifier of this alert.
    pub id: String,
    /// The rule that matched.
    pub rule: AlertRule,
    /// The sample that triggered the rule.
    pub sample: Sample,
    /// When the rule was evaluated.
    pub evaluated_at: DateTime<Utc>,
}

impl Alert {
    /// Creates an alert for a rule and its triggering sample.
    #[must_use]
    pub fn new(rule: &AlertRule, sample: &Sample, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rule: rule.clone(),
            sample: sample.clone(),
            evaluated_at,
        }
    }

    /// Returns the alert priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.rule.priority
    }

    /// Returns the unit id.
    #[must_use]
    pub fn unit_id(&self) -> &str {
        &self.sample.unit_id
    }

    /// Returns the short title, e.g. `[CRITICAL] High CPU`.
    #[must_use]
    pub fn title(&self) -> String {
        format!("[{}] {}", self.rule.priority.tag(), self.rule.name)
    }

    /// Returns a one-line description of what crossed which threshold.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{metric} on {unit} is {value} (threshold {op} {threshold})",
            metric = self.sample.metric_type,
            unit = self.sample.unit_name,
            value = self.sample.value,
            op = self.rule.operator,
            threshold = self.rule.threshold_value,
        )
    }
}

/// Final outcome of dispatching one alert to one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    /// Delivered.
    Sent,
    /// Delivery failed after all allowed attempts.
    Failed,
    /// Deliberately not delivered (cooldown, rate limit, disabled channel).
    Suppressed,
}

impl DispatchStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Suppressed => "suppressed",
        }
    }
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Suppression reason for a disabled channel.
pub const REASON_CHANNEL_DISABLED: &str = "channel temporarily disabled";
/// Suppression reason for an exceeded rate limit.
pub const REASON_RATE_LIMITED: &str = "rate limit exceeded";
/// Suppression reason for an active cooldown.
pub const REASON_COOLDOWN: &str = "cooldown active";

/// Recorded outcome of one (alert, channel) dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchAttempt {
    /// The alert this attempt belongs to.
    pub alert_id: String,
    /// The rule that fired.
    pub rule_id: String,
    /// The unit the alert is about.
    pub unit_id: String,
    /// The channel type.
    pub channel_type: ChannelType,
    /// Final status with retries collapsed.
    pub status: DispatchStatus,
    /// Number of delivery attempts made (0 when suppressed).
    pub attempt_count: u32,
    /// Failure message or suppression reason.
    #[serde(default)]
    pub error: Option<String>,
    /// When the outcome was decided.
    pub timestamp: DateTime<Utc>,
}

impl DispatchAttempt {
    fn base(alert: &Alert, channel_type: ChannelType, status: DispatchStatus) -> Self {
        Self {
            alert_id: alert.id.clone(),
            rule_id: alert.rule.id.clone(),
            unit_id: alert.sample.unit_id.clone(),
            channel_type,
            status,
            attempt_count: 0,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates a `sent` record.
    #[must_use]
    pub fn sent(alert: &Alert, channel_type: ChannelType, attempt_count: u32) -> Self {
        let mut attempt = Self::base(alert, channel_type, DispatchStatus::Sent);
        attempt.attempt_count = attempt_count;
        attempt
    }

    /// Creates a `failed` record.
    #[must_use]
    pub fn failed(
        alert: &Alert,
        channel_type: ChannelType,
        attempt_count: u32,
        error: impl Into<String>,
    ) -> Self {
        let mut attempt = Self::base(alert, channel_type, DispatchStatus::Failed);
        attempt.attempt_count = attempt_count;
        attempt.error = Some(error.into());
        attempt
    }

    /// Creates a `suppressed` record.
    #[must_use]
    pub fn suppressed(alert: &Alert, channel_type: ChannelType, reason: impl Into<String>) -> Self {
        let mut attempt = Self::base(alert, channel_type, DispatchStatus::Suppressed);
        attempt.error = Some(reason.into());
        attempt
    }
}

/// Health of one channel type as tracked by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelHealth {
    /// The channel type.
    pub channel_type: ChannelType,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Set while the channel is temporarily disabled.
    #[serde(default)]
    pub disabled_until: Option<DateTime<Utc>>,
    /// Message of the most recent failure.
    #[serde(default)]
    pub last_error: Option<String>,
    /// When the channel last delivered successfully.
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
}

impl ChannelHealth {
    /// Creates a healthy record.
    #[must_use]
    pub const fn healthy(channel_type: ChannelType) -> Self {
        Self {
            channel_type,
            consecutive_failures: 0,
            disabled_until: None,
            last_error: None,
            last_success_at: None,
        }
    }

    /// Returns true if the channel is disabled at `now`.
    #[must_use]
    pub fn is_disabled_at(&self, now: DateTime<Utc>) -> bool {
        self.disabled_until.is_some_and(|until| now < until)
    }
}
