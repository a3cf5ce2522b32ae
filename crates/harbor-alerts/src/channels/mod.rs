//! Notification channels for alert delivery.
//!
//! Delivery is split in two steps. A [`Notice`] is the channel-neutral
//! content of a notification (a single alert, a digest or an operator test).
//! [`Payload::render`] turns it into the wire format of one channel type,
//! and a [`Transport`] delivers the payload, reporting failures with a
//! retriable/terminal classification.

pub mod chat;
pub mod email;
pub mod http;
pub mod webhook;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::TransportError;
use crate::types::{Alert, ChannelConfig, ChannelType, Priority};

pub use chat::ChatMessage;
pub use email::{EmailMessage, SmtpTransport};
pub use http::HttpTransport;
pub use webhook::WebhookMessage;

/// Channel-neutral content of a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    /// Short title, e.g. `[CRITICAL] High CPU`.
    pub title: String,
    /// Name of the rule (or digest/test label).
    pub rule_name: String,
    /// Priority driving severity markers.
    pub priority: Priority,
    /// One-line description.
    pub message: String,
    /// Ordered key/value details.
    pub fields: Vec<(String, String)>,
    /// The unit concerned, if there is exactly one.
    pub unit_id: Option<String>,
    /// When the condition was observed.
    pub timestamp: DateTime<Utc>,
}

impl Notice {
    /// Builds the notice for a single alert.
    #[must_use]
    pub fn from_alert(alert: &Alert) -> Self {
        let rule = &alert.rule;
        let sample = &alert.sample;
        Self {
            title: alert.title(),
            rule_name: rule.name.clone(),
            priority: rule.priority,
            message: alert.summary(),
            fields: vec![
                ("Rule".to_string(), rule.name.clone()),
                ("Metric".to_string(), sample.metric_type.to_string()),
                ("Value".to_string(), sample.value.to_string()),
                (
                    "Threshold".to_string(),
                    format!("{} {}", rule.operator, rule.threshold_value),
                ),
                (
                    "Unit".to_string(),
                    format!("{} ({})", sample.unit_name, sample.unit_id),
                ),
            ],
            unit_id: Some(sample.unit_id.clone()),
            timestamp: sample.observed_at,
        }
    }

    /// Builds the notice sent by an operator channel test.
    #[must_use]
    pub fn test(channel: ChannelType) -> Self {
        Self {
            title: format!("[TEST] harbor {channel} channel"),
            rule_name: "channel test".to_string(),
            priority: Priority::Low,
            message: format!("Test notification for the {channel} channel."),
            fields: vec![("Channel".to_string(), channel.to_string())],
            unit_id: None,
            timestamp: Utc::now(),
        }
    }
}

/// A notification rendered for one channel type.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Email subject and body.
    Email(EmailMessage),
    /// Chat webhook message.
    Chat(ChatMessage),
    /// Generic webhook JSON body.
    Webhook(WebhookMessage),
}

impl Payload {
    /// Renders a notice for the given channel configuration.
    #[must_use]
    pub fn render(notice: &Notice, config: &ChannelConfig, source: &str) -> Self {
        match config {
            ChannelConfig::Email(_) => Self::Email(EmailMessage::render(notice)),
            ChannelConfig::Chat(chat) => Self::Chat(ChatMessage::render(notice, chat)),
            ChannelConfig::Webhook(_) => Self::Webhook(WebhookMessage::render(notice, source)),
        }
    }

    /// Returns the channel type this payload is meant for.
    #[must_use]
    pub const fn channel_type(&self) -> ChannelType {
        match self {
            Self::Email(_) => ChannelType::Email,
            Self::Chat(_) => ChannelType::Chat,
            Self::Webhook(_) => ChannelType::Webhook,
        }
    }
}

/// Delivers rendered payloads for one or more channel types.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends one payload using the channel configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] classified as retriable or terminal.
    fn send<'a>(
        &'a self,
        config: &'a ChannelConfig,
        payload: &'a Payload,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;
}

/// The transports used for each channel type.
#[derive(Debug, Clone, Default)]
pub struct Transports {
    by_type: BTreeMap<ChannelType, Arc<dyn Transport>>,
}

impl Transports {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the standard registry: SMTP for email, HTTP for chat and webhooks.
    #[must_use]
    pub fn standard() -> Self {
        let http: Arc<dyn Transport> = Arc::new(HttpTransport::new());
        Self::new()
            .with(ChannelType::Email, Arc::new(SmtpTransport::new()))
            .with(ChannelType::Chat, Arc::clone(&http))
            .with(ChannelType::Webhook, http)
    }

    /// Registers the transport for a channel type.
    #[must_use]
    pub fn with(mut self, channel: ChannelType, transport: Arc<dyn Transport>) -> Self {
        self.by_type.insert(channel, transport);
        self
    }

    /// Returns the transport for a channel type.
    #[must_use]
    pub fn get(&self, channel: ChannelType) -> Option<Arc<dyn Transport>> {
        self.by_type.get(&channel).cloned()
    }
}
