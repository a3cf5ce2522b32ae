//! Generic webhook payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Notice;
use crate::types::Severity;

/// The JSON body posted to generic webhooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMessage {
    /// Severity derived from the priority.
    pub severity: Severity,
    /// Short title.
    pub title: String,
    /// Human readable description.
    pub message: String,
    /// When the condition was observed.
    pub timestamp: DateTime<Utc>,
    /// Label of the sending system.
    pub source: String,
    /// The unit concerned, `null` for digests.
    pub unit_id: Option<String>,
}

impl WebhookMessage {
    /// Renders a notice as a webhook body.
    #[must_use]
    pub fn render(notice: &Notice, source: &str) -> Self {
        Self {
            severity: notice.priority.severity(),
            title: notice.title.clone(),
            message: notice.message.clone(),
            timestamp: notice.timestamp,
            source: source.to_string(),
            unit_id: notice.unit_id.clone(),
        }
    }
}
