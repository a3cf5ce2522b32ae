//! Chat webhook messages (Slack-compatible attachments).

use serde::{Deserialize, Serialize};

use super::Notice;
use crate::types::ChatConfig;

/// A chat webhook message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Channel override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Bot display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Fallback text for clients that do not render attachments.
    pub text: String,
    /// A single attachment carrying the severity color and fields.
    pub attachments: Vec<ChatAttachment>,
}

/// A colored attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatAttachment {
    /// `danger`, `warning` or `good`.
    pub color: String,
    /// Attachment title.
    pub title: String,
    /// Attachment text.
    pub text: String,
    /// Structured fields.
    pub fields: Vec<ChatField>,
    /// Unix timestamp of the observation.
    pub ts: i64,
}

/// One structured field of an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatField {
    /// Field label.
    pub title: String,
    /// Field value.
    pub value: String,
    /// Whether the field may be shown side by side with others.
    pub short: bool,
}

impl ChatMessage {
    /// Renders a notice as a chat message.
    #[must_use]
    pub fn render(notice: &Notice, config: &ChatConfig) -> Self {
        let fields = notice
            .fields
            .iter()
            .map(|(title, value)| ChatField {
                title: title.clone(),
                value: value.clone(),
                short: value.len() <= 40,
            })
            .collect();

        Self {
            channel: config.channel.clone(),
            username: config.username.clone(),
            text: notice.title.clone(),
            attachments: vec![ChatAttachment {
                color: notice.priority.severity().chat_color().to_string(),
                title: notice.title.clone(),
                text: notice.message.clone(),
                fields,
                ts: notice.timestamp.timestamp(),
            }],
        }
    }

    /// Returns the attachment color.
    #[must_use]
    pub fn color(&self) -> Option<&str> {
        self.attachments.first().map(|a| a.color.as_str())
    }
}
