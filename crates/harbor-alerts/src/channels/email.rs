//! Email notifications over SMTP.

use std::fmt;
use std::fmt::Write as _;
use std::future::Future;
use std::pin::Pin;

use dashmap::DashMap;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use super::{Notice, Payload, Transport};
use crate::error::TransportError;
use crate::types::{ChannelConfig, EmailConfig};

/// A rendered email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    /// Subject line, tagged with the priority, e.g. `[CRITICAL] High CPU`.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

impl EmailMessage {
    /// Renders a notice as an email.
    #[must_use]
    pub fn render(notice: &Notice) -> Self {
        let mut body = String::new();
        let _ = writeln!(body, "{}", notice.message);
        body.push('\n');
        for (key, value) in &notice.fields {
            let _ = writeln!(body, "{key}: {value}");
        }
        let _ = writeln!(body, "Time: {}", notice.timestamp.to_rfc3339());

        Self {
            subject: notice.title.clone(),
            body,
        }
    }
}

/// Sends [`Payload::Email`] payloads through an SMTP relay.
///
/// One lettre transport (and its connection pool) is kept per distinct
/// [`EmailConfig`].
#[derive(Default)]
pub struct SmtpTransport {
    relays: DashMap<EmailConfig, AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpTransport {
    /// Creates a transport with no cached relays.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn relay_for(&self, config: &EmailConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        if let Some(relay) = self.relays.get(config) {
            return Ok(relay.clone());
        }

        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| TransportError::terminal(format!("invalid SMTP relay: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };
        builder = builder.port(config.smtp_port);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let relay = builder.build();
        debug!(host = %config.smtp_host, port = config.smtp_port, "created SMTP relay");
        self.relays.insert(config.clone(), relay.clone());
        Ok(relay)
    }
}

impl fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("relays", &self.relays.len())
            .finish()
    }
}

/// Builds the lettre message for a configured email channel.
///
/// # Errors
///
/// Returns a terminal error if an address does not parse or the message
/// cannot be assembled.
pub fn build_message(config: &EmailConfig, email: &EmailMessage) -> Result<Message, TransportError> {
    let from: Mailbox = config
        .from
        .parse()
        .map_err(|e| TransportError::terminal(format!("invalid sender '{}': {e}", config.from)))?;

    let mut builder = Message::builder().from(from).subject(email.subject.as_str());
    for recipient in &config.to {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| TransportError::terminal(format!("invalid recipient '{recipient}': {e}")))?;
        builder = builder.to(to);
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(email.body.clone())
        .map_err(|e| TransportError::terminal(format!("failed to build email: {e}")))
}

fn classify(error: &lettre::transport::smtp::Error) -> TransportError {
    if error.is_permanent() {
        TransportError::terminal(format!("SMTP rejected message: {error}"))
    } else {
        TransportError::retriable(format!("SMTP delivery failed: {error}"))
    }
}

impl Transport for SmtpTransport {
    fn send<'a>(
        &'a self,
        config: &'a ChannelConfig,
        payload: &'a Payload,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let (ChannelConfig::Email(config), Payload::Email(email)) = (config, payload) else {
                return Err(TransportError::terminal(format!(
                    "SMTP transport cannot send {} payloads",
                    payload.channel_type()
                )));
            };

            let message = build_message(config, email)?;
            let relay = self.relay_for(config)?;
            relay.send(message).await.map_err(|e| classify(&e))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Alert, AlertRule, ChatConfig, ComparisonOperator, MetricType, Priority, Sample,
    };
    use chrono::Utc;

    fn config() -> EmailConfig {
        EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            username: None,
            password: None,
            from: "Harbor <alerts@example.com>".to_string(),
            to: vec!["ops@example.com".to_string(), "oncall@example.com".to_string()],
            starttls: true,
        }
    }

    fn notice() -> Notice {
        let rule = AlertRule::builder("High CPU", MetricType::Cpu, ComparisonOperator::GreaterThan, 80.0)
            .priority(Priority::Critical)
            .build()
            .unwrap();
        let sample = Sample::new("nginx-1", "nginx", MetricType::Cpu, 85.0);
        Notice::from_alert(&Alert::new(&rule, &sample, Utc::now()))
    }

    #[test]
    fn subject_is_tagged_with_priority() {
        let email = EmailMessage::render(&notice());
        assert_eq!(email.subject, "[CRITICAL] High CPU");
    }

    #[test]
    fn body_has_rule_value_threshold_unit_and_time() {
        let email = EmailMessage::render(&notice());
        assert!(email.body.contains("Rule: High CPU"));
        assert!(email.body.contains("Value: 85"));
        assert!(email.body.contains("Threshold: > 80"));
        assert!(email.body.contains("Unit: nginx (nginx-1)"));
        assert!(email.body.contains("Time: "));
    }

    #[test]
    fn message_builds_for_valid_config() {
        let email = EmailMessage::render(&notice());
        assert!(build_message(&config(), &email).is_ok());
    }

    #[test]
    fn bad_recipient_is_terminal() {
        let mut config = config();
        config.to = vec!["not-an-address".to_string()];
        let err = build_message(&config, &EmailMessage::render(&notice())).unwrap_err();
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn mismatched_payload_is_terminal() {
        let transport = SmtpTransport::new();
        let chat = ChannelConfig::Chat(ChatConfig {
            webhook_url: "https://chat.example.com/hook".to_string(),
            channel: None,
            username: None,
        });
        let payload = Payload::Email(EmailMessage::render(&notice()));
        let err = transport.send(&chat, &payload).await.unwrap_err();
        assert!(!err.is_retriable());
    }
}
