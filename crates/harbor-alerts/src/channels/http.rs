//! HTTP POST delivery for chat and generic webhooks.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

use super::{Payload, Transport};
use crate::error::TransportError;
use crate::types::ChannelConfig;

/// Longest response body excerpt kept in error messages.
const MAX_ERROR_BODY: usize = 256;

/// Posts JSON payloads to chat and webhook endpoints.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport using an existing client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn post<T: Serialize + Sync>(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &T,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .post(url)
            .headers(header_map(headers)?)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;

        let status = response.status();
        if status.is_success() {
            debug!(url, status = status.as_u16(), "webhook accepted payload");
            return Ok(());
        }

        let mut text = response.text().await.unwrap_or_default();
        if text.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }
        Err(classify_status(status, &text))
    }
}

/// Builds request headers from configured key/value pairs.
///
/// # Errors
///
/// Returns a terminal error for header names or values HTTP cannot carry.
pub fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| TransportError::terminal(format!("invalid header name '{key}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::terminal(format!("invalid value for header '{key}': {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Classifies a non-success HTTP status.
///
/// Request timeouts, throttling and server errors are retriable; every other
/// status (authentication, validation) is terminal.
#[must_use]
pub fn classify_status(status: StatusCode, body: &str) -> TransportError {
    let message = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        TransportError::retriable(message)
    } else {
        TransportError::terminal(message)
    }
}

fn classify_request_error(error: &reqwest::Error) -> TransportError {
    if error.is_builder() {
        TransportError::terminal(format!("invalid request: {error}"))
    } else {
        TransportError::retriable(format!("request failed: {error}"))
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        config: &'a ChannelConfig,
        payload: &'a Payload,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        Box::pin(async move {
            match (config, payload) {
                (ChannelConfig::Chat(chat), Payload::Chat(message)) => {
                    self.post(&chat.webhook_url, &BTreeMap::new(), message).await
                }
                (ChannelConfig::Webhook(webhook), Payload::Webhook(message)) => {
                    self.post(&webhook.url, &webhook.headers, message).await
                }
                _ => Err(TransportError::terminal(format!(
                    "HTTP transport cannot send {} payload to {} channel",
                    payload.channel_type(),
                    config.channel_type()
                ))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{Notice, WebhookMessage};
    use crate::types::{ChannelType, WebhookConfig};
    use test_case::test_case;

    #[test_case(500, true ; "internal error")]
    #[test_case(502, true ; "bad gateway")]
    #[test_case(503, true ; "unavailable")]
    #[test_case(408, true ; "request timeout")]
    #[test_case(429, true ; "throttled")]
    #[test_case(400, false ; "bad request")]
    #[test_case(401, false ; "unauthorized")]
    #[test_case(403, false ; "forbidden")]
    #[test_case(404, false ; "not found")]
    #[test_case(422, false ; "unprocessable")]
    fn status_classification(code: u16, retriable: bool) {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(classify_status(status, "").is_retriable(), retriable);
    }

    #[test]
    fn status_message_includes_body() {
        let err = classify_status(StatusCode::UNAUTHORIZED, "bad token");
        assert!(err.message.contains("401"));
        assert!(err.message.contains("bad token"));
    }

    #[test]
    fn custom_headers_are_merged() {
        let headers = BTreeMap::from([
            ("Authorization".to_string(), "Bearer abc".to_string()),
            ("X-Team".to_string(), "infra".to_string()),
        ]);
        let map = header_map(&headers).unwrap();
        assert_eq!(map.get("authorization").unwrap(), "Bearer abc");
        assert_eq!(map.get("x-team").unwrap(), "infra");
    }

    #[test]
    fn invalid_header_is_terminal() {
        let headers = BTreeMap::from([("bad header".to_string(), "x".to_string())]);
        assert!(!header_map(&headers).unwrap_err().is_retriable());
    }

    #[tokio::test]
    async fn mismatched_payload_is_terminal() {
        let transport = HttpTransport::new();
        let config = ChannelConfig::Webhook(WebhookConfig::new("https://hooks.example.com"));
        let notice = Notice::test(ChannelType::Webhook);
        let payload = Payload::Chat(crate::channels::ChatMessage::render(
            &notice,
            &crate::types::ChatConfig {
                webhook_url: "https://chat.example.com".to_string(),
                channel: None,
                username: None,
            },
        ));
        let err = transport.send(&config, &payload).await.unwrap_err();
        assert!(!err.is_retriable());

        let webhook = Payload::Webhook(WebhookMessage::render(&notice, "harbor"));
        assert_eq!(webhook.channel_type(), ChannelType::Webhook);
    }
}
