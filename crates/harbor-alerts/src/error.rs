//! Error types for the harbor-alerts crate.

use std::fmt;

use thiserror::Error;

/// Errors that can occur in the alerting engine.
#[derive(Debug, Error)]
pub enum AlertError {
    /// Invalid alert rule configuration.
    #[error("invalid alert rule: {reason}")]
    InvalidRule {
        /// The reason the rule is invalid.
        reason: String,
    },

    /// Invalid notification channel configuration.
    #[error("invalid channel config: {reason}")]
    InvalidChannel {
        /// The reason the channel config is invalid.
        reason: String,
    },

    /// Invalid engine configuration.
    #[error("invalid config: {reason}")]
    InvalidConfig {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// The rule store could not produce a complete rule set.
    #[error("rule store unavailable: {reason}")]
    RuleStoreUnavailable {
        /// The reason the store is unavailable.
        reason: String,
    },

    /// The metric source could not be polled at all.
    #[error("metric source unavailable: {reason}")]
    SourceUnavailable {
        /// The reason the source is unavailable.
        reason: String,
    },

    /// The expiring key/value store backing cooldowns failed.
    #[error("cooldown store error: {reason}")]
    CooldownStore {
        /// The reason the operation failed.
        reason: String,
    },

    /// The alert recorder rejected a dispatch attempt.
    #[error("recorder error: {reason}")]
    Recorder {
        /// The reason the record failed.
        reason: String,
    },

    /// No transport is registered for a channel type.
    #[error("no transport registered for channel type {channel}")]
    TransportMissing {
        /// The channel type without a transport.
        channel: String,
    },

    /// A background engine task failed.
    #[error("engine task failed: {reason}")]
    Task {
        /// The join error.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;

/// Whether a transport failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts, 5xx responses, connection resets.
    Retriable,
    /// Authentication or validation failures, malformed configuration.
    Terminal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retriable => write!(f, "retriable"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// A failed delivery attempt reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} transport failure: {message}")]
pub struct TransportError {
    /// Classification driving the retry decision.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
}

impl TransportError {
    /// Creates a retriable failure.
    #[must_use]
    pub fn retriable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Retriable,
            message: message.into(),
        }
    }

    /// Creates a terminal failure.
    #[must_use]
    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Terminal,
            message: message.into(),
        }
    }

    /// Returns true if the attempt may be retried.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self.kind, FailureKind::Retriable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_rule() {
        let err = AlertError::InvalidRule {
            reason: "empty name".to_string(),
        };
        assert_eq!(err.to_string(), "invalid alert rule: empty name");
    }

    #[test]
    fn error_display_invalid_channel() {
        let err = AlertError::InvalidChannel {
            reason: "no recipients".to_string(),
        };
        assert_eq!(err.to_string(), "invalid channel config: no recipients");
    }

    #[test]
    fn error_display_rule_store_unavailable() {
        let err = AlertError::RuleStoreUnavailable {
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "rule store unavailable: connection refused"
        );
    }

    #[test]
    fn error_display_transport_missing() {
        let err = AlertError::TransportMissing {
            channel: "email".to_string(),
        };
        assert_eq!(err.to_string(), "no transport registered for channel type email");
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json");
        assert!(json_err.is_err());
        let alert_err: AlertError = json_err.unwrap_err().into();
        assert!(matches!(alert_err, AlertError::SerializationError(_)));
    }

    #[test]
    fn transport_error_classification() {
        let retriable = TransportError::retriable("timed out");
        assert!(retriable.is_retriable());
        assert_eq!(retriable.to_string(), "retriable transport failure: timed out");

        let terminal = TransportError::terminal("401 unauthorized");
        assert!(!terminal.is_retriable());
        assert_eq!(terminal.kind, FailureKind::Terminal);
    }
}
