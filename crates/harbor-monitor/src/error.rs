//! Error types for harbor-monitor.

use thiserror::Error;

/// Errors raised by the monitoring daemon.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A rules file could not be loaded.
    #[error("rules error: {0}")]
    Rules(String),

    /// Engine error.
    #[error("engine error: {0}")]
    Engine(#[from] harbor_alerts::AlertError),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = MonitorError::Config("missing rules path".to_string());
        assert_eq!(err.to_string(), "configuration error: missing rules path");
    }

    #[test]
    fn from_alert_error() {
        let err: MonitorError = harbor_alerts::AlertError::InvalidConfig {
            reason: "poll_interval_secs must be greater than zero".to_string(),
        }
        .into();
        assert!(err.to_string().starts_with("engine error:"));
    }

    #[test]
    fn from_io_error() {
        let err: MonitorError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, MonitorError::Io(_)));
    }
}
