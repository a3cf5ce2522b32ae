//! Daemon configuration.
//!
//! The daemon reads one JSON file holding:
//! - the alert engine settings (`engine`)
//! - where rules, samples and dispatch history live on disk
//! - how often channel health is logged

use std::path::{Path, PathBuf};
use std::time::Duration;

use harbor_alerts::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Alert engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// JSON file with the rule set.
    pub rules_path: PathBuf,
    /// JSON file with the latest samples, rewritten by the collector.
    pub samples_path: PathBuf,
    /// Samples older than this many seconds are ignored. Defaults to two
    /// poll intervals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sample_age_secs: Option<u64>,
    /// JSON-lines file dispatch outcomes are appended to.
    pub history_path: PathBuf,
    /// Seconds between channel health log lines.
    #[serde(default = "default_health_log_interval")]
    pub health_log_interval_secs: u64,
}

const fn default_health_log_interval() -> u64 {
    300
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            rules_path: PathBuf::from("/etc/harbor/rules.json"),
            samples_path: PathBuf::from("/var/lib/harbor/samples.json"),
            max_sample_age_secs: None,
            history_path: PathBuf::from("/var/lib/harbor/history.jsonl"),
            health_log_interval_secs: default_health_log_interval(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MonitorError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| MonitorError::Config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Returns the age past which a sample is considered stale.
    #[must_use]
    pub fn max_sample_age(&self) -> Duration {
        let secs = self
            .max_sample_age_secs
            .unwrap_or_else(|| self.engine.poll_interval_secs.saturating_mul(2));
        Duration::from_secs(secs)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        self.engine
            .validate()
            .map_err(|e| MonitorError::Config(e.to_string()))?;

        for (name, path) in [
            ("rules_path", &self.rules_path),
            ("samples_path", &self.samples_path),
            ("history_path", &self.history_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(MonitorError::Config(format!("{name} cannot be empty")));
            }
        }

        if self.max_sample_age_secs == Some(0) {
            return Err(MonitorError::Config(
                "max_sample_age_secs must be greater than zero".to_string(),
            ));
        }

        if self.health_log_interval_secs == 0 {
            return Err(MonitorError::Config(
                "health_log_interval_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
