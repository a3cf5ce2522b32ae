//! File-backed implementations of the engine's collaborators.
//!
//! - [`FileRuleStore`] re-reads a JSON rule file on every pass
//! - [`FileMetricSource`] reads the latest samples written by a collector
//! - [`JsonlRecorder`] appends dispatch outcomes to a JSON-lines history

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use harbor_alerts::{
    AlertError, AlertRecorder, AlertRule, DispatchAttempt, MemoryRecorder, MetricSource, RuleStore,
    Sample,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{MonitorError, Result};

/// Parses and validates a rule file.
///
/// Rules without `cooldownMinutes` get `default_cooldown_minutes`. Any
/// invalid rule or duplicate id rejects the whole file.
///
/// # Errors
///
/// Returns `MonitorError::Rules` describing the first problem found.
pub fn parse_rules(content: &str, default_cooldown_minutes: u32) -> Result<Vec<AlertRule>> {
    let entries: Vec<Value> = serde_json::from_str(content)
        .map_err(|e| MonitorError::Rules(format!("rules file is not a JSON array: {e}")))?;

    let mut rules = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();
    for (index, mut entry) in entries.into_iter().enumerate() {
        if let Value::Object(fields) = &mut entry {
            fields
                .entry("cooldownMinutes")
                .or_insert_with(|| Value::from(default_cooldown_minutes));
        }

        let rule: AlertRule = serde_json::from_value(entry)
            .map_err(|e| MonitorError::Rules(format!("rule #{index}: {e}")))?;
        rule.validate()
            .map_err(|e| MonitorError::Rules(format!("rule '{}': {e}", rule.id)))?;
        if !seen.insert(rule.id.clone()) {
            return Err(MonitorError::Rules(format!("duplicate rule id '{}'", rule.id)));
        }
        rules.push(rule);
    }
    Ok(rules)
}

/// Reads and validates a rule file from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read or any rule is invalid.
pub fn load_rules(path: impl AsRef<Path>, default_cooldown_minutes: u32) -> Result<Vec<AlertRule>> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        MonitorError::Rules(format!(
            "failed to read rules file '{}': {}",
            path.as_ref().display(),
            e
        ))
    })?;
    parse_rules(&content, default_cooldown_minutes)
}

/// A rule store reading a JSON array of rules.
///
/// The file is read on every pass, so edits take effect on the next tick.
/// A file that cannot be read or contains an invalid rule makes the whole
/// store unavailable for that pass.
#[derive(Debug, Clone)]
pub struct FileRuleStore {
    path: PathBuf,
    default_cooldown_minutes: u32,
}

impl FileRuleStore {
    /// Creates a store over `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, default_cooldown_minutes: u32) -> Self {
        Self {
            path: path.into(),
            default_cooldown_minutes,
        }
    }

    /// Returns the rule file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RuleStore for FileRuleStore {
    fn list_enabled_rules(
        &self,
    ) -> Pin<Box<dyn Future<Output = harbor_alerts::Result<Vec<AlertRule>>> + Send + '_>> {
        Box::pin(async move {
            let unavailable = |reason: String| AlertError::RuleStoreUnavailable { reason };

            let content = tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| unavailable(format!("{}: {e}", self.path.display())))?;
            let rules = parse_rules(&content, self.default_cooldown_minutes)
                .map_err(|e| unavailable(e.to_string()))?;

            Ok(rules.into_iter().filter(|r| r.enabled).collect())
        })
    }
}

/// A metric source reading a JSON array of samples.
///
/// Entries that do not parse are skipped, so one malformed unit never hides
/// the others. Samples older than `max_age` are dropped; a file holding
/// samples but none fresh means the collector has stopped, and fails the
/// poll like an unreadable file does.
#[derive(Debug, Clone)]
pub struct FileMetricSource {
    path: PathBuf,
    max_age: Duration,
}

impl FileMetricSource {
    /// Creates a source over `path` ignoring samples older than `max_age`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
        }
    }

    /// Returns the samples observed within `max_age` of `now`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::SourceUnavailable` if the file cannot be read, or
    /// if it holds samples and every one of them is stale.
    pub async fn poll_at(&self, now: DateTime<Utc>) -> harbor_alerts::Result<Vec<Sample>> {
        let unavailable = |reason: String| AlertError::SourceUnavailable { reason };

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| unavailable(format!("{}: {e}", self.path.display())))?;
        let samples = parse_samples(&content).map_err(|e| unavailable(e.to_string()))?;

        let total = samples.len();
        let cutoff = chrono::Duration::from_std(self.max_age)
            .map_or(DateTime::<Utc>::MIN_UTC, |age| now - age);
        let fresh: Vec<Sample> = samples
            .into_iter()
            .filter(|s| s.observed_at >= cutoff)
            .collect();

        let stale = total - fresh.len();
        if stale > 0 {
            warn!(stale, max_age_secs = self.max_age.as_secs(), "dropping stale samples");
        }
        if total > 0 && fresh.is_empty() {
            return Err(unavailable(format!(
                "{}: no sample newer than {}s",
                self.path.display(),
                self.max_age.as_secs()
            )));
        }

        debug!(samples = fresh.len(), "polled sample file");
        Ok(fresh)
    }
}

/// Parses samples, skipping entries that are not valid samples.
///
/// # Errors
///
/// Returns an error if the content is not a JSON array.
pub fn parse_samples(content: &str) -> Result<Vec<Sample>> {
    let entries: Vec<Value> = serde_json::from_str(content)?;
    let mut samples = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<Sample>(entry) {
            Ok(sample) => samples.push(sample),
            Err(e) => warn!(index, error = %e, "skipping malformed sample"),
        }
    }
    Ok(samples)
}

impl MetricSource for FileMetricSource {
    fn poll(&self) -> Pin<Box<dyn Future<Output = harbor_alerts::Result<Vec<Sample>>> + Send + '_>> {
        Box::pin(self.poll_at(Utc::now()))
    }
}

/// Appends dispatch outcomes to a JSON-lines file.
///
/// Recent outcomes are also kept in memory for the admin surface. On open
/// only the tail of an existing history file is read back, so startup cost
/// does not grow with the history.
#[derive(Debug)]
pub struct JsonlRecorder {
    path: PathBuf,
    writer: Mutex<()>,
    recent: MemoryRecorder,
}

impl JsonlRecorder {
    /// Outcomes kept in memory.
    pub const RECENT_CAPACITY: usize = 1000;

    /// Bytes read from the end of an existing history file on open.
    pub const TAIL_BYTES: u64 = 1024 * 1024;

    /// Opens (or prepares to create) the history file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let recent = MemoryRecorder::new(Self::RECENT_CAPACITY);

        for attempt in load_tail(&path, Self::RECENT_CAPACITY, Self::TAIL_BYTES)? {
            recent.push(attempt);
        }

        Ok(Self {
            path,
            writer: Mutex::new(()),
            recent,
        })
    }

    /// Returns the history file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, attempt: &DispatchAttempt) -> Result<()> {
        let mut line = serde_json::to_vec(attempt)?;
        line.push(b'\n');

        let _guard = self.writer.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Reads at most the last `capacity` attempts from the final `max_bytes` of
/// a history file, oldest first. A missing file yields no attempts.
fn load_tail(path: &Path, capacity: usize, max_bytes: u64) -> Result<Vec<DispatchAttempt>> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let len = file.metadata()?.len();
    let truncated = len > max_bytes;
    if truncated {
        file.seek(SeekFrom::Start(len - max_bytes))?;
    }

    let mut lines = BufReader::new(file).lines();
    if truncated {
        // Starts mid-line.
        lines.next().transpose()?;
    }

    let mut tail = VecDeque::with_capacity(capacity);
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if tail.len() == capacity {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    let mut attempts = Vec::with_capacity(tail.len());
    for line in tail {
        match serde_json::from_str::<DispatchAttempt>(&line) {
            Ok(attempt) => attempts.push(attempt),
            Err(e) => warn!(error = %e, "skipping unreadable history line"),
        }
    }
    debug!(loaded = attempts.len(), truncated, "loaded dispatch history");
    Ok(attempts)
}

impl AlertRecorder for JsonlRecorder {
    fn record<'a>(
        &'a self,
        attempt: &'a DispatchAttempt,
    ) -> Pin<Box<dyn Future<Output = harbor_alerts::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.recent.push(attempt.clone());
            self.append(attempt).await.map_err(|e| AlertError::Recorder {
                reason: e.to_string(),
            })
        })
    }

    fn recent(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = harbor_alerts::Result<Vec<DispatchAttempt>>> + Send + '_>> {
        Box::pin(async move { Ok(self.recent.newest(limit)) })
    }
}
