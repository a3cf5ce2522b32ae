//! Boundaries to the engine's external collaborators.
//!
//! The engine consumes samples from a [`MetricSource`], rules from a
//! [`RuleStore`] and writes outcomes to an [`AlertRecorder`]. In-memory
//! implementations live here as well; file-backed ones are provided by the
//! daemon.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use parking_lot::{Mutex, RwLock};

use crate::error::{AlertError, Result};
use crate::types::{AlertRule, DispatchAttempt, Sample};

/// Supplies one batch of samples per poll.
pub trait MetricSource: Send + Sync + fmt::Debug {
    /// Polls every unit that can currently be read.
    ///
    /// Partial unavailability is not an error: the source returns the
    /// subset of units it could read. An error means nothing was readable.
    fn poll(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Sample>>> + Send + '_>>;
}

/// Supplies the active rule set.
pub trait RuleStore: Send + Sync + fmt::Debug {
    /// Returns the complete set of enabled rules, or an error if the full
    /// set cannot be read.
    fn list_enabled_rules(&self) -> Pin<Box<dyn Future<Output = Result<Vec<AlertRule>>> + Send + '_>>;
}

/// Persists dispatch outcomes.
pub trait AlertRecorder: Send + Sync + fmt::Debug {
    /// Appends one dispatch outcome.
    fn record<'a>(
        &'a self,
        attempt: &'a DispatchAttempt,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Returns up to `limit` most recent outcomes, newest first.
    ///
    /// Recorders that cannot read back return an empty list.
    fn recent(&self, limit: usize) -> Pin<Box<dyn Future<Output = Result<Vec<DispatchAttempt>>> + Send + '_>> {
        let _ = limit;
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// A metric source returning whatever samples were last pushed into it.
#[derive(Debug, Default)]
pub struct StaticMetricSource {
    samples: RwLock<Vec<Sample>>,
}

impl StaticMetricSource {
    /// Creates a source with the given samples.
    #[must_use]
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples: RwLock::new(samples),
        }
    }

    /// Replaces the samples returned by the next poll.
    pub fn set(&self, samples: Vec<Sample>) {
        *self.samples.write() = samples;
    }
}

impl MetricSource for StaticMetricSource {
    fn poll(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Sample>>> + Send + '_>> {
        Box::pin(async move { Ok(self.samples.read().clone()) })
    }
}

/// An in-memory rule store.
#[derive(Debug, Default)]
pub struct StaticRuleStore {
    rules: RwLock<Vec<AlertRule>>,
    unavailable: RwLock<Option<String>>,
}

impl StaticRuleStore {
    /// Creates a store with the given rules.
    #[must_use]
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
            unavailable: RwLock::new(None),
        }
    }

    /// Replaces the rule set.
    pub fn set_rules(&self, rules: Vec<AlertRule>) {
        *self.rules.write() = rules;
    }

    /// Makes the store report unavailability until cleared with `None`.
    pub fn set_unavailable(&self, reason: Option<String>) {
        *self.unavailable.write() = reason;
    }
}

impl RuleStore for StaticRuleStore {
    fn list_enabled_rules(&self) -> Pin<Box<dyn Future<Output = Result<Vec<AlertRule>>> + Send + '_>> {
        Box::pin(async move {
            if let Some(reason) = self.unavailable.read().clone() {
                return Err(AlertError::RuleStoreUnavailable { reason });
            }
            Ok(self
                .rules
                .read()
                .iter()
                .filter(|r| r.enabled)
                .cloned()
                .collect())
        })
    }
}

/// A recorder keeping the most recent outcomes in memory.
#[derive(Debug)]
pub struct MemoryRecorder {
    capacity: usize,
    attempts: Mutex<VecDeque<DispatchAttempt>>,
}

impl MemoryRecorder {
    /// Default number of outcomes retained.
    pub const DEFAULT_CAPACITY: usize = 10_000;

    /// Creates a recorder retaining up to `capacity` outcomes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            attempts: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns every retained outcome, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<DispatchAttempt> {
        self.attempts.lock().iter().cloned().collect()
    }

    /// Returns the number of retained outcomes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.lock().is_empty()
    }

    /// Appends an outcome, evicting the oldest when full.
    pub fn push(&self, attempt: DispatchAttempt) {
        let mut attempts = self.attempts.lock();
        if attempts.len() == self.capacity {
            attempts.pop_front();
        }
        attempts.push_back(attempt);
    }

    /// Returns up to `limit` most recent outcomes, newest first.
    #[must_use]
    pub fn newest(&self, limit: usize) -> Vec<DispatchAttempt> {
        self.attempts.lock().iter().rev().take(limit).cloned().collect()
    }
}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl AlertRecorder for MemoryRecorder {
    fn record<'a>(
        &'a self,
        attempt: &'a DispatchAttempt,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.push(attempt.clone());
            Ok(())
        })
    }

    fn recent(&self, limit: usize) -> Pin<Box<dyn Future<Output = Result<Vec<DispatchAttempt>>> + Send + '_>> {
        Box::pin(async move { Ok(self.newest(limit)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Alert, ChannelType, ComparisonOperator, MetricType};
    use chrono::Utc;

    fn rule(name: &str, enabled: bool) -> AlertRule {
        AlertRule::builder(name, MetricType::Cpu, ComparisonOperator::GreaterThan, 80.0)
            .id(name)
            .enabled(enabled)
            .build()
            .unwrap()
    }

    fn attempt(n: usize) -> DispatchAttempt {
        let rule = rule(&format!("r{n}"), true);
        let sample = Sample::new("u", "u", MetricType::Cpu, 90.0);
        DispatchAttempt::sent(&Alert::new(&rule, &sample, Utc::now()), ChannelType::Webhook, 1)
    }

    #[tokio::test]
    async fn rule_store_filters_disabled() {
        let store = StaticRuleStore::new(vec![rule("a", true), rule("b", false)]);
        let rules = store.list_enabled_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "a");
    }

    #[tokio::test]
    async fn rule_store_unavailable() {
        let store = StaticRuleStore::new(vec![rule("a", true)]);
        store.set_unavailable(Some("db down".to_string()));
        assert!(matches!(
            store.list_enabled_rules().await,
            Err(AlertError::RuleStoreUnavailable { .. })
        ));
        store.set_unavailable(None);
        assert!(store.list_enabled_rules().await.is_ok());
    }

    #[tokio::test]
    async fn static_source_returns_current_samples() {
        let source = StaticMetricSource::default();
        assert!(source.poll().await.unwrap().is_empty());
        source.set(vec![Sample::new("u1", "web", MetricType::Memory, 40.0)]);
        assert_eq!(source.poll().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn memory_recorder_is_bounded() {
        let recorder = MemoryRecorder::new(2);
        for n in 0..3 {
            recorder.record(&attempt(n)).await.unwrap();
        }
        assert_eq!(recorder.len(), 2);
        let recent = recorder.recent(10).await.unwrap();
        assert_eq!(recent[0].rule_id, "r2");
        assert_eq!(recent[1].rule_id, "r1");
    }
}
