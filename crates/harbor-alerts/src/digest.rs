//! Digest aggregation of low-priority alerts.
//!
//! While digest mode is enabled, alerts below a configured priority are
//! queued instead of dispatched. Each flush merges the queue into one
//! [`Digest`] per channel configuration and empties the queue, whatever
//! happens to the digests afterwards.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::channels::Notice;
use crate::config::DigestConfig;
use crate::types::{Alert, ChannelConfig, Priority};

#[derive(Debug)]
struct DigestState {
    enabled: bool,
    interval: Duration,
    below_priority: Priority,
    queue: Vec<Alert>,
}

/// Queues low-priority alerts and merges them on flush.
#[derive(Debug)]
pub struct DigestAggregator {
    state: Mutex<DigestState>,
}

impl DigestAggregator {
    /// Creates a disabled aggregator that would batch alerts below `below_priority`.
    #[must_use]
    pub fn new(below_priority: Priority) -> Self {
        Self {
            state: Mutex::new(DigestState {
                enabled: false,
                interval: Duration::from_secs(15 * 60),
                below_priority,
                queue: Vec::new(),
            }),
        }
    }

    /// Creates an aggregator from configuration.
    #[must_use]
    pub fn from_config(config: &DigestConfig) -> Self {
        let aggregator = Self::new(config.below_priority);
        if config.enabled {
            aggregator.enable(config.interval_minutes);
        }
        aggregator
    }

    /// Enables digest mode with the given flush interval.
    pub fn enable(&self, interval_minutes: u64) {
        let mut state = self.state.lock();
        state.enabled = true;
        state.interval = Duration::from_secs(interval_minutes.max(1) * 60);
        info!(
            interval_minutes,
            below_priority = %state.below_priority,
            "digest mode enabled"
        );
    }

    /// Disables digest mode. Already queued alerts stay until the next flush.
    pub fn disable(&self) {
        self.state.lock().enabled = false;
        info!("digest mode disabled");
    }

    /// Returns true if digest mode is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Returns the flush interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.state.lock().interval
    }

    /// Returns true if the alert should be queued rather than dispatched.
    #[must_use]
    pub fn should_queue(&self, alert: &Alert) -> bool {
        let state = self.state.lock();
        state.enabled && alert.priority() < state.below_priority
    }

    /// Queues an alert for the next digest.
    pub fn queue(&self, alert: Alert) {
        let mut state = self.state.lock();
        debug!(
            alert_id = %alert.id,
            rule_id = %alert.rule.id,
            queued = state.queue.len() + 1,
            "alert queued for digest"
        );
        state.queue.push(alert);
    }

    /// Returns the number of queued alerts.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Merges queued alerts into digests and clears the queue.
    #[must_use]
    pub fn flush(&self) -> Vec<Digest> {
        self.flush_at(Utc::now())
    }

    /// Merges queued alerts into digests at `now` and clears the queue.
    ///
    /// One digest is produced per distinct enabled channel configuration,
    /// in order of first appearance.
    #[must_use]
    pub fn flush_at(&self, now: DateTime<Utc>) -> Vec<Digest> {
        let (alerts, interval) = {
            let mut state = self.state.lock();
            (std::mem::take(&mut state.queue), state.interval)
        };
        if alerts.is_empty() {
            return Vec::new();
        }

        let mut index: HashMap<ChannelConfig, usize> = HashMap::new();
        let mut groups: Vec<(ChannelConfig, Vec<Alert>)> = Vec::new();
        for alert in &alerts {
            for channel in alert.rule.enabled_channels() {
                let slot = *index.entry(channel.config.clone()).or_insert_with(|| {
                    groups.push((channel.config.clone(), Vec::new()));
                    groups.len() - 1
                });
                groups[slot].1.push(alert.clone());
            }
        }

        info!(alerts = alerts.len(), digests = groups.len(), "flushing digest");
        groups
            .into_iter()
            .map(|(channel, alerts)| Digest::new(channel, alerts, interval, now))
            .collect()
    }
}

impl Default for DigestAggregator {
    fn default() -> Self {
        Self::from_config(&DigestConfig::default())
    }
}

/// A batch of alerts merged into one message for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    /// Channel the digest is sent to.
    pub channel: ChannelConfig,
    /// The merged alerts.
    pub alerts: Vec<Alert>,
    /// Alert count per priority.
    pub by_priority: BTreeMap<Priority, usize>,
    /// Distinct unit names involved.
    pub unit_names: BTreeSet<String>,
    /// Length of the period covered.
    pub interval: Duration,
    /// When the digest was built.
    pub created_at: DateTime<Utc>,
}

impl Digest {
    fn new(channel: ChannelConfig, alerts: Vec<Alert>, interval: Duration, created_at: DateTime<Utc>) -> Self {
        let mut by_priority = BTreeMap::new();
        let mut unit_names = BTreeSet::new();
        for alert in &alerts {
            *by_priority.entry(alert.priority()).or_insert(0) += 1;
            unit_names.insert(alert.sample.unit_name.clone());
        }
        Self {
            channel,
            alerts,
            by_priority,
            unit_names,
            interval,
            created_at,
        }
    }

    /// Returns the number of alerts in the digest.
    #[must_use]
    pub fn total(&self) -> usize {
        self.alerts.len()
    }

    /// Returns the highest priority among the merged alerts.
    #[must_use]
    pub fn highest_priority(&self) -> Priority {
        self.by_priority.keys().next_back().copied().unwrap_or(Priority::Low)
    }

    /// Builds the channel-neutral notice for this digest.
    #[must_use]
    pub fn notice(&self) -> Notice {
        let total = self.total();
        let units = self.unit_names.len();
        let minutes = self.interval.as_secs() / 60;

        let mut fields = vec![("Total".to_string(), total.to_string())];
        for priority in Priority::ALL.iter().rev() {
            if let Some(count) = self.by_priority.get(priority) {
                fields.push((priority.tag().to_string(), count.to_string()));
            }
        }
        let names: Vec<&str> = self.unit_names.iter().map(String::as_str).collect();
        fields.push(("Units".to_string(), names.join(", ")));

        Notice {
            title: format!("[DIGEST] {total} alert{}", if total == 1 { "" } else { "s" }),
            rule_name: "digest".to_string(),
            priority: self.highest_priority(),
            message: format!(
                "{total} low-priority alert{} on {units} unit{} in the last {minutes} minutes",
                if total == 1 { "" } else { "s" },
                if units == 1 { "" } else { "s" },
            ),
            fields,
            unit_id: None,
            timestamp: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertRule, ComparisonOperator, MetricType, RuleChannel, Sample, WebhookConfig};

    fn webhook(url: &str) -> ChannelConfig {
        ChannelConfig::Webhook(WebhookConfig::new(url))
    }

    fn alert(priority: Priority, unit: &str, channels: &[ChannelConfig]) -> Alert {
        let mut builder = AlertRule::builder("Memory", MetricType::Memory, ComparisonOperator::GreaterThan, 70.0)
            .priority(priority);
        for channel in channels {
            builder = builder.channel(channel.clone());
        }
        let rule = builder.build().unwrap();
        let sample = Sample::new(format!("{unit}-id"), unit, MetricType::Memory, 75.0);
        Alert::new(&rule, &sample, Utc::now())
    }

    fn enabled() -> DigestAggregator {
        let aggregator = DigestAggregator::new(Priority::High);
        aggregator.enable(15);
        aggregator
    }

    #[test]
    fn disabled_never_queues() {
        let aggregator = DigestAggregator::default();
        assert!(!aggregator.is_enabled());
        assert!(!aggregator.should_queue(&alert(Priority::Low, "web", &[])));
    }

    #[test]
    fn queues_only_below_threshold_priority() {
        let aggregator = enabled();
        assert!(aggregator.should_queue(&alert(Priority::Low, "web", &[])));
        assert!(aggregator.should_queue(&alert(Priority::Medium, "web", &[])));
        assert!(!aggregator.should_queue(&alert(Priority::High, "web", &[])));
        assert!(!aggregator.should_queue(&alert(Priority::Critical, "web", &[])));
    }

    #[test]
    fn enable_sets_interval() {
        let aggregator = enabled();
        assert_eq!(aggregator.interval(), Duration::from_secs(900));
        aggregator.disable();
        assert!(!aggregator.is_enabled());
    }

    #[test]
    fn flush_merges_per_channel_and_clears() {
        let aggregator = enabled();
        let a = webhook("https://a.example.com");
        let b = webhook("https://b.example.com");

        aggregator.queue(alert(Priority::Low, "web", &[a.clone()]));
        aggregator.queue(alert(Priority::Medium, "db", &[a.clone(), b.clone()]));
        aggregator.queue(alert(Priority::Low, "web", &[a.clone()]));
        assert_eq!(aggregator.pending(), 3);

        let digests = aggregator.flush();
        assert_eq!(aggregator.pending(), 0);
        assert_eq!(digests.len(), 2);

        let first = &digests[0];
        assert_eq!(first.channel, a);
        assert_eq!(first.total(), 3);
        assert_eq!(first.by_priority.get(&Priority::Low), Some(&2));
        assert_eq!(first.by_priority.get(&Priority::Medium), Some(&1));
        assert_eq!(
            first.unit_names.iter().cloned().collect::<Vec<_>>(),
            vec!["db".to_string(), "web".to_string()]
        );

        assert_eq!(digests[1].channel, b);
        assert_eq!(digests[1].total(), 1);
    }

    #[test]
    fn disabled_channels_are_skipped() {
        let aggregator = enabled();
        let rule = AlertRule::builder("Memory", MetricType::Memory, ComparisonOperator::GreaterThan, 70.0)
            .priority(Priority::Low)
            .rule_channel(RuleChannel::new(webhook("https://a.example.com")).enabled(false))
            .build()
            .unwrap();
        let sample = Sample::new("u", "web", MetricType::Memory, 75.0);
        aggregator.queue(Alert::new(&rule, &sample, Utc::now()));

        assert!(aggregator.flush().is_empty());
        assert_eq!(aggregator.pending(), 0);
    }

    #[test]
    fn empty_flush_is_empty() {
        assert!(enabled().flush().is_empty());
    }

    #[test]
    fn notice_summarizes_counts_and_units() {
        let aggregator = enabled();
        let a = webhook("https://a.example.com");
        aggregator.queue(alert(Priority::Low, "web", &[a.clone()]));
        aggregator.queue(alert(Priority::Medium, "cache", &[a]));

        let digest = aggregator.flush().remove(0);
        let notice = digest.notice();
        assert_eq!(notice.title, "[DIGEST] 2 alerts");
        assert_eq!(notice.priority, Priority::Medium);
        assert!(notice.unit_id.is_none());
        assert!(notice.fields.contains(&("Total".to_string(), "2".to_string())));
        assert!(notice.fields.contains(&("MEDIUM".to_string(), "1".to_string())));
        assert!(notice.fields.contains(&("Units".to_string(), "cache, web".to_string())));
        assert!(notice.message.contains("2 units"));
    }
}
