//! Threshold evaluation of samples against rules.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::cooldown::CooldownTracker;
use crate::types::{Alert, AlertRule, Sample};

/// The outcome of one rule matching one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// The rule fired; the cooldown has already been claimed.
    Fired(Alert),
    /// The rule matched but the (rule, unit) pair is cooling down.
    Suppressed {
        /// The alert that would have fired.
        alert: Alert,
        /// End of the active cooldown, if known.
        until: Option<DateTime<Utc>>,
    },
}

impl Evaluation {
    /// Returns the alert carried by this outcome.
    #[must_use]
    pub const fn alert(&self) -> &Alert {
        match self {
            Self::Fired(alert) | Self::Suppressed { alert, .. } => alert,
        }
    }

    /// Returns true if the rule fired.
    #[must_use]
    pub const fn is_fired(&self) -> bool {
        matches!(self, Self::Fired(_))
    }
}

/// Decides which rules fire for each sample.
#[derive(Debug, Clone)]
pub struct ThresholdEvaluator {
    cooldowns: CooldownTracker,
}

impl ThresholdEvaluator {
    /// Creates an evaluator using the given cooldown tracker.
    #[must_use]
    pub const fn new(cooldowns: CooldownTracker) -> Self {
        Self { cooldowns }
    }

    /// Returns the cooldown tracker.
    #[must_use]
    pub const fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    /// Returns the rules whose scope, metric and enabled flag match the sample.
    pub fn matching_rules<'a>(
        sample: &'a Sample,
        rules: &'a [AlertRule],
    ) -> impl Iterator<Item = &'a AlertRule> + 'a {
        rules.iter().filter(move |rule| {
            rule.enabled && rule.metric_type == sample.metric_type && rule.applies_to(&sample.unit_id)
        })
    }

    /// Evaluates one sample against the rule set at the current time.
    pub async fn evaluate(&self, sample: &Sample, rules: &[AlertRule]) -> Vec<Evaluation> {
        self.evaluate_at(sample, rules, Utc::now()).await
    }

    /// Evaluates one sample against the rule set at `now`.
    ///
    /// Rules are checked sequentially. A rule whose comparison holds either
    /// claims its cooldown and fires, or is reported as suppressed.
    pub async fn evaluate_at(
        &self,
        sample: &Sample,
        rules: &[AlertRule],
        now: DateTime<Utc>,
    ) -> Vec<Evaluation> {
        let mut outcomes = Vec::new();

        for rule in Self::matching_rules(sample, rules) {
            if !rule.operator.evaluate(sample.value, rule.threshold_value) {
                continue;
            }

            let alert = Alert::new(rule, sample, now);
            let claimed = match self
                .cooldowns
                .try_fire(&rule.id, &sample.unit_id, rule.cooldown(), now)
                .await
            {
                Ok(claimed) => claimed,
                Err(e) => {
                    // Delivering twice beats losing the alert.
                    warn!(
                        rule_id = %rule.id,
                        unit_id = %sample.unit_id,
                        error = %e,
                        "cooldown store failed, firing without deduplication"
                    );
                    true
                }
            };

            if claimed {
                info!(
                    rule_id = %rule.id,
                    rule_name = %rule.name,
                    unit_id = %sample.unit_id,
                    value = sample.value,
                    threshold = rule.threshold_value,
                    alert_id = %alert.id,
                    "alert fired"
                );
                outcomes.push(Evaluation::Fired(alert));
            } else {
                let until = self
                    .cooldowns
                    .suppressed_until(&rule.id, &sample.unit_id, now)
                    .await
                    .unwrap_or(None);
                debug!(
                    rule_id = %rule.id,
                    unit_id = %sample.unit_id,
                    until = ?until,
                    "alert suppressed by cooldown"
                );
                outcomes.push(Evaluation::Suppressed { alert, until });
            }
        }

        outcomes
    }

    /// Evaluates a whole poll at `now`.
    ///
    /// Samples are grouped by unit; units are evaluated concurrently while
    /// the samples of one unit are evaluated in order.
    pub async fn evaluate_batch(
        &self,
        samples: &[Sample],
        rules: &[AlertRule],
        now: DateTime<Utc>,
    ) -> Vec<Evaluation> {
        let mut by_unit: BTreeMap<&str, Vec<&Sample>> = BTreeMap::new();
        for sample in samples {
            by_unit.entry(sample.unit_id.as_str()).or_default().push(sample);
        }

        let per_unit = by_unit.into_values().map(|unit_samples| async move {
            let mut outcomes = Vec::new();
            for sample in unit_samples {
                outcomes.extend(self.evaluate_at(sample, rules, now).await);
            }
            outcomes
        });

        join_all(per_unit).await.into_iter().flatten().collect()
    }
}
