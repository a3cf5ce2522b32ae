//! The alerting engine: poll, evaluate, dispatch.
//!
//! [`AlertEngine::run`] drives three tasks:
//!
//! - a poll loop that reads rules and samples on a fixed interval, evaluates
//!   them and pushes [`DispatchJob`]s onto a bounded queue,
//! - a digest loop that flushes queued low-priority alerts on its own timer,
//! - a dispatch loop that drains the queue, running jobs concurrently up to
//!   the dispatcher's concurrency cap.
//!
//! Cancelling the shutdown token stops both timers, flushes any pending
//! digest, and waits until every queued job has been dispatched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::admin::AdminHandle;
use crate::channels::Transports;
use crate::config::EngineConfig;
use crate::cooldown::CooldownTracker;
use crate::digest::{Digest, DigestAggregator};
use crate::dispatcher::ChannelDispatcher;
use crate::error::{AlertError, Result};
use crate::evaluator::{Evaluation, ThresholdEvaluator};
use crate::source::{AlertRecorder, MemoryRecorder, MetricSource, RuleStore};
use crate::types::{Alert, DispatchAttempt};

/// Work handed from evaluation to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchJob {
    /// A fired alert to deliver.
    Alert(Alert),
    /// An alert suppressed by cooldown; only recorded.
    Suppressed(Alert),
    /// A digest to deliver.
    Digest(Digest),
}

/// Counts for one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Samples returned by the metric source.
    pub samples: usize,
    /// Enabled rules evaluated.
    pub rules: usize,
    /// Alerts fired for immediate dispatch.
    pub fired: usize,
    /// Alerts suppressed by cooldown.
    pub suppressed: usize,
    /// Fired alerts queued for the digest.
    pub digested: usize,
    /// Why the pass was skipped, if it was.
    pub skipped: Option<String>,
}

impl PassReport {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Returns true if the pass was skipped.
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }
}

/// One evaluation pass and the jobs it produced.
#[derive(Debug, Clone, Default)]
pub struct Pass {
    /// Summary counts.
    pub report: PassReport,
    /// Jobs for the dispatch stage.
    pub jobs: Vec<DispatchJob>,
}

/// The alerting engine.
#[derive(Debug)]
pub struct AlertEngine {
    config: EngineConfig,
    source: Arc<dyn MetricSource>,
    rules: Arc<dyn RuleStore>,
    evaluator: ThresholdEvaluator,
    dispatcher: Arc<ChannelDispatcher>,
    digest: Arc<DigestAggregator>,
}

impl AlertEngine {
    /// Creates a builder.
    #[must_use]
    pub fn builder(config: EngineConfig) -> AlertEngineBuilder {
        AlertEngineBuilder::new(config)
    }

    /// Returns the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<ChannelDispatcher> {
        &self.dispatcher
    }

    /// Returns the digest aggregator.
    #[must_use]
    pub fn digest(&self) -> &Arc<DigestAggregator> {
        &self.digest
    }

    /// Returns the administrative surface.
    #[must_use]
    pub fn admin(&self) -> AdminHandle {
        AdminHandle::new(Arc::clone(&self.dispatcher), Arc::clone(&self.rules))
    }

    /// Runs one evaluation pass now.
    pub async fn evaluate_pass(&self) -> Pass {
        self.evaluate_pass_at(Utc::now()).await
    }

    /// Runs one evaluation pass at `now`.
    ///
    /// The pass is skipped when either the rule store or the metric source
    /// is unavailable; nothing is evaluated against a partial rule set.
    pub async fn evaluate_pass_at(&self, now: DateTime<Utc>) -> Pass {
        let rules = match self.rules.list_enabled_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                error!(error = %e, "rule store unavailable, skipping evaluation pass");
                return Pass {
                    report: PassReport::skipped(e.to_string()),
                    jobs: Vec::new(),
                };
            }
        };

        let samples = match self.source.poll().await {
            Ok(samples) => samples,
            Err(e) => {
                error!(error = %e, "metric source unavailable, skipping evaluation pass");
                return Pass {
                    report: PassReport::skipped(e.to_string()),
                    jobs: Vec::new(),
                };
            }
        };

        let mut report = PassReport {
            samples: samples.len(),
            rules: rules.len(),
            ..PassReport::default()
        };
        let mut jobs = Vec::new();

        for evaluation in self.evaluator.evaluate_batch(&samples, &rules, now).await {
            match evaluation {
                Evaluation::Fired(alert) if self.digest.should_queue(&alert) => {
                    report.digested += 1;
                    self.digest.queue(alert);
                }
                Evaluation::Fired(alert) => {
                    report.fired += 1;
                    jobs.push(DispatchJob::Alert(alert));
                }
                Evaluation::Suppressed { alert, .. } => {
                    report.suppressed += 1;
                    jobs.push(DispatchJob::Suppressed(alert));
                }
            }
        }

        debug!(
            samples = report.samples,
            rules = report.rules,
            fired = report.fired,
            suppressed = report.suppressed,
            digested = report.digested,
            "evaluation pass complete"
        );
        Pass { report, jobs }
    }

    /// Executes one dispatch job.
    pub async fn handle(&self, job: &DispatchJob) -> Vec<DispatchAttempt> {
        match job {
            DispatchJob::Alert(alert) => self.dispatcher.dispatch(alert).await,
            DispatchJob::Suppressed(alert) => self.dispatcher.record_suppressed(alert).await,
            DispatchJob::Digest(digest) => self.dispatcher.dispatch_digest(digest).await,
        }
    }

    /// Evaluates one pass at `now` and dispatches its jobs inline.
    pub async fn poll_once_at(&self, now: DateTime<Utc>) -> (PassReport, Vec<DispatchAttempt>) {
        let pass = self.evaluate_pass_at(now).await;
        let attempts = join_all(pass.jobs.iter().map(|job| self.handle(job)))
            .await
            .into_iter()
            .flatten()
            .collect();
        (pass.report, attempts)
    }

    /// Evaluates one pass now and dispatches its jobs inline.
    pub async fn poll_once(&self) -> (PassReport, Vec<DispatchAttempt>) {
        self.poll_once_at(Utc::now()).await
    }

    /// Flushes the digest queue and dispatches the digests inline.
    pub async fn flush_digest(&self) -> Vec<DispatchAttempt> {
        let digests = self.digest.flush();
        join_all(digests.iter().map(|d| self.dispatcher.dispatch_digest(d)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Runs the engine until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if one of the engine tasks panicked.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let (tx, rx) = mpsc::channel(self.config.dispatch_queue_capacity.max(1));

        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            digest_enabled = self.digest.is_enabled(),
            max_concurrent_dispatches = self.config.max_concurrent_dispatches,
            "alert engine starting"
        );

        let dispatch = tokio::spawn(Arc::clone(&self).dispatch_loop(rx));
        let poll = tokio::spawn(Arc::clone(&self).poll_loop(tx.clone(), shutdown.clone()));
        let digest = tokio::spawn(Arc::clone(&self).digest_loop(tx.clone(), shutdown.clone()));

        let (poll_result, digest_result) = tokio::join!(poll, digest);

        // Timers are stopped; hand over whatever is still queued for the digest.
        for pending in self.digest.flush() {
            if tx.send(DispatchJob::Digest(pending)).await.is_err() {
                warn!("dispatch queue closed before final digest flush");
                break;
            }
        }
        drop(tx);

        let dispatch_result = dispatch.await;
        info!("alert engine stopped");

        for result in [poll_result, digest_result, dispatch_result] {
            result.map_err(|e| AlertError::Task {
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    async fn poll_loop(self: Arc<Self>, tx: mpsc::Sender<DispatchJob>, shutdown: CancellationToken) {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("poll loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let pass = self.evaluate_pass().await;
                    if pass.report.fired > 0 || pass.report.suppressed > 0 {
                        info!(
                            samples = pass.report.samples,
                            fired = pass.report.fired,
                            suppressed = pass.report.suppressed,
                            digested = pass.report.digested,
                            "evaluation pass produced alerts"
                        );
                    }
                    for job in pass.jobs {
                        if tx.send(job).await.is_err() {
                            warn!("dispatch queue closed, stopping poll loop");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn digest_loop(self: Arc<Self>, tx: mpsc::Sender<DispatchJob>, shutdown: CancellationToken) {
        let period = self.config.digest_interval().max(std::time::Duration::from_secs(60));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("digest loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if !self.digest.is_enabled() && self.digest.pending() == 0 {
                        continue;
                    }
                    for digest in self.digest.flush() {
                        if tx.send(DispatchJob::Digest(digest)).await.is_err() {
                            warn!("dispatch queue closed, stopping digest loop");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn dispatch_loop(self: Arc<Self>, mut rx: mpsc::Receiver<DispatchJob>) {
        let mut in_flight = JoinSet::new();

        while let Some(job) = rx.recv().await {
            let permit = self.dispatcher.acquire_slot().await;
            let engine = Arc::clone(&self);
            in_flight.spawn(async move {
                let _permit = permit;
                engine.handle(&job).await;
            });

            while let Some(done) = in_flight.try_join_next() {
                if let Err(e) = done {
                    error!(error = %e, "dispatch task failed");
                }
            }
        }

        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                error!(error = %e, "dispatch task failed");
            }
        }
        debug!("dispatch queue drained");
    }
}

/// Builder for [`AlertEngine`].
#[derive(Debug)]
pub struct AlertEngineBuilder {
    config: EngineConfig,
    source: Option<Arc<dyn MetricSource>>,
    rules: Option<Arc<dyn RuleStore>>,
    recorder: Option<Arc<dyn AlertRecorder>>,
    transports: Option<Transports>,
    cooldowns: Option<CooldownTracker>,
}

impl AlertEngineBuilder {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            source: None,
            rules: None,
            recorder: None,
            transports: None,
            cooldowns: None,
        }
    }

    /// Sets the metric source.
    #[must_use]
    pub fn source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the rule store.
    #[must_use]
    pub fn rules(mut self, rules: Arc<dyn RuleStore>) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Sets the recorder. Defaults to an in-memory recorder.
    #[must_use]
    pub fn recorder(mut self, recorder: Arc<dyn AlertRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Sets the transports. Defaults to SMTP and HTTP.
    #[must_use]
    pub fn transports(mut self, transports: Transports) -> Self {
        self.transports = Some(transports);
        self
    }

    /// Sets the cooldown tracker. Defaults to an in-memory store.
    #[must_use]
    pub fn cooldowns(mut self, cooldowns: CooldownTracker) -> Self {
        self.cooldowns = Some(cooldowns);
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` if the configuration is invalid or
    /// the metric source or rule store is missing.
    pub fn build(self) -> Result<AlertEngine> {
        self.config.validate()?;

        let source = self.source.ok_or_else(|| AlertError::InvalidConfig {
            reason: "a metric source is required".to_string(),
        })?;
        let rules = self.rules.ok_or_else(|| AlertError::InvalidConfig {
            reason: "a rule store is required".to_string(),
        })?;
        let recorder = self
            .recorder
            .unwrap_or_else(|| Arc::new(MemoryRecorder::default()));
        let transports = self.transports.unwrap_or_else(Transports::standard);
        let cooldowns = self.cooldowns.unwrap_or_else(CooldownTracker::in_memory);

        let dispatcher = Arc::new(ChannelDispatcher::from_config(&self.config, transports, recorder));
        let digest = Arc::new(DigestAggregator::from_config(&self.config.digest));

        Ok(AlertEngine {
            config: self.config,
            source,
            rules,
            evaluator: ThresholdEvaluator::new(cooldowns),
            dispatcher,
            digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Transport;
    use crate::source::{StaticMetricSource, StaticRuleStore};
    use crate::testing::{self, GaugeTransport, ScriptedTransport};
    use crate::types::{ChannelType, DispatchStatus, Priority, REASON_COOLDOWN, REASON_RATE_LIMITED};
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct Fixture {
        engine: Arc<AlertEngine>,
        source: Arc<StaticMetricSource>,
        rules: Arc<StaticRuleStore>,
        recorder: Arc<MemoryRecorder>,
        transport: Arc<ScriptedTransport>,
    }

    fn fixture(config: EngineConfig, rules: Vec<crate::types::AlertRule>) -> Fixture {
        let source = Arc::new(StaticMetricSource::default());
        let store = Arc::new(StaticRuleStore::new(rules));
        let recorder = Arc::new(MemoryRecorder::default());
        let transport = ScriptedTransport::ok();
        let engine = AlertEngine::builder(config)
            .source(Arc::clone(&source) as Arc<dyn MetricSource>)
            .rules(Arc::clone(&store) as Arc<dyn RuleStore>)
            .recorder(Arc::clone(&recorder) as Arc<dyn AlertRecorder>)
            .transports(testing::transports(Arc::clone(&transport)))
            .build()
            .unwrap();
        Fixture {
            engine: Arc::new(engine),
            source,
            rules: store,
            recorder,
            transport,
        }
    }

    fn critical_webhook_rule() -> crate::types::AlertRule {
        testing::cpu_rule("cpu", Priority::Critical, &[testing::webhook()])
    }

    mod builder_tests {
        use super::*;

        #[test]
        fn requires_source_and_rules() {
            let err = AlertEngine::builder(EngineConfig::default()).build().unwrap_err();
            assert!(matches!(err, AlertError::InvalidConfig { .. }));
        }

        #[test]
        fn rejects_invalid_config() {
            let config = EngineConfig {
                poll_interval_secs: 0,
                ..EngineConfig::default()
            };
            let err = AlertEngine::builder(config)
                .source(Arc::new(StaticMetricSource::default()))
                .rules(Arc::new(StaticRuleStore::default()))
                .build()
                .unwrap_err();
            assert!(matches!(err, AlertError::InvalidConfig { .. }));
        }
    }

    mod pass_tests {
        use super::*;

        #[tokio::test]
        async fn fires_and_dispatches() {
            let f = fixture(EngineConfig::default(), vec![critical_webhook_rule()]);
            f.source.set(vec![testing::cpu_sample("nginx-1", 85.0)]);

            let (report, attempts) = f.engine.poll_once().await;
            assert_eq!(report.samples, 1);
            assert_eq!(report.rules, 1);
            assert_eq!(report.fired, 1);
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].status, DispatchStatus::Sent);
            assert_eq!(f.transport.calls(), 1);
        }

        #[tokio::test]
        async fn cooldown_suppression_is_recorded_not_sent() {
            let f = fixture(EngineConfig::default(), vec![critical_webhook_rule()]);
            let start = Utc::now();

            f.source.set(vec![testing::cpu_sample("nginx-1", 85.0)]);
            f.engine.poll_once_at(start).await;

            f.source.set(vec![testing::cpu_sample("nginx-1", 90.0)]);
            let (report, attempts) = f
                .engine
                .poll_once_at(start + chrono::Duration::minutes(2))
                .await;
            assert_eq!(report.suppressed, 1);
            assert_eq!(attempts[0].status, DispatchStatus::Suppressed);
            assert_eq!(attempts[0].error.as_deref(), Some(REASON_COOLDOWN));
            assert_eq!(f.transport.calls(), 1);

            let (report, _) = f
                .engine
                .poll_once_at(start + chrono::Duration::minutes(6))
                .await;
            assert_eq!(report.fired, 1);
            assert_eq!(f.transport.calls(), 2);
            assert_eq!(f.recorder.len(), 3);
        }

        #[tokio::test]
        async fn rule_store_outage_skips_pass() {
            let f = fixture(EngineConfig::default(), vec![critical_webhook_rule()]);
            f.source.set(vec![testing::cpu_sample("nginx-1", 85.0)]);
            f.rules.set_unavailable(Some("connection refused".to_string()));

            let (report, attempts) = f.engine.poll_once().await;
            assert!(report.is_skipped());
            assert!(attempts.is_empty());
            assert_eq!(f.transport.calls(), 0);

            f.rules.set_unavailable(None);
            let (report, _) = f.engine.poll_once().await;
            assert_eq!(report.fired, 1);
        }

        #[tokio::test]
        async fn rate_limit_scenario() {
            let config = EngineConfig {
                rate_limits: BTreeMap::from([(ChannelType::Webhook, 1)]),
                ..EngineConfig::default()
            };
            let rules = vec![
                testing::cpu_rule("cpu-a", Priority::Critical, &[testing::webhook()]),
                testing::cpu_rule("cpu-b", Priority::Critical, &[testing::webhook()]),
            ];
            let f = fixture(config, rules);
            let now = Utc::now();

            f.source.set(vec![testing::cpu_sample("nginx-1", 85.0)]);
            let (_, attempts) = f.engine.poll_once_at(now).await;

            let mut statuses: Vec<_> = attempts.iter().map(|a| a.status).collect();
            statuses.sort_by_key(DispatchStatus::as_str);
            assert_eq!(statuses, vec![DispatchStatus::Sent, DispatchStatus::Suppressed]);
            let suppressed = attempts
                .iter()
                .find(|a| a.status == DispatchStatus::Suppressed)
                .unwrap();
            assert_eq!(suppressed.error.as_deref(), Some(REASON_RATE_LIMITED));
        }
    }

    mod digest_tests {
        use super::*;

        fn digest_config() -> EngineConfig {
            let mut config = EngineConfig::default();
            config.digest.enabled = true;
            config
        }

        #[tokio::test]
        async fn low_priority_alerts_go_to_digest() {
            let rules = vec![
                testing::cpu_rule("low", Priority::Low, &[testing::webhook()]),
                testing::cpu_rule("crit", Priority::Critical, &[testing::webhook()]),
            ];
            let f = fixture(digest_config(), rules);
            f.source.set(vec![
                testing::cpu_sample("a", 85.0),
                testing::cpu_sample("b", 85.0),
            ]);

            let (report, attempts) = f.engine.poll_once().await;
            assert_eq!(report.fired, 2);
            assert_eq!(report.digested, 2);
            assert_eq!(attempts.len(), 2);
            assert_eq!(f.engine.digest().pending(), 2);

            let digest_attempts = f.engine.flush_digest().await;
            assert_eq!(digest_attempts.len(), 2);
            assert_eq!(f.engine.digest().pending(), 0);
            assert_eq!(f.transport.calls(), 3);
        }
    }

    mod run_tests {
        use super::*;

        #[tokio::test]
        async fn run_dispatches_and_stops_on_shutdown() {
            let config = EngineConfig {
                poll_interval_secs: 3600,
                ..EngineConfig::default()
            };
            let f = fixture(config, vec![critical_webhook_rule()]);
            f.source.set(vec![testing::cpu_sample("nginx-1", 85.0)]);

            let shutdown = CancellationToken::new();
            let handle = tokio::spawn(Arc::clone(&f.engine).run(shutdown.clone()));

            for _ in 0..100 {
                if f.recorder.len() == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            shutdown.cancel();
            handle.await.unwrap().unwrap();

            assert_eq!(f.recorder.len(), 1);
            assert_eq!(f.transport.calls(), 1);
        }

        #[tokio::test]
        async fn dispatch_loop_caps_jobs_in_flight() {
            let config = EngineConfig {
                max_concurrent_dispatches: 2,
                ..EngineConfig::default()
            };
            let rule = critical_webhook_rule();
            let transport = GaugeTransport::new(Duration::from_millis(50));
            let engine = Arc::new(
                AlertEngine::builder(config)
                    .source(Arc::new(StaticMetricSource::default()))
                    .rules(Arc::new(StaticRuleStore::new(vec![rule.clone()])))
                    .transports(
                        Transports::new()
                            .with(ChannelType::Webhook, Arc::clone(&transport) as Arc<dyn Transport>),
                    )
                    .build()
                    .unwrap(),
            );

            let (tx, rx) = mpsc::channel(16);
            for unit in 0..6 {
                let alert = testing::alert(&rule, &format!("unit-{unit}"));
                tx.send(DispatchJob::Alert(alert)).await.unwrap();
            }
            drop(tx);
            Arc::clone(&engine).dispatch_loop(rx).await;

            assert_eq!(transport.calls(), 6);
            assert_eq!(transport.peak(), 2);
        }

        #[tokio::test]
        async fn shutdown_flushes_pending_digest() {
            let mut config = EngineConfig {
                poll_interval_secs: 3600,
                ..EngineConfig::default()
            };
            config.digest.enabled = true;
            let f = fixture(
                config,
                vec![testing::cpu_rule("low", Priority::Low, &[testing::webhook()])],
            );
            f.source.set(vec![testing::cpu_sample("nginx-1", 85.0)]);

            let shutdown = CancellationToken::new();
            let handle = tokio::spawn(Arc::clone(&f.engine).run(shutdown.clone()));

            for _ in 0..100 {
                if f.engine.digest().pending() == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(f.transport.calls(), 0);

            shutdown.cancel();
            handle.await.unwrap().unwrap();

            assert_eq!(f.engine.digest().pending(), 0);
            assert_eq!(f.transport.calls(), 1);
            assert_eq!(f.recorder.len(), 1);
        }
    }
}
