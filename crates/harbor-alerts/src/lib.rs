//! Threshold alerting engine for container health monitoring.
//!
//! `harbor-alerts` evaluates periodic metric samples against alert rules and
//! delivers the resulting alerts to email, chat and generic webhook channels.
//!
//! # Features
//!
//! - **Threshold Rules**: exact comparisons scoped to one unit or all units
//! - **Cooldowns**: a (rule, unit) pair fires at most once per cooldown window,
//!   claimed atomically before dispatch
//! - **Reliable Dispatch**: per-attempt timeouts and bounded retries, with
//!   retriable and terminal failures told apart
//! - **Rate Limits**: sliding hourly budget per channel type
//! - **Channel Health**: repeated failures disable a channel for a while; any
//!   success brings it back
//! - **Digests**: optional batching of low-priority alerts
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use harbor_alerts::{
//!     AlertEngine, AlertRule, ComparisonOperator, EngineConfig, MetricType, Sample,
//!     StaticMetricSource, StaticRuleStore,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> harbor_alerts::Result<()> {
//! let rule = AlertRule::builder("High CPU", MetricType::Cpu, ComparisonOperator::GreaterThan, 80.0)
//!     .cooldown_minutes(5)
//!     .build()?;
//!
//! let source = Arc::new(StaticMetricSource::new(vec![
//!     Sample::new("nginx-1", "nginx", MetricType::Cpu, 85.0),
//! ]));
//! let engine = AlertEngine::builder(EngineConfig::default())
//!     .source(source)
//!     .rules(Arc::new(StaticRuleStore::new(vec![rule])))
//!     .build()?;
//!
//! let (report, _attempts) = engine.poll_once().await;
//! assert_eq!(report.fired, 1);
//!
//! // The same sample again is inside the cooldown window.
//! let (report, _attempts) = engine.poll_once().await;
//! assert_eq!(report.suppressed, 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Running the Engine
//!
//! [`AlertEngine::run`] polls on a timer until its cancellation token fires,
//! then drains the dispatch queue and flushes any pending digest:
//!
//! ```rust,ignore
//! let shutdown = CancellationToken::new();
//! let engine = Arc::new(engine);
//! tokio::spawn(Arc::clone(&engine).run(shutdown.clone()));
//! // ...
//! shutdown.cancel();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod admin;
pub mod channels;
pub mod config;
pub mod cooldown;
pub mod digest;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod health;
pub mod ratelimit;
pub mod source;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types at crate root
pub use admin::{AdminHandle, RateBudget};
pub use channels::{Notice, Payload, Transport, Transports};
pub use config::{DigestConfig, EngineConfig};
pub use cooldown::{CooldownTracker, ExpiringStore, MemoryExpiringStore};
pub use digest::{Digest, DigestAggregator};
pub use dispatcher::{ChannelDispatcher, DeliveryOutcome, DispatchSettings};
pub use engine::{AlertEngine, AlertEngineBuilder, DispatchJob, Pass, PassReport};
pub use error::{AlertError, FailureKind, Result, TransportError};
pub use evaluator::{Evaluation, ThresholdEvaluator};
pub use health::{ChannelHealthTracker, HealthTransition};
pub use ratelimit::{RateDecision, RateLimiter};
pub use source::{
    AlertRecorder, MemoryRecorder, MetricSource, RuleStore, StaticMetricSource, StaticRuleStore,
};
pub use types::{
    Alert, AlertRule, AlertRuleBuilder, ChannelConfig, ChannelHealth, ChannelType, ChatConfig,
    ComparisonOperator, DispatchAttempt, DispatchStatus, EmailConfig, MetricType, Priority,
    RuleChannel, Sample, Severity, WebhookConfig,
};
