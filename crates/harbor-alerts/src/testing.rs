//! Fakes shared by unit tests.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::channels::{Payload, Transport, Transports};
use crate::error::{AlertError, Result, TransportError};
use crate::source::AlertRecorder;
use crate::types::{
    Alert, AlertRule, ChannelConfig, ChannelType, ComparisonOperator, DispatchAttempt, EmailConfig,
    MetricType, Priority, Sample, WebhookConfig,
};

/// A transport answering from a script; an exhausted script answers `Ok`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<std::result::Result<(), TransportError>>>,
    payloads: Mutex<Vec<Payload>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<std::result::Result<(), TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        })
    }

    pub fn ok() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub fn failing(n: usize) -> Arc<Self> {
        Self::new((0..n).map(|_| Err(TransportError::retriable("HTTP 503"))).collect())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Payload> {
        self.payloads.lock().clone()
    }
}

impl Transport for ScriptedTransport {
    fn send<'a>(
        &'a self,
        _config: &'a ChannelConfig,
        payload: &'a Payload,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), TransportError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.payloads.lock().push(payload.clone());
            self.script.lock().pop_front().unwrap_or(Ok(()))
        })
    }
}

/// A recorder that always fails.
#[derive(Debug, Default)]
pub struct FailingRecorder;

impl AlertRecorder for FailingRecorder {
    fn record<'a>(
        &'a self,
        _attempt: &'a DispatchAttempt,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async {
            Err(AlertError::Recorder {
                reason: "disk full".to_string(),
            })
        })
    }
}

/// A recorder whose writes never complete.
#[derive(Debug, Default)]
pub struct StalledRecorder;

impl AlertRecorder for StalledRecorder {
    fn record<'a>(
        &'a self,
        _attempt: &'a DispatchAttempt,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(std::future::pending())
    }
}

/// A transport that sleeps on every send and tracks how many sends overlap.
#[derive(Debug)]
pub struct GaugeTransport {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl GaugeTransport {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for GaugeTransport {
    fn send<'a>(
        &'a self,
        _config: &'a ChannelConfig,
        _payload: &'a Payload,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), TransportError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Registers one transport for every channel type.
pub fn transports(transport: Arc<ScriptedTransport>) -> Transports {
    ChannelType::ALL
        .iter()
        .fold(Transports::new(), |acc, channel| {
            acc.with(*channel, Arc::clone(&transport) as Arc<dyn Transport>)
        })
}

pub fn email() -> ChannelConfig {
    ChannelConfig::Email(EmailConfig {
        smtp_host: "smtp.example.com".to_string(),
        smtp_port: 587,
        username: None,
        password: None,
        from: "alerts@example.com".to_string(),
        to: vec!["ops@example.com".to_string()],
        starttls: true,
    })
}

pub fn webhook() -> ChannelConfig {
    ChannelConfig::Webhook(WebhookConfig::new("https://hooks.example.com/alerts"))
}

pub fn cpu_rule(id: &str, priority: Priority, channels: &[ChannelConfig]) -> AlertRule {
    let mut builder = AlertRule::builder(id, MetricType::Cpu, ComparisonOperator::GreaterThan, 80.0)
        .id(id)
        .priority(priority)
        .cooldown_minutes(5);
    for channel in channels {
        builder = builder.channel(channel.clone());
    }
    builder.build().expect("valid test rule")
}

pub fn cpu_sample(unit: &str, value: f64) -> Sample {
    Sample::new(unit, unit, MetricType::Cpu, value)
}

pub fn alert(rule: &AlertRule, unit: &str) -> Alert {
    Alert::new(rule, &cpu_sample(unit, 95.0), Utc::now())
}
