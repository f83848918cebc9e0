//! Metric and health collector.
//!
//! Maintains a bounded ring buffer per metric and runs pluggable health
//! probes on a fixed cadence, each subject to its own timeout independent
//! of that cadence.

use crate::capabilities::{HealthProbe, HealthResult, MetricSource};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

pub type Sample = (DateTime<Utc>, f64);

/// A bounded, append-only series. Oldest samples are dropped once the
/// configured maximum is reached; appends are total-ordered per metric
/// because they only ever happen under this struct's write lock.
#[derive(Debug, Default)]
struct Series {
    samples: VecDeque<Sample>,
}

impl Series {
    fn push(&mut self, sample: Sample, max_size: usize) {
        self.samples.push_back(sample);
        while self.samples.len() > max_size {
            self.samples.pop_front();
        }
    }
}

pub struct Collector {
    max_series_size: usize,
    series: RwLock<HashMap<String, Series>>,
    health: RwLock<HashMap<(String, String), HealthResult>>,
    probes: Vec<Arc<dyn HealthProbe>>,
    sources: Vec<Arc<dyn MetricSource>>,
}

impl Collector {
    pub fn new(max_series_size: usize) -> Self {
        Self {
            max_series_size,
            series: RwLock::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
            probes: Vec::new(),
            sources: Vec::new(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Append one metric sample, enforcing the ring-buffer bound.
    pub async fn record_metric(&self, name: &str, value: f64) {
        let mut series = self.series.write().await;
        series
            .entry(name.to_string())
            .or_default()
            .push((Utc::now(), value), self.max_series_size);
    }

    /// A consistent-prefix snapshot of a metric's recent samples.
    pub async fn series(&self, name: &str) -> Vec<Sample> {
        let series = self.series.read().await;
        series
            .get(name)
            .map(|s| s.samples.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn series_len(&self, name: &str) -> usize {
        self.series.read().await.get(name).map(|s| s.samples.len()).unwrap_or(0)
    }

    /// Run every registered metric source once and record its output.
    pub async fn collect_tick(&self) {
        for source in &self.sources {
            let metrics = source.collect().await;
            for (name, value) in metrics {
                self.record_metric(&name, value).await;
            }
        }
    }

    /// Probe one target with every registered probe, applying a per-probe
    /// timeout independent of the collection cadence. Transport failures
    /// are non-fatal: they degrade to `healthy = false`.
    pub async fn probe_tick(&self, target: &str, probe_timeout: Duration) {
        for probe in &self.probes {
            let result = match tokio::time::timeout(probe_timeout, probe.probe(target)).await {
                Ok(Ok(result)) => result,
                Ok(Err(err)) => {
                    tracing::warn!(probe = probe.name(), %target, error = %err, "health probe failed");
                    HealthResult::unhealthy(err.to_string())
                }
                Err(_) => {
                    tracing::warn!(probe = probe.name(), %target, "health probe timed out");
                    HealthResult::unhealthy("probe timed out")
                }
            };
            for (name, value) in &result.metrics {
                self.record_metric(name, *value).await;
            }
            self.health
                .write()
                .await
                .insert((probe.name().to_string(), target.to_string()), result);
        }
    }

    pub async fn latest_health(&self, probe: &str, target: &str) -> Option<HealthResult> {
        self.health
            .read()
            .await
            .get(&(probe.to_string(), target.to_string()))
            .cloned()
    }

    /// Aggregate the most recent health result across every probe run
    /// against `target` into a `HealthSnapshot` for the classifier.
    pub async fn snapshot(&self, target: &str) -> HealthSnapshot {
        let health = self.health.read().await;
        let mut metrics = HashMap::new();
        let mut healthy = true;
        for ((_, t), result) in health.iter() {
            if t == target {
                healthy &= result.healthy;
                for (k, v) in &result.metrics {
                    metrics.insert(k.clone(), *v);
                }
            }
        }
        HealthSnapshot {
            target: target.to_string(),
            healthy,
            metrics,
            timestamp: Utc::now(),
        }
    }

    /// Run health probing and metric collection loops until `shutdown`
    /// fires. Both loops observe cancellation at every suspension point
    /// (the tick sleep) and exit within one tick.
    pub async fn run(
        self: Arc<Self>,
        targets: Vec<String>,
        health_check_interval: Duration,
        probe_timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tick = tokio::time::interval(health_check_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("collector loop cancelled");
                        return;
                    }
                }
                _ = tick.tick() => {
                    self.collect_tick().await;
                    for target in &targets {
                        self.probe_tick(target, probe_timeout).await;
                    }
                }
            }
        }
    }
}

/// A point-in-time health view of a target, handed to the classifier.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub target: String,
    pub healthy: bool,
    pub metrics: HashMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}
