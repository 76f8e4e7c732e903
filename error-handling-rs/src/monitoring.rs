//! # Monitoring
//!
//! Two sinks for the same measurements: the global `metrics` recorder
//! (optionally exported to Prometheus) and an in-process
//! [`MetricsCollector`] that backs the JSON `/metrics` endpoint with
//! per-stage percentiles.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use parking_lot::Mutex;
use serde::Serialize;
use shared_types_rs::Stage;
use tracing::info;

use crate::types::{Error, Result};

/// Samples kept per stage for percentile estimates.
const SAMPLE_WINDOW: usize = 1024;

/// Installs the Prometheus exporter as the global `metrics` recorder.
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::configuration(format!("Failed to install Prometheus exporter: {}", e)))?;
    info!(addr = %addr, "Prometheus exporter listening");
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TimingSummary {
    pub count: u64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub stages: BTreeMap<String, TimingSummary>,
}

#[derive(Debug, Default)]
struct StageSamples {
    count: u64,
    total_ms: f64,
    max_ms: f64,
    window: VecDeque<f64>,
}

#[derive(Debug, Default)]
struct Inner {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    stages: HashMap<Stage, StageSamples>,
}

/// In-process metrics mirrored to the global recorder.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &'static str, by: u64) {
        counter!(name, by);
        *self.inner.lock().counters.entry(name.to_string()).or_default() += by;
    }

    /// Counter with one label, flattened as `name{value}` in the snapshot.
    pub fn increment_labeled(&self, name: &'static str, label: &'static str, value: &'static str) {
        counter!(name, 1, label => value);
        let key = format!("{}{{{}={}}}", name, label, value);
        *self.inner.lock().counters.entry(key).or_default() += 1;
    }

    pub fn set_gauge(&self, name: &'static str, value: f64) {
        gauge!(name, value);
        self.inner.lock().gauges.insert(name.to_string(), value);
    }

    pub fn record_stage(&self, stage: Stage, elapsed: Duration) {
        histogram!("terrafix_stage_duration_seconds", elapsed.as_secs_f64(), "stage" => stage.as_str());

        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut inner = self.inner.lock();
        let samples = inner.stages.entry(stage).or_default();
        samples.count += 1;
        samples.total_ms += ms;
        samples.max_ms = samples.max_ms.max(ms);
        if samples.window.len() == SAMPLE_WINDOW {
            samples.window.pop_front();
        }
        samples.window.push_back(ms);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let stages = inner
            .stages
            .iter()
            .map(|(stage, samples)| (stage.as_str().to_string(), summarize(samples)))
            .collect();

        MetricsSnapshot {
            counters: inner.counters.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            gauges: inner.gauges.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            stages,
        }
    }
}

fn summarize(samples: &StageSamples) -> TimingSummary {
    let mut sorted: Vec<f64> = samples.window.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    TimingSummary {
        count: samples.count,
        mean_ms: if samples.count == 0 {
            0.0
        } else {
            samples.total_ms / samples.count as f64
        },
        p50_ms: percentile(&sorted, 0.50),
        p90_ms: percentile(&sorted, 0.90),
        p99_ms: percentile(&sorted, 0.99),
        max_ms: samples.max_ms,
    }
}

// Nearest-rank percentile over an ascending slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles_nearest_rank() {
        let collector = MetricsCollector::new();
        for ms in 1..=100u64 {
            collector.record_stage(Stage::Generate, Duration::from_millis(ms));
        }
        let snap = collector.snapshot();
        let gen = &snap.stages["generate"];
        assert_eq!(gen.count, 100);
        assert!((gen.p50_ms - 50.0).abs() < 1e-6);
        assert!((gen.p90_ms - 90.0).abs() < 1e-6);
        assert!((gen.p99_ms - 99.0).abs() < 1e-6);
        assert!((gen.max_ms - 100.0).abs() < 1e-6);
        assert!((gen.mean_ms - 50.5).abs() < 1e-6);
    }

    #[test]
    fn test_counters_and_gauges() {
        let collector = MetricsCollector::new();
        collector.increment("terrafix_failures_polled_total", 3);
        collector.increment("terrafix_failures_polled_total", 2);
        collector.increment_labeled("terrafix_claims_total", "outcome", "claimed");
        collector.set_gauge("terrafix_in_flight", 2.0);

        let snap = collector.snapshot();
        assert_eq!(snap.counters["terrafix_failures_polled_total"], 5);
        assert_eq!(snap.counters["terrafix_claims_total{outcome=claimed}"], 1);
        assert_eq!(snap.gauges["terrafix_in_flight"], 2.0);
        assert_eq!(collector.counter("missing"), 0);
    }

    #[test]
    fn test_window_is_bounded() {
        let collector = MetricsCollector::new();
        for _ in 0..(SAMPLE_WINDOW + 10) {
            collector.record_stage(Stage::Resolve, Duration::from_millis(1));
        }
        let inner = collector.inner.lock();
        assert_eq!(inner.stages[&Stage::Resolve].window.len(), SAMPLE_WINDOW);
        assert_eq!(inner.stages[&Stage::Resolve].count as usize, SAMPLE_WINDOW + 10);
    }
}
