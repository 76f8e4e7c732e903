//! # Service
//!
//! The timer-driven poll loop. Each cycle takes a management token, fetches
//! failures detected since the last successful poll and queues them on the
//! worker pool. Every `cleanup_every_cycles` cycles it sweeps old claims and
//! logs statistics. While the claim store is unhealthy the service runs
//! read-only: it keeps polling and logging but submits nothing.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use claim_store_rs::ClaimStore;
use error_handling_rs::{DegradedMode, MetricsCollector, ShutdownSignal};
use parking_lot::Mutex;
use serde::Serialize;
use shared_types_rs::ProcessingResult;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::collaborators::FailureSource;
use crate::orchestrator::Orchestrator;
use crate::rate_limiter::RateLimiters;
use crate::worker_pool::{ShutdownReport, WorkerPool};

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub poll_interval: Duration,
    /// How far back the first poll looks
    pub initial_lookback: Duration,
    pub retention: Duration,
    pub cleanup_every_cycles: u64,
    pub shutdown_grace: Duration,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl ServiceSettings {
    pub fn from_config(config: &config_rs::ServiceConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            initial_lookback: config.initial_lookback(),
            retention: config.retention(),
            cleanup_every_cycles: config.cleanup_every_cycles,
            shutdown_grace: config.shutdown_grace(),
            workers: config.max_concurrent_workers,
            queue_capacity: config.work_queue_capacity,
        }
    }
}

/// Process-wide counters, shared with the worker pool and the HTTP surface.
#[derive(Debug, Default)]
pub struct ServiceStats {
    polls: AtomicU64,
    failures_seen: AtomicU64,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    cancelled: AtomicU64,
    errors: AtomicU64,
    in_flight: AtomicUsize,
    last_poll: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub polls: u64,
    pub failures_seen: u64,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cancelled: u64,
    pub errors: u64,
    pub in_flight: usize,
    pub last_poll: Option<DateTime<Utc>>,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_poll(&self, seen: usize, at: DateTime<Utc>) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.failures_seen.fetch_add(seen as u64, Ordering::Relaxed);
        *self.last_poll.lock() = Some(at);
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result(&self, result: &ProcessingResult) {
        let counter = if result.skipped {
            &self.skipped
        } else if result.success {
            &self.completed
        } else if result.error_kind.as_deref() == Some("cancelled") {
            &self.cancelled
        } else {
            &self.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_in_flight(&self, n: usize) {
        self.in_flight.store(n, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn last_poll(&self) -> Option<DateTime<Utc>> {
        *self.last_poll.lock()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            failures_seen: self.failures_seen.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            last_poll: self.last_poll(),
        }
    }
}

/// What one poll cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub seen: usize,
    pub submitted: usize,
    pub read_only: bool,
    pub poll_error: Option<String>,
    pub cleaned: Option<usize>,
}

pub struct Service {
    source: Arc<dyn FailureSource>,
    claims: Arc<dyn ClaimStore>,
    pool: WorkerPool,
    limiters: RateLimiters,
    settings: ServiceSettings,
    stats: Arc<ServiceStats>,
    store_health: Arc<DegradedMode>,
    metrics: Arc<MetricsCollector>,
    cycles: u64,
    since: DateTime<Utc>,
}

impl Service {
    /// Starts the worker pool. Polling begins with [`Service::run`].
    pub fn start(
        orchestrator: Arc<Orchestrator>,
        limiters: RateLimiters,
        settings: ServiceSettings,
        stats: Arc<ServiceStats>,
        store_health: Arc<DegradedMode>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let source = orchestrator.collaborators().source.clone();
        let claims = orchestrator.collaborators().claims.clone();
        let lookback = chrono::Duration::from_std(settings.initial_lookback)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let pool = WorkerPool::start(
            orchestrator,
            settings.workers,
            settings.queue_capacity,
            stats.clone(),
            metrics.clone(),
        );

        Self {
            source,
            claims,
            pool,
            limiters,
            settings,
            stats,
            store_health,
            metrics,
            cycles: 0,
            since: Utc::now() - lookback,
        }
    }

    pub fn stats(&self) -> Arc<ServiceStats> {
        self.stats.clone()
    }

    /// Start of the window the next poll asks for.
    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }

    /// Polls until `stop` fires, then drains the pool.
    pub async fn run(mut self, stop: ShutdownSignal) -> ShutdownReport {
        info!(
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            workers = self.settings.workers,
            since = %self.since,
            "Service started"
        );

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.triggered() => break,
                _ = ticker.tick() => {
                    self.run_cycle(&stop).await;
                }
            }
        }

        info!(cycles = self.cycles, "Stop signal received, no further polls");
        self.shutdown().await
    }

    /// Stops intake and drains the worker pool within the grace period.
    pub async fn shutdown(self) -> ShutdownReport {
        let report = self.pool.shutdown(self.settings.shutdown_grace).await;
        info!(
            drained = report.drained,
            aborted = report.aborted,
            stats = ?self.stats.snapshot(),
            "Service stopped"
        );
        report
    }

    pub async fn run_cycle(&mut self, stop: &ShutdownSignal) -> CycleReport {
        self.cycles += 1;
        let mut report = CycleReport::default();

        if self.store_health.is_active() {
            self.check_store().await;
        }

        if let Err(e) = self.limiters.management.acquire(self.limiters.timeout).await {
            warn!(error = %e.summary(), "No management token, skipping poll");
            self.stats.record_error();
            report.poll_error = Some(e.summary());
            return report;
        }

        let started = Utc::now();
        let failures = match self.source.fetch_failures(self.since).await {
            Ok(failures) => failures,
            Err(e) => {
                error!(error = %e.summary(), retryable = e.is_retryable(), "Poll failed");
                self.stats.record_error();
                report.poll_error = Some(e.summary());
                return report;
            }
        };
        self.since = started;
        report.seen = failures.len();
        self.stats.record_poll(failures.len(), started);
        self.metrics
            .increment("terrafix_failures_polled_total", failures.len() as u64);
        info!(count = failures.len(), cycle = self.cycles, "Polled failures");

        if self.store_health.is_active() {
            report.read_only = true;
            for failure in &failures {
                warn!(
                    test_id = %failure.id,
                    resource_arn = %failure.resource_arn,
                    "Read-only mode, not processing failure"
                );
            }
        } else {
            for failure in failures {
                let test_id = failure.id.clone();
                tokio::select! {
                    submitted = self.pool.submit(failure) => match submitted {
                        Ok(()) => {
                            self.stats.record_submitted();
                            report.submitted += 1;
                            debug!(test_id = %test_id, queued = self.pool.queued(), "Submitted failure");
                        }
                        Err(e) => {
                            warn!(error = %e.summary(), "Pool rejected submission");
                            break;
                        }
                    },
                    _ = stop.triggered() => {
                        info!("Stop signal during submission, remaining failures left for the next run");
                        break;
                    }
                }
            }
        }

        if self.settings.cleanup_every_cycles > 0 && self.cycles % self.settings.cleanup_every_cycles == 0 {
            report.cleaned = self.cleanup().await;
            info!(stats = ?self.stats.snapshot(), read_only = self.store_health.is_active(), "Service statistics");
        }

        report
    }

    async fn check_store(&self) {
        match self.claims.ping().await {
            Ok(()) => {
                if self.store_health.record_success() {
                    info!("Claim store reachable again, leaving read-only mode");
                }
            }
            Err(e) => {
                self.store_health.record_failure(&e.summary());
                warn!(error = %e.summary(), "Claim store still unreachable");
            }
        }
    }

    async fn cleanup(&self) -> Option<usize> {
        match self.claims.cleanup_expired(self.settings.retention).await {
            Ok(removed) => {
                info!(removed, "Removed expired claims");
                Some(removed)
            }
            Err(e) => {
                self.store_health.record_failure(&e.summary());
                warn!(error = %e.summary(), "Claim cleanup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(success: bool, skipped: bool, kind: Option<&str>) -> ProcessingResult {
        let mut r = ProcessingResult::new("h", "c");
        r.success = success;
        r.skipped = skipped;
        r.error_kind = kind.map(str::to_string);
        r
    }

    #[test]
    fn results_are_counted_by_outcome() {
        let stats = ServiceStats::new();
        stats.record_result(&result(true, false, None));
        stats.record_result(&result(true, true, None));
        stats.record_result(&result(false, false, Some("generation.throttled")));
        stats.record_result(&result(false, false, Some("cancelled")));
        stats.record_poll(4, Utc::now());
        stats.set_in_flight(2);

        let snap = stats.snapshot();
        assert_eq!((snap.completed, snap.skipped, snap.failed, snap.cancelled), (1, 1, 1, 1));
        assert_eq!(snap.failures_seen, 4);
        assert_eq!(snap.in_flight, 2);
        assert!(snap.last_poll.is_some());
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let value = serde_json::to_value(ServiceStats::new().snapshot()).unwrap();
        assert!(value.get("failuresSeen").is_some());
        assert!(value.get("inFlight").is_some());
        assert!(value["lastPoll"].is_null());
    }
}
