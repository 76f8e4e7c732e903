//! Fixed-size pool of pipeline workers fed from a bounded queue.
//!
//! Submitting waits for a free queue slot instead of dropping work. A worker
//! that panics marks its claim failed and picks up the next item. Shutdown
//! drains for a grace period, then fires the cancel signal and aborts what
//! is left.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use error_handling_rs::{Error, MetricsCollector, Result, ShutdownController};
use futures::FutureExt;
use parking_lot::Mutex;
use shared_types_rs::Failure;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::orchestrator::{Orchestrator, CANCELLED_REASON};
use crate::service::ServiceStats;

/// How long cancelled runs get to record their own outcome before abort.
const CANCEL_WINDOW: Duration = Duration::from_secs(5);

/// Runs in progress, keyed by worker id. The same failure can be running
/// on two workers when it was queued twice.
type Active = Arc<Mutex<HashMap<usize, Failure>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every queued and running item finished within the grace period
    pub drained: bool,
    /// Runs that were still going when the workers were aborted
    pub aborted: usize,
}

pub struct WorkerPool {
    sender: Option<mpsc::Sender<Failure>>,
    capacity: usize,
    workers: Vec<JoinHandle<()>>,
    active: Active,
    cancel: ShutdownController,
    orchestrator: Arc<Orchestrator>,
}

impl WorkerPool {
    /// Spawns `size` workers on the current runtime.
    pub fn start(
        orchestrator: Arc<Orchestrator>,
        size: usize,
        capacity: usize,
        stats: Arc<ServiceStats>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let size = size.max(1);
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let active: Active = Arc::new(Mutex::new(HashMap::new()));
        let cancel = ShutdownController::new("pipeline_cancel");

        let workers = (0..size)
            .map(|id| {
                let worker = Worker {
                    id,
                    receiver: receiver.clone(),
                    orchestrator: orchestrator.clone(),
                    cancel: cancel.signal(),
                    active: active.clone(),
                    stats: stats.clone(),
                    metrics: metrics.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(workers = size, queue_capacity = capacity, "Worker pool started");
        Self {
            sender: Some(sender),
            capacity,
            workers,
            active,
            cancel,
            orchestrator,
        }
    }

    /// Queues `failure`, waiting for a free slot while the queue is full.
    pub async fn submit(&self, failure: Failure) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::cancelled("Worker pool is shutting down"))?;
        sender
            .send(failure)
            .await
            .map_err(|_| Error::cancelled("Worker pool is shutting down"))
    }

    /// Items waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sender
            .as_ref()
            .map(|s| self.capacity - s.capacity())
            .unwrap_or(0)
    }

    pub fn in_flight(&self) -> usize {
        self.active.lock().len()
    }

    /// Stops intake and drains for `grace`. Runs still going afterwards are
    /// cancelled, then aborted with their claims marked failed.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        self.sender.take();
        info!(grace_secs = grace.as_secs(), in_flight = self.in_flight(), "Draining worker pool");

        if join_within(&mut self.workers, grace).await {
            info!("Worker pool drained");
            return ShutdownReport {
                drained: true,
                aborted: 0,
            };
        }

        warn!(in_flight = self.in_flight(), "Grace period elapsed, cancelling in-flight work");
        self.cancel.trigger();
        if join_within(&mut self.workers, CANCEL_WINDOW).await {
            return ShutdownReport {
                drained: false,
                aborted: 0,
            };
        }

        for worker in &self.workers {
            worker.abort();
        }
        let leftovers: Vec<Failure> = self.active.lock().drain().map(|(_, f)| f).collect();
        for failure in &leftovers {
            warn!(test_id = %failure.id, failure_hash = %failure.hash(), "Aborted in-flight run");
            self.orchestrator.mark_failed(failure, CANCELLED_REASON).await;
        }
        ShutdownReport {
            drained: false,
            aborted: leftovers.len(),
        }
    }
}

async fn join_within(workers: &mut [JoinHandle<()>], limit: Duration) -> bool {
    tokio::time::timeout(limit, futures::future::join_all(workers.iter_mut()))
        .await
        .is_ok()
}

struct Worker {
    id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Failure>>>,
    orchestrator: Arc<Orchestrator>,
    cancel: error_handling_rs::ShutdownSignal,
    active: Active,
    stats: Arc<ServiceStats>,
    metrics: Arc<MetricsCollector>,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = self.receiver.lock().await.recv().await;
            let Some(failure) = next else { break };
            self.handle(failure).await;
        }
        info!(worker = self.id, "Worker stopped");
    }

    async fn handle(&self, failure: Failure) {
        let hash = failure.hash();
        self.active.lock().insert(self.id, failure.clone());
        self.track_in_flight();

        let run = AssertUnwindSafe(self.orchestrator.process(&failure, &self.cancel)).catch_unwind();
        match run.await {
            Ok(result) => self.stats.record_result(&result),
            Err(panic) => {
                let reason = format!("worker panicked: {}", panic_message(panic.as_ref()));
                error!(worker = self.id, test_id = %failure.id, failure_hash = %hash, reason = %reason, "Pipeline run panicked");
                self.stats.record_error();
                self.orchestrator.mark_failed(&failure, &reason).await;
            }
        }

        self.active.lock().remove(&self.id);
        self.track_in_flight();
    }

    fn track_in_flight(&self) {
        let n = self.active.lock().len();
        self.stats.set_in_flight(n);
        self.metrics.set_gauge("terrafix_in_flight", n as f64);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
