//! Pool metrics aggregator.
//!
//! One lock guards all counters and per-worker stats. Workers update it at
//! task start and finish; the collector refreshes queue depth on a tick.

use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::shared::{OrderId, Timestamp};

/// Weight of the newest sample in the latency moving average.
const LATENCY_ALPHA: f64 = 0.1;

/// What a worker is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Waiting for a task.
    Idle,
    /// Executing a task.
    Processing,
    /// Exited.
    Stopped,
}

/// Per-worker statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Worker index.
    pub worker_id: usize,
    /// Current status.
    pub status: WorkerStatus,
    /// Order being executed.
    pub current_order: Option<OrderId>,
    /// Attempts finished.
    pub processed: u64,
    /// Attempts that returned an error.
    pub failed: u64,
    /// Last status change.
    pub last_active: Option<Timestamp>,
}

/// Point-in-time snapshot of the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorMetrics {
    /// Tasks accepted by `submit`.
    pub submitted: u64,
    /// Execution attempts finished.
    pub processed: u64,
    /// Tasks that ended successfully.
    pub succeeded: u64,
    /// Tasks that ended with an error.
    pub failed: u64,
    /// Retries scheduled.
    pub retried: u64,
    /// Submissions rejected for capacity.
    pub rejected: u64,
    /// Exponential moving average of attempt latency.
    pub average_latency_ms: f64,
    /// Tasks waiting in the queue.
    pub queue_depth: usize,
    /// Workers currently processing.
    pub busy_workers: usize,
    /// Per-worker stats.
    pub workers: Vec<WorkerStats>,
    /// Snapshot time.
    pub collected_at: Timestamp,
}

#[derive(Debug, Default)]
struct State {
    submitted: u64,
    processed: u64,
    succeeded: u64,
    failed: u64,
    retried: u64,
    rejected: u64,
    average_latency_ms: f64,
    queue_depth: usize,
    workers: Vec<WorkerStats>,
}

impl State {
    fn worker(&mut self, worker_id: usize) -> Option<&mut WorkerStats> {
        self.workers.get_mut(worker_id)
    }
}

/// Metrics owned by one pool.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    state: RwLock<State>,
}

impl PoolMetrics {
    /// Empty metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create idle stats for `count` workers.
    pub fn register_workers(&self, count: usize) {
        let now = Timestamp::now();
        self.state.write().workers = (0..count)
            .map(|worker_id| WorkerStats {
                worker_id,
                status: WorkerStatus::Idle,
                current_order: None,
                processed: 0,
                failed: 0,
                last_active: Some(now),
            })
            .collect();
    }

    /// Count an accepted submission.
    pub fn record_submitted(&self) {
        self.state.write().submitted += 1;
    }

    /// Count a capacity rejection.
    pub fn record_rejected(&self) {
        self.state.write().rejected += 1;
    }

    /// Count a scheduled retry.
    pub fn record_retry(&self) {
        self.state.write().retried += 1;
    }

    /// Count a task's final success.
    pub fn record_success(&self) {
        self.state.write().succeeded += 1;
    }

    /// Count a task's final failure.
    pub fn record_failure(&self) {
        self.state.write().failed += 1;
    }

    /// Mark a worker busy with an order.
    pub fn worker_started(&self, worker_id: usize, order_id: &OrderId) {
        if let Some(worker) = self.state.write().worker(worker_id) {
            worker.status = WorkerStatus::Processing;
            worker.current_order = Some(order_id.clone());
            worker.last_active = Some(Timestamp::now());
        }
    }

    /// Mark a worker idle after an attempt and fold its latency in.
    pub fn worker_finished(&self, worker_id: usize, success: bool, latency: Duration) {
        let mut state = self.state.write();

        state.processed += 1;
        let sample = latency.as_secs_f64() * 1000.0;
        state.average_latency_ms = if state.processed == 1 {
            sample
        } else {
            LATENCY_ALPHA.mul_add(sample, (1.0 - LATENCY_ALPHA) * state.average_latency_ms)
        };

        if let Some(worker) = state.worker(worker_id) {
            worker.status = WorkerStatus::Idle;
            worker.current_order = None;
            worker.processed += 1;
            if !success {
                worker.failed += 1;
            }
            worker.last_active = Some(Timestamp::now());
        }
    }

    /// Mark a worker as exited.
    pub fn worker_stopped(&self, worker_id: usize) {
        if let Some(worker) = self.state.write().worker(worker_id) {
            worker.status = WorkerStatus::Stopped;
            worker.current_order = None;
            worker.last_active = Some(Timestamp::now());
        }
    }

    /// Record the sampled queue depth.
    pub fn set_queue_depth(&self, depth: usize) {
        self.state.write().queue_depth = depth;
    }

    /// Workers currently processing.
    #[must_use]
    pub fn busy_workers(&self) -> usize {
        self.state
            .read()
            .workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Processing)
            .count()
    }

    /// Copy out the current values.
    #[must_use]
    pub fn snapshot(&self) -> OrchestratorMetrics {
        let state = self.state.read();
        OrchestratorMetrics {
            submitted: state.submitted,
            processed: state.processed,
            succeeded: state.succeeded,
            failed: state.failed,
            retried: state.retried,
            rejected: state.rejected,
            average_latency_ms: state.average_latency_ms,
            queue_depth: state.queue_depth,
            busy_workers: state
                .workers
                .iter()
                .filter(|w| w.status == WorkerStatus::Processing)
                .count(),
            workers: state.workers.clone(),
            collected_at: Timestamp::now(),
        }
    }
}
