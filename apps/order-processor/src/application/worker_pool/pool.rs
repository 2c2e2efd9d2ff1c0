//! Worker Pool
//!
//! A fixed set of workers pulling [`OrderTask`]s from a bounded priority
//! queue and running them through an [`OrderExecutor`].
//!
//! Lifecycle is `idle → running → stopped`; a stopped pool cannot restart.
//! Submission never blocks: a full queue rejects the task. `stop` refuses new
//! work, lets the workers drain everything already queued, fails retries
//! still waiting out their backoff, then closes the result streams.
//!
//! A panicking executor fails its task with an internal error; the worker
//! carries on with the next task.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::metrics::{OrchestratorMetrics, PoolMetrics};
use super::queue::{PushError, TaskQueue};
use super::task::{OrderTask, priority_score};
use crate::application::execution::{ExecutionResult, OrderExecutor};
use crate::config::WorkerPoolConfig;
use crate::domain::shared::OrderId;
use crate::error::{ErrorCode, ExecutionError};
use crate::observability::{
    record_pool_rejection, record_pool_retry, update_busy_workers, update_queue_depth,
};

/// Worker pool errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool is not accepting work.
    #[error("worker pool is not running")]
    NotRunning,

    /// `start` was called on a running pool.
    #[error("worker pool is already running")]
    AlreadyStarted,

    /// `start` was called after `stop`.
    #[error("worker pool has been stopped and cannot be restarted")]
    Stopped,

    /// The task queue is at capacity.
    #[error("task queue is full (capacity {capacity})")]
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },

    /// The submitter's context was already done.
    #[error("submission rejected: {message}")]
    Cancelled {
        /// Context error.
        message: String,
    },
}

impl From<PoolError> for ExecutionError {
    fn from(err: PoolError) -> Self {
        let code = match &err {
            PoolError::NotRunning => ErrorCode::NotRunning,
            PoolError::AlreadyStarted | PoolError::Stopped => ErrorCode::InternalError,
            PoolError::QueueFull { .. } => ErrorCode::QueueFull,
            PoolError::Cancelled { .. } => ErrorCode::Cancelled,
        };
        Self::new(code, err.to_string())
    }
}

/// Final outcome of a task, broadcast to subscribers.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// The order executed.
    Completed {
        /// Order id.
        order_id: OrderId,
        /// Attempts used.
        attempts: u32,
        /// Execution trace.
        result: Box<ExecutionResult>,
    },
    /// The task failed for good.
    Failed {
        /// Order id.
        order_id: OrderId,
        /// Attempts used.
        attempts: u32,
        /// Last error.
        error: ExecutionError,
    },
}

impl TaskEvent {
    /// Order the event is about.
    #[must_use]
    pub const fn order_id(&self) -> &OrderId {
        match self {
            Self::Completed { order_id, .. } | Self::Failed { order_id, .. } => order_id,
        }
    }
}

/// State shared by workers and pending retries.
struct Shared<E> {
    executor: Arc<E>,
    queue: Arc<TaskQueue<OrderTask>>,
    metrics: Arc<PoolMetrics>,
    results: mpsc::Sender<TaskEvent>,
    errors: mpsc::Sender<TaskEvent>,
    retries: TaskTracker,
    retry_token: CancellationToken,
    config: WorkerPoolConfig,
}

struct RunningPool {
    workers: Vec<JoinHandle<()>>,
    dispatcher: JoinHandle<()>,
    collector: JoinHandle<()>,
    collector_token: CancellationToken,
    retries: TaskTracker,
    retry_token: CancellationToken,
}

enum PoolState {
    Idle,
    Running(RunningPool),
    Stopped,
}

/// Bounded worker pool around an executor.
pub struct WorkerPool<E: OrderExecutor + 'static> {
    executor: Arc<E>,
    config: WorkerPoolConfig,
    queue: Arc<TaskQueue<OrderTask>>,
    metrics: Arc<PoolMetrics>,
    events: broadcast::Sender<TaskEvent>,
    state: Mutex<PoolState>,
}

impl<E: OrderExecutor + 'static> WorkerPool<E> {
    /// Create an idle pool.
    pub fn new(executor: Arc<E>, config: WorkerPoolConfig) -> Self {
        let (events, _) = broadcast::channel(config.result_buffer.max(1));
        Self {
            executor,
            queue: Arc::new(TaskQueue::new(config.queue_size)),
            metrics: Arc::new(PoolMetrics::new()),
            events,
            state: Mutex::new(PoolState::Idle),
            config,
        }
    }

    /// Spawn the workers, the result dispatcher and the metrics collector.
    ///
    /// Cancelling `shutdown` fails retries still waiting for their backoff;
    /// queued and running tasks finish when [`stop`](Self::stop) is called.
    ///
    /// # Errors
    ///
    /// Returns error if the pool is running or has been stopped.
    pub fn start(&self, shutdown: &CancellationToken) -> Result<(), PoolError> {
        let mut state = self.state.lock();
        match *state {
            PoolState::Running(_) => return Err(PoolError::AlreadyStarted),
            PoolState::Stopped => return Err(PoolError::Stopped),
            PoolState::Idle => {}
        }

        let (results_tx, results_rx) = mpsc::channel(self.config.result_buffer.max(1));
        let (errors_tx, errors_rx) = mpsc::channel(self.config.error_buffer.max(1));
        let retries = TaskTracker::new();
        let retry_token = shutdown.child_token();
        let collector_token = shutdown.child_token();

        let shared = Arc::new(Shared {
            executor: Arc::clone(&self.executor),
            queue: Arc::clone(&self.queue),
            metrics: Arc::clone(&self.metrics),
            results: results_tx,
            errors: errors_tx,
            retries: retries.clone(),
            retry_token: retry_token.clone(),
            config: self.config.clone(),
        });

        self.metrics.register_workers(self.config.workers);
        let workers: Vec<_> = (0..self.config.workers)
            .map(|worker_id| tokio::spawn(worker_loop(worker_id, Arc::clone(&shared))))
            .collect();
        drop(shared);

        let dispatcher = tokio::spawn(dispatch(results_rx, errors_rx, self.events.clone()));
        let collector = tokio::spawn(collect(
            Arc::clone(&self.queue),
            Arc::clone(&self.metrics),
            self.config.metrics_interval(),
            collector_token.clone(),
        ));

        *state = PoolState::Running(RunningPool {
            workers,
            dispatcher,
            collector,
            collector_token,
            retries,
            retry_token,
        });

        info!(
            workers = self.config.workers,
            queue_size = self.config.queue_size,
            max_retries = self.config.max_retries,
            "Worker pool started"
        );
        Ok(())
    }

    /// Enqueue a task without blocking.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` if the pool is not running, `Cancelled` if the
    /// task's context is already done, `QueueFull` at capacity.
    pub fn submit(&self, mut task: OrderTask) -> Result<(), PoolError> {
        let state = self.state.lock();
        if !matches!(*state, PoolState::Running(_)) {
            record_pool_rejection("not_running");
            return Err(PoolError::NotRunning);
        }

        if let Err(e) = task.context.check() {
            return Err(PoolError::Cancelled {
                message: e.to_string(),
            });
        }

        task.priority = priority_score(&task.order, self.config.priority_age_threshold());
        let priority = task.priority;
        let order_id = task.order_id().clone();

        match self.queue.try_push(task, priority) {
            Ok(()) => {
                self.metrics.record_submitted();
                debug!(order_id = %order_id, priority, "Task submitted");
                Ok(())
            }
            Err(PushError::Full(_)) => {
                self.metrics.record_rejected();
                record_pool_rejection("queue_full");
                warn!(order_id = %order_id, capacity = self.queue.capacity(), "Task queue full");
                Err(PoolError::QueueFull {
                    capacity: self.queue.capacity(),
                })
            }
            Err(PushError::Closed(_)) => {
                record_pool_rejection("not_running");
                Err(PoolError::NotRunning)
            }
        }
    }

    /// Two-phase shutdown: stop intake, drain queued and running tasks, fail
    /// pending retries, then close the result streams.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` if the pool is not running.
    pub async fn stop(&self) -> Result<(), PoolError> {
        let running = {
            let mut state = self.state.lock();
            if !matches!(*state, PoolState::Running(_)) {
                return Err(PoolError::NotRunning);
            }
            match std::mem::replace(&mut *state, PoolState::Stopped) {
                PoolState::Running(running) => running,
                PoolState::Idle | PoolState::Stopped => return Err(PoolError::NotRunning),
            }
        };

        info!(queued = self.queue.len(), "Stopping worker pool");
        self.queue.close();

        for (worker_id, handle) in running.workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(worker_id, error = %e, "Worker panicked");
            }
        }

        running.retry_token.cancel();
        running.retries.close();
        running.retries.wait().await;

        if let Err(e) = running.dispatcher.await {
            error!(error = %e, "Result dispatcher panicked");
        }

        running.collector_token.cancel();
        if let Err(e) = running.collector.await {
            error!(error = %e, "Metrics collector panicked");
        }

        self.metrics.set_queue_depth(self.queue.len());
        update_queue_depth(self.queue.len());
        update_busy_workers(0);

        let snapshot = self.metrics.snapshot();
        info!(
            processed = snapshot.processed,
            succeeded = snapshot.succeeded,
            failed = snapshot.failed,
            "Worker pool stopped"
        );
        Ok(())
    }

    /// Tasks waiting in the queue.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    /// Queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Whether the pool accepts work.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), PoolState::Running(_))
    }

    /// Metrics snapshot with the live queue depth.
    #[must_use]
    pub fn metrics(&self) -> OrchestratorMetrics {
        let mut snapshot = self.metrics.snapshot();
        snapshot.queue_depth = self.queue.len();
        snapshot
    }

    /// Subscribe to final task outcomes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }
}

async fn worker_loop<E: OrderExecutor + 'static>(worker_id: usize, shared: Arc<Shared<E>>) {
    debug!(worker_id, "Worker started");
    while let Some(task) = shared.queue.pop().await {
        process(worker_id, &shared, task).await;
    }
    shared.metrics.worker_stopped(worker_id);
    debug!(worker_id, "Worker stopped");
}

async fn process<E: OrderExecutor + 'static>(
    worker_id: usize,
    shared: &Arc<Shared<E>>,
    mut task: OrderTask,
) {
    let order_id = task.order_id().clone();
    let max_retries = task.max_retries.unwrap_or(shared.config.max_retries);
    let last = task.retry_count >= max_retries;
    let ctx = task
        .context
        .child()
        .with_attempt(task.retry_count + 1, last)
        .with_timeout(shared.config.task_timeout());

    shared.metrics.worker_started(worker_id, &order_id);
    let clock = Instant::now();
    let outcome = AssertUnwindSafe(shared.executor.execute(&ctx, &task.order))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let err = executor_panicked(&*panic);
            error!(worker_id, order_id = %order_id, error = %err, "Executor panicked");
            Err(err)
        });
    let latency = clock.elapsed();
    shared.metrics.worker_finished(worker_id, outcome.is_ok(), latency);

    match outcome {
        Ok(result) => {
            shared.metrics.record_success();
            task.complete(Ok(result.clone()));
            let event = TaskEvent::Completed {
                order_id,
                attempts: task.retry_count + 1,
                result: Box::new(result),
            };
            if shared.results.send(event).await.is_err() {
                warn!(worker_id, "Result channel closed");
            }
        }
        Err(err) if err.is_retryable() && !last && !task.context.is_cancelled() => {
            schedule_retry(shared, task, &err);
        }
        Err(err) => shared.fail(task, err).await,
    }
}

fn executor_panicked(panic: &(dyn Any + Send)) -> ExecutionError {
    let detail = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("opaque panic payload");
    ExecutionError::internal(format!("executor panicked: {detail}"))
}

fn schedule_retry<E: OrderExecutor + 'static>(
    shared: &Arc<Shared<E>>,
    mut task: OrderTask,
    err: &ExecutionError,
) {
    task.retry_count += 1;
    let delay = shared.config.retry_base_delay() * task.retry_count;

    shared.metrics.record_retry();
    record_pool_retry();
    info!(
        order_id = %task.order_id(),
        retry = task.retry_count,
        delay_ms = delay.as_millis(),
        error = %err,
        "Scheduling retry"
    );

    let shared = Arc::clone(shared);
    let retries = shared.retries.clone();
    retries.spawn(async move {
        let stopped = shared.retry_token.clone();
        let abandoned = task.context.token().clone();

        let interrupted = tokio::select! {
            () = stopped.cancelled() => Some(ExecutionError::new(
                ErrorCode::NotRunning,
                "worker pool stopped before retry",
            )),
            () = abandoned.cancelled() => {
                Some(ExecutionError::cancelled("task cancelled before retry"))
            }
            () = tokio::time::sleep(delay) => None,
        };
        if let Some(err) = interrupted {
            shared.fail(task, err).await;
            return;
        }

        let priority = priority_score(&task.order, shared.config.priority_age_threshold());
        task.priority = priority;
        match shared.queue.try_push(task, priority) {
            Ok(()) => {}
            Err(PushError::Full(task)) => {
                let err = ExecutionError::new(
                    ErrorCode::QueueFull,
                    "task queue full when requeueing retry",
                );
                shared.fail(task, err).await;
            }
            Err(PushError::Closed(task)) => {
                let err = ExecutionError::new(
                    ErrorCode::NotRunning,
                    "worker pool stopped before retry",
                );
                shared.fail(task, err).await;
            }
        }
    });
}

impl<E> Shared<E> {
    async fn fail(&self, mut task: OrderTask, err: ExecutionError) {
        let order_id = task.order_id().clone();
        let attempts = task.retry_count + 1;

        self.metrics.record_failure();
        task.complete(Err(err.clone()));

        let event = TaskEvent::Failed {
            order_id,
            attempts,
            error: err,
        };
        if self.errors.send(event).await.is_err() {
            warn!("Error channel closed");
        }
    }
}

async fn dispatch(
    mut results: mpsc::Receiver<TaskEvent>,
    mut errors: mpsc::Receiver<TaskEvent>,
    events: broadcast::Sender<TaskEvent>,
) {
    let mut results_open = true;
    let mut errors_open = true;

    while results_open || errors_open {
        tokio::select! {
            event = results.recv(), if results_open => match event {
                Some(event) => {
                    debug!(order_id = %event.order_id(), "Task completed");
                    // No subscribers is fine.
                    let _ = events.send(event);
                }
                None => results_open = false,
            },
            event = errors.recv(), if errors_open => match event {
                Some(event) => {
                    if let TaskEvent::Failed { order_id, attempts, error } = &event {
                        warn!(order_id = %order_id, attempts, error = %error, "Task failed");
                    }
                    let _ = events.send(event);
                }
                None => errors_open = false,
            },
        }
    }
    debug!("Result dispatcher stopped");
}

async fn collect(
    queue: Arc<TaskQueue<OrderTask>>,
    metrics: Arc<PoolMetrics>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let depth = queue.len();
                metrics.set_queue_depth(depth);
                update_queue_depth(depth);
                update_busy_workers(metrics.busy_workers());
            }
        }
    }
}
