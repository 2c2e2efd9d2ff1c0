//! Worker pool: bounded priority queue, retrying workers and pool metrics.

mod metrics;
mod pool;
mod queue;
mod task;

pub use metrics::{OrchestratorMetrics, PoolMetrics, WorkerStats, WorkerStatus};
pub use pool::{PoolError, TaskEvent, WorkerPool};
pub use queue::{PushError, TaskQueue};
pub use task::{
    BASE_PRIORITY, MARKET_BONUS, MAX_AGE_BONUS, OrderTask, SELL_BONUS, TaskOutcome,
    priority_score,
};
