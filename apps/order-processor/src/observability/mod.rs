//! Observability: structured logging and Prometheus metrics.

mod metrics;
mod tracing;

pub use self::metrics::{
    MetricsError, init_metrics, record_message_consumed, record_message_published,
    record_order_execution, record_pool_rejection, record_pool_retry, update_busy_workers,
    update_queue_depth,
};
pub use self::tracing::{TracingError, init_tracing};
