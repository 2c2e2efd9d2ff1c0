//! Prometheus metrics for order execution, the worker pool and messaging.
//!
//! The recording functions are no-ops until [`init_metrics`] installs a
//! recorder, so tests never need an exporter.

use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsExportConfig;

/// Latency buckets from 1ms to 30s.
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Invalid histogram buckets.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install the exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Start the Prometheus exporter serving `/metrics`.
///
/// # Errors
///
/// Returns an error if the buckets are rejected or the listener cannot start.
pub fn init_metrics(config: &MetricsExportConfig) -> Result<(), MetricsError> {
    let addr = config.listen_addr;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(LATENCY_BUCKETS)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(addr = %addr, "Prometheus metrics exporter started");
    Ok(())
}

// ============================================================================
// Execution
// ============================================================================

/// Record one execution attempt.
///
/// * `side` - `buy` or `sell`
/// * `outcome` - `success` or the error reason
pub fn record_order_execution(side: &str, outcome: &str, duration: Duration) {
    counter!(
        "order_executions_total",
        "side" => side.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!("order_execution_seconds", "side" => side.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Worker Pool
// ============================================================================

/// Update the queued task gauge.
pub fn update_queue_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("worker_pool_queue_depth").set(depth as f64);
}

/// Update the busy worker gauge.
pub fn update_busy_workers(busy: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("worker_pool_busy_workers").set(busy as f64);
}

/// Record a submission rejected for capacity or state.
pub fn record_pool_rejection(reason: &str) {
    counter!("worker_pool_rejections_total", "reason" => reason.to_string()).increment(1);
}

/// Record a scheduled retry.
pub fn record_pool_retry() {
    counter!("worker_pool_retries_total").increment(1);
}

// ============================================================================
// Messaging
// ============================================================================

/// Record a published message.
pub fn record_message_published(exchange: &str, routing_key: &str) {
    counter!(
        "messages_published_total",
        "exchange" => exchange.to_string(),
        "routing_key" => routing_key.to_string()
    )
    .increment(1);
}

/// Record how a consumed message was settled.
///
/// * `outcome` - `ack`, `requeue` or `dead_letter`
pub fn record_message_consumed(queue: &str, outcome: &str) {
    counter!(
        "messages_consumed_total",
        "queue" => queue.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_order_execution("buy", "success", Duration::from_millis(5));
        update_queue_depth(3);
        record_message_consumed("orders.order.created", "ack");
    }
}
