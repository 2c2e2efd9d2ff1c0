//! Worker pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Task queue capacity.
    #[serde(default = "default_buffer")]
    pub queue_size: usize,
    /// Result channel capacity.
    #[serde(default = "default_buffer")]
    pub result_buffer: usize,
    /// Error channel capacity.
    #[serde(default = "default_buffer")]
    pub error_buffer: usize,
    /// Retries for retryable failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear retry backoff unit (milliseconds); retry `n` waits `n × base`.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Metrics collection interval (milliseconds).
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
    /// Deadline for one execution attempt (milliseconds).
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Orders older than this accrue age priority (seconds).
    #[serde(default = "default_priority_age_threshold_secs")]
    pub priority_age_threshold_secs: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_size: default_buffer(),
            result_buffer: default_buffer(),
            error_buffer: default_buffer(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            metrics_interval_ms: default_metrics_interval_ms(),
            task_timeout_ms: default_task_timeout_ms(),
            priority_age_threshold_secs: default_priority_age_threshold_secs(),
        }
    }
}

impl WorkerPoolConfig {
    /// Linear retry backoff unit.
    #[must_use]
    pub const fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Metrics collection interval.
    #[must_use]
    pub const fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    /// Per-attempt deadline.
    #[must_use]
    pub const fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Age after which priority starts to grow.
    #[must_use]
    pub const fn priority_age_threshold(&self) -> Duration {
        Duration::from_secs(self.priority_age_threshold_secs)
    }
}

const fn default_workers() -> usize {
    4
}

const fn default_buffer() -> usize {
    100
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_base_delay_ms() -> u64 {
    1_000
}

const fn default_metrics_interval_ms() -> u64 {
    5_000
}

const fn default_task_timeout_ms() -> u64 {
    30_000
}

const fn default_priority_age_threshold_secs() -> u64 {
    30
}
