//! Message bus configuration: exchanges, queues, retries and reconnects.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::default_true;

/// Message bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Topic exchange for order lifecycle events.
    #[serde(default = "default_events_exchange")]
    pub events_exchange: String,
    /// Topic exchange receiving a copy of every lifecycle event.
    #[serde(default = "default_audit_exchange")]
    pub audit_exchange: String,
    /// Topic exchange for operational metrics.
    #[serde(default = "default_monitoring_exchange")]
    pub monitoring_exchange: String,
    /// Suffix naming each exchange's dead-letter counterpart.
    #[serde(default = "default_dead_letter_suffix")]
    pub dead_letter_suffix: String,
    /// Prefix for consumer queue names.
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,
    /// Publish persistent (durable) messages.
    #[serde(default = "default_true")]
    pub persistent: bool,
    /// Message time-to-live (milliseconds); `None` disables expiry.
    #[serde(default = "default_message_ttl_ms")]
    pub message_ttl_ms: Option<u64>,
    /// Unacknowledged deliveries allowed per consumer.
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,
    /// Requeues before a failing message is dead-lettered.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Deadline for one handler invocation (milliseconds).
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,
    /// Connection attempts before the consumer gives up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Connection backoff unit (milliseconds); attempt `n` waits `2^n × base`.
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
    /// Upper bound for a single connection backoff (milliseconds).
    #[serde(default = "default_connect_max_backoff_ms")]
    pub connect_max_backoff_ms: u64,
    /// Linear publish retry unit (milliseconds); attempt `n` waits `n × delay`.
    #[serde(default = "default_publish_retry_delay_ms")]
    pub publish_retry_delay_ms: u64,
    /// Publish attempts for `publish_with_retry`.
    #[serde(default = "default_max_retries")]
    pub publish_max_retries: u32,
    /// Concurrent consumers per queue.
    #[serde(default = "default_workers_per_queue")]
    pub workers_per_queue: usize,
    /// Source name stamped on published envelopes.
    #[serde(default = "default_source")]
    pub source: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            events_exchange: default_events_exchange(),
            audit_exchange: default_audit_exchange(),
            monitoring_exchange: default_monitoring_exchange(),
            dead_letter_suffix: default_dead_letter_suffix(),
            queue_prefix: default_queue_prefix(),
            persistent: true,
            message_ttl_ms: default_message_ttl_ms(),
            prefetch: default_prefetch(),
            max_retries: default_max_retries(),
            handler_timeout_ms: default_handler_timeout_ms(),
            connect_attempts: default_connect_attempts(),
            connect_backoff_ms: default_connect_backoff_ms(),
            connect_max_backoff_ms: default_connect_max_backoff_ms(),
            publish_retry_delay_ms: default_publish_retry_delay_ms(),
            publish_max_retries: default_max_retries(),
            workers_per_queue: default_workers_per_queue(),
            source: default_source(),
        }
    }
}

impl MessagingConfig {
    /// Dead-letter exchange for `exchange`.
    #[must_use]
    pub fn dead_letter_exchange(&self, exchange: &str) -> String {
        format!("{exchange}{}", self.dead_letter_suffix)
    }

    /// Queue consuming `routing_key` from the events exchange.
    #[must_use]
    pub fn queue_name(&self, routing_key: &str) -> String {
        format!("{}.{routing_key}", self.queue_prefix)
    }

    /// Queue collecting dead-lettered events.
    #[must_use]
    pub fn dead_letter_queue(&self) -> String {
        format!("{}.dead-letter", self.queue_prefix)
    }

    /// Message time-to-live.
    #[must_use]
    pub fn message_ttl(&self) -> Option<Duration> {
        self.message_ttl_ms.map(Duration::from_millis)
    }

    /// Handler deadline.
    #[must_use]
    pub const fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    /// Connection backoff unit.
    #[must_use]
    pub const fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    /// Connection backoff cap.
    #[must_use]
    pub const fn connect_max_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_max_backoff_ms)
    }

    /// Publish retry unit.
    #[must_use]
    pub const fn publish_retry_delay(&self) -> Duration {
        Duration::from_millis(self.publish_retry_delay_ms)
    }
}

fn default_events_exchange() -> String {
    "orders.events".to_string()
}

fn default_audit_exchange() -> String {
    "orders.audit".to_string()
}

fn default_monitoring_exchange() -> String {
    "orders.monitoring".to_string()
}

fn default_dead_letter_suffix() -> String {
    ".dlx".to_string()
}

fn default_queue_prefix() -> String {
    "order-processor".to_string()
}

const fn default_message_ttl_ms() -> Option<u64> {
    Some(86_400_000)
}

const fn default_prefetch() -> u16 {
    10
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_handler_timeout_ms() -> u64 {
    30_000
}

const fn default_connect_attempts() -> u32 {
    5
}

const fn default_connect_backoff_ms() -> u64 {
    1_000
}

const fn default_connect_max_backoff_ms() -> u64 {
    30_000
}

const fn default_publish_retry_delay_ms() -> u64 {
    500
}

const fn default_workers_per_queue() -> usize {
    2
}

fn default_source() -> String {
    "order-processor".to_string()
}
