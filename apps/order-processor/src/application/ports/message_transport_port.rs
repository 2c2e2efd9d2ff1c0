//! Message Transport Port (Driven Port)
//!
//! A durable, topic-routed publish/subscribe transport: exchanges, queues,
//! bindings, prefetch-bounded consumption, headers and dead-letter routing.
//! Modelled on AMQP 0-9-1 semantics.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{ErrorCode, ExecutionError};

/// Header carrying the number of times a message has been requeued.
pub const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";

/// Header recording why a message was dead-lettered.
pub const DEATH_REASON_HEADER: &str = "x-death-reason";

/// Header recording the queue a message was dead-lettered from.
pub const DEATH_QUEUE_HEADER: &str = "x-first-death-queue";

/// Transport error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Could not connect, or the connection dropped.
    #[error("Broker connection error: {message}")]
    ConnectionError {
        /// Broker or client detail.
        message: String,
    },

    /// The channel or consumer is gone.
    #[error("Broker channel closed: {message}")]
    ChannelClosed {
        /// Broker or client detail.
        message: String,
    },

    /// An exchange or queue does not exist.
    #[error("Broker {kind} not found: {name}")]
    NotFound {
        /// `exchange` or `queue`.
        kind: &'static str,
        /// Name that was looked up.
        name: String,
    },

    /// The broker refused the publish.
    #[error("Publish failed: {message}")]
    PublishFailed {
        /// Broker or client detail.
        message: String,
    },

    /// Payload could not be encoded.
    #[error("Message serialization error: {message}")]
    Serialization {
        /// Broker or client detail.
        message: String,
    },

    /// The operation was cancelled.
    #[error("Transport operation cancelled")]
    Cancelled,
}

impl From<TransportError> for ExecutionError {
    fn from(err: TransportError) -> Self {
        let code = match &err {
            TransportError::ConnectionError { .. } => ErrorCode::ConnectionRefused,
            TransportError::ChannelClosed { .. } | TransportError::PublishFailed { .. } => {
                ErrorCode::ServiceUnavailable
            }
            TransportError::NotFound { .. } | TransportError::Serialization { .. } => {
                ErrorCode::InternalError
            }
            TransportError::Cancelled => ErrorCode::Cancelled,
        };
        Self::new(code, err.to_string())
    }
}

/// Exchange routing type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Pattern routing with `*` and `#` wildcards.
    Topic,
    /// Exact routing key match.
    Direct,
    /// Every bound queue.
    Fanout,
}

/// Exchange declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    /// Exchange name.
    pub name: String,
    /// Routing type.
    pub kind: ExchangeKind,
    /// Survives broker restarts.
    pub durable: bool,
}

impl ExchangeSpec {
    /// A durable topic exchange.
    #[must_use]
    pub fn durable_topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Topic,
            durable: true,
        }
    }
}

/// Queue declaration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueSpec {
    /// Queue name.
    pub name: String,
    /// Survives broker restarts.
    pub durable: bool,
    /// Exchange receiving rejected or expired messages.
    pub dead_letter_exchange: Option<String>,
    /// Routing key override for dead-lettered messages.
    pub dead_letter_routing_key: Option<String>,
    /// Per-queue message time-to-live.
    pub message_ttl: Option<Duration>,
}

impl QueueSpec {
    /// A durable queue without dead-lettering.
    #[must_use]
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            ..Self::default()
        }
    }

    /// Route rejected and expired messages to `exchange`.
    #[must_use]
    pub fn with_dead_letter_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self
    }

    /// Expire messages after `ttl`.
    #[must_use]
    pub const fn with_message_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.message_ttl = ttl;
        self
    }
}

/// Persistence of a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Kept in memory only.
    Transient,
    /// Written to disk by the broker.
    Persistent,
}

/// A message handed to [`MessageTransport::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Target exchange.
    pub exchange: String,
    /// Topic routing key.
    pub routing_key: String,
    /// Encoded payload.
    pub body: Vec<u8>,
    /// Application headers.
    pub headers: BTreeMap<String, String>,
    /// Persistence mode.
    pub delivery_mode: DeliveryMode,
    /// Message priority (0-9).
    pub priority: u8,
    /// Per-message time-to-live.
    pub expiration: Option<Duration>,
    /// Content type of `body`.
    pub content_type: String,
}

impl OutboundMessage {
    /// A persistent JSON message with no headers.
    #[must_use]
    pub fn json(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            body,
            headers: BTreeMap::new(),
            delivery_mode: DeliveryMode::Persistent,
            priority: 0,
            expiration: None,
            content_type: "application/json".to_string(),
        }
    }
}

/// A message delivered to a consumer, awaiting ack or nack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Consumer the delivery belongs to.
    pub consumer_tag: String,
    /// Broker-assigned tag used to ack or nack.
    pub delivery_tag: u64,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key.
    pub routing_key: String,
    /// Encoded payload.
    pub body: Vec<u8>,
    /// Headers, including broker-maintained ones.
    pub headers: BTreeMap<String, String>,
    /// Whether the message has been delivered before.
    pub redelivered: bool,
}

impl Delivery {
    /// Times the message has been requeued before this delivery.
    #[must_use]
    pub fn delivery_count(&self) -> u32 {
        self.headers
            .get(DELIVERY_COUNT_HEADER)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

/// Deliveries for one consumer; closes when the connection drops.
pub type DeliveryStream = mpsc::Receiver<Delivery>;

/// Port for the broker transport.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Declare an exchange (idempotent).
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), TransportError>;

    /// Declare a queue (idempotent).
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), TransportError>;

    /// Bind a queue to an exchange with a routing pattern.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), TransportError>;

    /// Publish a message.
    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError>;

    /// Start consuming a queue with at most `prefetch` unacknowledged deliveries.
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, TransportError>;

    /// Acknowledge a delivery.
    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Reject a delivery, requeueing it or dead-lettering it.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), TransportError>;
}

/// Opens transport connections.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Connection type.
    type Transport: MessageTransport + 'static;

    /// Open a connection.
    async fn connect(&self) -> Result<std::sync::Arc<Self::Transport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_count_defaults_to_zero() {
        let mut delivery = Delivery {
            consumer_tag: "c".to_string(),
            delivery_tag: 1,
            exchange: "x".to_string(),
            routing_key: "order.created".to_string(),
            body: vec![],
            headers: BTreeMap::new(),
            redelivered: false,
        };
        assert_eq!(delivery.delivery_count(), 0);

        delivery
            .headers
            .insert(DELIVERY_COUNT_HEADER.to_string(), "2".to_string());
        assert_eq!(delivery.delivery_count(), 2);
    }

    #[test]
    fn connection_errors_are_retryable() {
        let err: ExecutionError = TransportError::ConnectionError {
            message: "refused".to_string(),
        }
        .into();
        assert!(err.is_retryable());
    }
}
