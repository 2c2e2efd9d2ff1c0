//! Lifecycle event publishing.
//!
//! Publishing follows persistence and never undoes it: use cases log a
//! failed publish and keep the stored order state.

use async_trait::async_trait;

use super::message_transport_port::TransportError;
use crate::domain::order::OrderEvent;

/// Why an event did not reach the broker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventPublishError {
    /// No connection to the broker.
    #[error("broker unreachable: {message}")]
    Unreachable {
        /// Transport detail.
        message: String,
    },

    /// The event or envelope could not be encoded.
    #[error("event encoding failed: {message}")]
    Encode {
        /// Encoder detail.
        message: String,
    },

    /// The broker refused the message, or retries ran out.
    #[error("broker rejected event: {message}")]
    Rejected {
        /// Transport detail.
        message: String,
    },
}

impl From<serde_json::Error> for EventPublishError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode {
            message: err.to_string(),
        }
    }
}

impl From<TransportError> for EventPublishError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectionError { message } => Self::Unreachable { message },
            TransportError::Serialization { message } => Self::Encode { message },
            other => Self::Rejected {
                message: other.to_string(),
            },
        }
    }
}

/// Sink for order lifecycle events.
#[async_trait]
pub trait EventPublisherPort: Send + Sync {
    /// Publish `events` in order, stopping at the first failure.
    async fn publish_order_events(&self, events: Vec<OrderEvent>) -> Result<(), EventPublishError>;

    /// Publish one event.
    async fn publish_order_event(&self, event: OrderEvent) -> Result<(), EventPublishError> {
        self.publish_order_events(vec![event]).await
    }
}

/// Drops every event. For wiring use cases without a broker.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisherPort for NoOpEventPublisher {
    async fn publish_order_events(
        &self,
        _events: Vec<OrderEvent>,
    ) -> Result<(), EventPublishError> {
        Ok(())
    }
}
