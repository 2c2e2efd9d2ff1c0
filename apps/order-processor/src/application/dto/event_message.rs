//! Versioned wire envelope for order lifecycle events.

use serde::{Deserialize, Serialize};

use crate::domain::order::{OrderEvent, OrderEventKind};
use crate::domain::shared::{MessageId, OrderId, Timestamp};
use crate::error::ExecutionError;

/// Envelope schema version.
pub const ENVELOPE_VERSION: &str = "1.0";

/// A lifecycle event as it travels over the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Unique message id, used by consumers for deduplication.
    pub id: MessageId,
    /// Envelope schema version.
    pub version: String,
    /// Event type, doubles as the routing key.
    #[serde(rename = "type")]
    pub event_type: OrderEventKind,
    /// Producing service.
    pub source: String,
    /// Order the event is about.
    pub subject: String,
    /// The serialized [`OrderEvent`].
    pub payload: serde_json::Value,
    /// When the envelope was created.
    pub timestamp: Timestamp,
    /// Topic routing key.
    pub routing_key: String,
    /// Delivery attempts so far, filled in by consumers.
    #[serde(default)]
    pub retry_count: u32,
    /// Message priority (0-9).
    #[serde(default)]
    pub priority: u8,
}

impl EventMessage {
    /// Wrap a domain event.
    ///
    /// # Errors
    ///
    /// Returns error if the event cannot be serialized.
    pub fn from_event(
        event: &OrderEvent,
        source: impl Into<String>,
        priority: u8,
    ) -> Result<Self, serde_json::Error> {
        let kind = event.kind();
        Ok(Self {
            id: MessageId::generate(),
            version: ENVELOPE_VERSION.to_string(),
            event_type: kind,
            source: source.into(),
            subject: event.order_id().to_string(),
            payload: serde_json::to_value(event)?,
            timestamp: Timestamp::now(),
            routing_key: kind.routing_key().to_string(),
            retry_count: 0,
            priority,
        })
    }

    /// Order id carried in `subject`.
    #[must_use]
    pub fn order_id(&self) -> OrderId {
        OrderId::new(self.subject.as_str())
    }

    /// Decode the payload back into a domain event.
    ///
    /// # Errors
    ///
    /// Returns a malformed-message error if the payload is not an order event
    /// or disagrees with the envelope.
    pub fn event(&self) -> Result<OrderEvent, ExecutionError> {
        let event: OrderEvent = serde_json::from_value(self.payload.clone())
            .map_err(|e| ExecutionError::malformed(format!("invalid event payload: {e}")))?;

        if event.kind() != self.event_type {
            return Err(ExecutionError::malformed(format!(
                "payload type {} does not match envelope type {}",
                event.kind(),
                self.event_type
            )));
        }
        if event.order_id().as_str() != self.subject {
            return Err(ExecutionError::malformed(format!(
                "payload order {} does not match subject {}",
                event.order_id(),
                self.subject
            )));
        }
        Ok(event)
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns a malformed-message error if the bytes are not a valid envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, ExecutionError> {
        serde_json::from_slice(bytes)
            .map_err(|e| ExecutionError::malformed(format!("undecodable message: {e}")))
    }
}
