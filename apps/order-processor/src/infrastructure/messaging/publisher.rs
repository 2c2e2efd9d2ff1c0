//! Message Publisher
//!
//! Wraps lifecycle events in an [`EventMessage`] envelope and publishes them
//! to the events exchange, with a best-effort copy to the audit exchange.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::topology::{METRICS_ROUTING_KEY, Topology};
use crate::application::dto::EventMessage;
use crate::application::ports::{
    DeliveryMode, EventPublishError, EventPublisherPort, MessageTransport, OutboundMessage,
    TransportError,
};
use crate::application::worker_pool::OrchestratorMetrics;
use crate::config::MessagingConfig;
use crate::domain::order::{OrderEvent, OrderEventKind};
use crate::observability::record_message_published;

/// Header carrying the envelope id.
pub const MESSAGE_ID_HEADER: &str = "x-message-id";

/// Envelope priority per event kind; executions wait on `order.created`.
const fn event_priority(kind: OrderEventKind) -> u8 {
    match kind {
        OrderEventKind::Created => 5,
        OrderEventKind::Failed => 3,
        OrderEventKind::Executed | OrderEventKind::Cancelled => 1,
    }
}

/// Publishes envelopes over a [`MessageTransport`].
pub struct MessagePublisher<T: MessageTransport> {
    transport: Arc<T>,
    config: MessagingConfig,
    shutdown: CancellationToken,
}

impl<T: MessageTransport> MessagePublisher<T> {
    /// Create a new `MessagePublisher`.
    pub fn new(transport: Arc<T>, config: MessagingConfig) -> Self {
        Self {
            transport,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Abort retry backoffs when `shutdown` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: &CancellationToken) -> Self {
        self.shutdown = shutdown.child_token();
        self
    }

    /// Declare the exchanges this publisher writes to.
    pub async fn declare_topology(&self) -> Result<(), TransportError> {
        Topology::new(self.config.clone())
            .declare_exchanges(self.transport.as_ref())
            .await
    }

    /// Outbound message for an envelope, using the configured delivery mode
    /// and TTL.
    pub fn outbound(
        &self,
        exchange: &str,
        message: &EventMessage,
    ) -> Result<OutboundMessage, EventPublishError> {
        let body = message.encode()?;

        let mut outbound = OutboundMessage::json(exchange, message.routing_key.as_str(), body);
        outbound
            .headers
            .insert(MESSAGE_ID_HEADER.to_string(), message.id.to_string());
        outbound.delivery_mode = if self.config.persistent {
            DeliveryMode::Persistent
        } else {
            DeliveryMode::Transient
        };
        outbound.priority = message.priority;
        outbound.expiration = self.config.message_ttl();
        Ok(outbound)
    }

    /// Publish, retrying failed sends with a delay of `delay × attempt`.
    ///
    /// Makes at most `max_retries` attempts (at least one) and returns the
    /// last error, or `Cancelled` if `cancel` fires during a backoff.
    pub async fn publish_with_retry(
        &self,
        cancel: &CancellationToken,
        message: OutboundMessage,
        max_retries: u32,
    ) -> Result<(), TransportError> {
        let attempts = max_retries.max(1);
        let delay = self.config.publish_retry_delay();
        let mut attempt = 1;

        loop {
            match self.transport.publish(message.clone()).await {
                Ok(()) => {
                    record_message_published(&message.exchange, &message.routing_key);
                    return Ok(());
                }
                Err(e) if attempt >= attempts => {
                    warn!(
                        exchange = %message.exchange,
                        routing_key = %message.routing_key,
                        attempts,
                        error = %e,
                        "Publish failed, giving up"
                    );
                    return Err(e);
                }
                Err(e) => {
                    debug!(
                        routing_key = %message.routing_key,
                        attempt,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(TransportError::Cancelled),
                        () = tokio::time::sleep(delay * attempt) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn publish_event(&self, event: &OrderEvent) -> Result<(), EventPublishError> {
        let kind = event.kind();
        let message =
            EventMessage::from_event(event, self.config.source.as_str(), event_priority(kind))?;

        let outbound = self.outbound(&self.config.events_exchange, &message)?;
        self.publish_with_retry(&self.shutdown, outbound, self.config.publish_max_retries)
            .await?;

        let audit = self.outbound(&self.config.audit_exchange, &message)?;
        if let Err(e) = self.transport.publish(audit).await {
            warn!(order_id = %event.order_id(), error = %e, "Audit copy not published");
        } else {
            record_message_published(&self.config.audit_exchange, kind.routing_key());
        }

        debug!(
            order_id = %event.order_id(),
            message_id = %message.id,
            routing_key = kind.routing_key(),
            "Event published"
        );
        Ok(())
    }

    /// Publish a pool metrics snapshot to the monitoring exchange.
    pub async fn publish_metrics(
        &self,
        metrics: &OrchestratorMetrics,
    ) -> Result<(), EventPublishError> {
        let body = serde_json::to_vec(metrics)?;

        let mut outbound =
            OutboundMessage::json(&self.config.monitoring_exchange, METRICS_ROUTING_KEY, body);
        outbound.delivery_mode = DeliveryMode::Transient;
        outbound.expiration = self.config.message_ttl();

        self.transport.publish(outbound).await?;
        record_message_published(&self.config.monitoring_exchange, METRICS_ROUTING_KEY);
        Ok(())
    }
}

#[async_trait]
impl<T: MessageTransport> EventPublisherPort for MessagePublisher<T> {
    async fn publish_order_events(&self, events: Vec<OrderEvent>) -> Result<(), EventPublishError> {
        for event in &events {
            self.publish_event(event).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MessageTransport, QueueSpec};
    use crate::domain::order::OrderCancelled;
    use crate::domain::shared::{OrderId, Timestamp, UserId};
    use crate::infrastructure::messaging::InMemoryBroker;
    use std::time::{Duration, Instant};

    fn config() -> MessagingConfig {
        MessagingConfig {
            publish_retry_delay_ms: 20,
            ..MessagingConfig::default()
        }
    }

    async fn publisher_with_capture(
        pattern: &str,
    ) -> (InMemoryBroker, MessagePublisher<InMemoryBroker>) {
        let broker = InMemoryBroker::new();
        let publisher = MessagePublisher::new(Arc::new(broker.clone()), config());
        publisher.declare_topology().await.unwrap();
        for (queue, exchange) in [("events", "orders.events"), ("audit", "orders.audit")] {
            broker.declare_queue(&QueueSpec::durable(queue)).await.unwrap();
            broker.bind_queue(queue, exchange, pattern).await.unwrap();
        }
        (broker, publisher)
    }

    fn cancelled_event() -> OrderEvent {
        OrderEvent::Cancelled(OrderCancelled {
            order_id: OrderId::new("ord-1"),
            user_id: UserId::new("alice"),
            reason: None,
            occurred_at: Timestamp::now(),
        })
    }

    #[tokio::test]
    async fn event_goes_to_events_and_audit_exchanges() {
        let (broker, publisher) = publisher_with_capture("order.#").await;

        publisher.publish_order_event(cancelled_event()).await.unwrap();

        let events = broker.queue_messages("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].routing_key, "order.cancelled");
        let envelope = EventMessage::decode(&events[0].body).unwrap();
        assert_eq!(envelope.subject, "ord-1");
        assert_eq!(envelope.source, "order-processor");
        assert_eq!(
            events[0].headers.get(MESSAGE_ID_HEADER),
            Some(&envelope.id.to_string())
        );
        assert_eq!(broker.queue_messages("audit").len(), 1);
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let (broker, publisher) = publisher_with_capture("#").await;
        broker.fail_next_publishes(2);
        let started = Instant::now();

        let outbound = OutboundMessage::json("orders.events", "order.created", b"{}".to_vec());
        publisher
            .publish_with_retry(&CancellationToken::new(), outbound, 3)
            .await
            .unwrap();

        // 20ms × 1 + 20ms × 2
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(broker.queue_depth("events"), 1);
    }

    #[tokio::test]
    async fn retry_returns_last_error_when_exhausted() {
        let (broker, publisher) = publisher_with_capture("#").await;
        broker.fail_next_publishes(5);

        let outbound = OutboundMessage::json("orders.events", "order.created", b"{}".to_vec());
        let err = publisher
            .publish_with_retry(&CancellationToken::new(), outbound, 3)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::PublishFailed { .. }));
        assert_eq!(broker.queue_depth("events"), 0);
    }

    #[tokio::test]
    async fn retry_aborts_on_cancel() {
        let (broker, publisher) = publisher_with_capture("#").await;
        broker.fail_next_publishes(5);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outbound = OutboundMessage::json("orders.events", "order.created", b"{}".to_vec());
        let err = publisher
            .publish_with_retry(&cancel, outbound, 3)
            .await
            .unwrap_err();

        assert_eq!(err, TransportError::Cancelled);
    }

    #[tokio::test]
    async fn metrics_snapshot_goes_to_monitoring() {
        let broker = InMemoryBroker::new();
        let publisher = MessagePublisher::new(Arc::new(broker.clone()), config());
        publisher.declare_topology().await.unwrap();
        broker.declare_queue(&QueueSpec::durable("monitor")).await.unwrap();
        broker
            .bind_queue("monitor", "orders.monitoring", "metrics.*")
            .await
            .unwrap();

        let snapshot = crate::application::worker_pool::PoolMetrics::new().snapshot();
        publisher.publish_metrics(&snapshot).await.unwrap();

        let messages = broker.queue_messages("monitor");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].routing_key, METRICS_ROUTING_KEY);
    }
}
