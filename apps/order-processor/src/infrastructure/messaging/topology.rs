//! Exchange and queue layout.
//!
//! ```text
//! orders.events ──order.created──▶ order-processor.order.created ─┐
//!               ──order.executed─▶ order-processor.order.executed ─┤ nack / ttl
//!               ...                                                ▼
//! orders.events.dlx ──#──▶ order-processor.dead-letter
//! orders.audit, orders.monitoring (+ .dlx counterparts)
//! ```

use tracing::debug;

use crate::application::ports::{ExchangeSpec, MessageTransport, QueueSpec, TransportError};
use crate::config::MessagingConfig;
use crate::domain::order::OrderEventKind;

/// Routing key for pool metrics snapshots on the monitoring exchange.
pub const METRICS_ROUTING_KEY: &str = "metrics.worker_pool";

/// Declares the broker layout described by a [`MessagingConfig`].
#[derive(Debug, Clone)]
pub struct Topology {
    config: MessagingConfig,
}

impl Topology {
    /// Layout for `config`.
    #[must_use]
    pub const fn new(config: MessagingConfig) -> Self {
        Self { config }
    }

    /// Main, audit and monitoring exchanges.
    #[must_use]
    pub fn exchanges(&self) -> Vec<String> {
        vec![
            self.config.events_exchange.clone(),
            self.config.audit_exchange.clone(),
            self.config.monitoring_exchange.clone(),
        ]
    }

    /// Consumer queue for an event kind.
    #[must_use]
    pub fn queue_for(&self, kind: OrderEventKind) -> QueueSpec {
        QueueSpec::durable(self.config.queue_name(kind.routing_key()))
            .with_dead_letter_exchange(
                self.config
                    .dead_letter_exchange(&self.config.events_exchange),
            )
            .with_message_ttl(self.config.message_ttl())
    }

    /// Declare every exchange, its dead-letter counterpart and the
    /// dead-letter queue.
    pub async fn declare_exchanges<T>(&self, transport: &T) -> Result<(), TransportError>
    where
        T: MessageTransport + ?Sized,
    {
        let dead_letter_queue = self.config.dead_letter_queue();
        transport
            .declare_queue(&QueueSpec::durable(dead_letter_queue.as_str()))
            .await?;

        for exchange in self.exchanges() {
            let dlx = self.config.dead_letter_exchange(&exchange);
            transport
                .declare_exchange(&ExchangeSpec::durable_topic(exchange.as_str()))
                .await?;
            transport
                .declare_exchange(&ExchangeSpec::durable_topic(dlx.as_str()))
                .await?;
            transport.bind_queue(&dead_letter_queue, &dlx, "#").await?;
        }

        debug!(dead_letter_queue = %dead_letter_queue, "Exchanges declared");
        Ok(())
    }

    /// Declare and bind the consumer queue for `kind`, returning its name.
    pub async fn declare_queue<T>(
        &self,
        transport: &T,
        kind: OrderEventKind,
    ) -> Result<String, TransportError>
    where
        T: MessageTransport + ?Sized,
    {
        let spec = self.queue_for(kind);
        transport.declare_queue(&spec).await?;
        transport
            .bind_queue(&spec.name, &self.config.events_exchange, kind.routing_key())
            .await?;

        debug!(queue = %spec.name, routing_key = kind.routing_key(), "Queue declared");
        Ok(spec.name)
    }
}
