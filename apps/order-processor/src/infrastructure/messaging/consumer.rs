//! Message Consumer
//!
//! Connects with bounded exponential backoff, declares one queue per
//! registered event kind and runs `workers_per_queue` consume loops on each.
//! Every delivery is settled exactly once:
//!
//! | Outcome | Settlement |
//! |---------|------------|
//! | undecodable body | nack, dead-lettered |
//! | handler `Ok` | ack |
//! | retryable error, `x-delivery-count < max_retries` | nack, requeued |
//! | any other error | nack, dead-lettered |
//! | shutdown while handling | nack, requeued |
//!
//! When every delivery stream closes (connection lost) the consumer
//! reconnects with the same backoff and re-declares its topology.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::reconnect::ReconnectPolicy;
use super::topology::Topology;
use crate::application::dto::EventMessage;
use crate::application::execution::ExecutionContext;
use crate::application::ports::{
    Delivery, DeliveryStream, MessageHandler, MessageTransport, TransportConnector,
    TransportError,
};
use crate::config::MessagingConfig;
use crate::domain::order::OrderEventKind;
use crate::observability::record_message_consumed;

/// Consumer errors.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// No handler was registered before `start`.
    #[error("no message handlers registered")]
    NoHandlers,

    /// The broker stayed unreachable for every configured attempt.
    #[error("broker unreachable after {attempts} attempts: {source}")]
    ConnectFailed {
        /// Attempts made.
        attempts: u32,
        /// Last connection error.
        source: TransportError,
    },

    /// Exchanges or queues could not be declared.
    #[error("topology declaration failed: {0}")]
    Topology(TransportError),
}

/// Per-loop settings copied out of the configuration.
#[derive(Debug, Clone)]
struct LoopSettings {
    queue: String,
    max_retries: u32,
    handler_timeout: std::time::Duration,
}

/// Dispatches deliveries to handlers registered per event kind.
pub struct MessageConsumer<C: TransportConnector> {
    connector: C,
    config: MessagingConfig,
    handlers: BTreeMap<OrderEventKind, Arc<dyn MessageHandler>>,
}

impl<C: TransportConnector> MessageConsumer<C> {
    /// Create a consumer with no handlers.
    pub fn new(connector: C, config: MessagingConfig) -> Self {
        Self {
            connector,
            config,
            handlers: BTreeMap::new(),
        }
    }

    /// Route `kind` to `handler`, replacing any previous registration.
    pub fn register(
        &mut self,
        kind: OrderEventKind,
        handler: Arc<dyn MessageHandler>,
    ) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Consume until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns error if no handler is registered, the broker cannot be
    /// reached within the configured attempts, or topology declaration fails.
    pub async fn start(&self, shutdown: &CancellationToken) -> Result<(), ConsumerError> {
        if self.handlers.is_empty() {
            return Err(ConsumerError::NoHandlers);
        }

        let topology = Topology::new(self.config.clone());
        let mut policy = ReconnectPolicy::from_config(&self.config);

        loop {
            let Some(transport) = self.connect(shutdown, &mut policy).await? else {
                return Ok(());
            };
            policy.reset();

            let mut loops = JoinSet::new();
            if let Err(e) = self.subscribe(&topology, &transport, shutdown, &mut loops).await {
                // Connection-level failures are retried like a dropped stream.
                if !matches!(
                    e,
                    TransportError::ConnectionError { .. } | TransportError::ChannelClosed { .. }
                ) {
                    loops.abort_all();
                    return Err(ConsumerError::Topology(e));
                }
                warn!(error = %e, "Subscription failed");
            }

            while let Some(joined) = loops.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Consume loop panicked");
                }
            }

            if shutdown.is_cancelled() {
                info!("Message consumer stopped");
                return Ok(());
            }
            warn!("Broker connection lost, reconnecting");
        }
    }

    /// Connect, backing off between failures. `None` means shutdown.
    async fn connect(
        &self,
        shutdown: &CancellationToken,
        policy: &mut ReconnectPolicy,
    ) -> Result<Option<Arc<C::Transport>>, ConsumerError> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(None);
            }

            let err = match self.connector.connect().await {
                Ok(transport) => {
                    debug!(attempts = policy.current_attempt() + 1, "Connected to broker");
                    return Ok(Some(transport));
                }
                Err(e) => e,
            };

            let Some(delay) = policy.next_backoff() else {
                return Err(ConsumerError::ConnectFailed {
                    attempts: policy.current_attempt() + 1,
                    source: err,
                });
            };
            warn!(
                attempt = policy.current_attempt(),
                delay_ms = delay.as_millis(),
                error = %err,
                "Broker connection failed, retrying"
            );

            tokio::select! {
                () = shutdown.cancelled() => return Ok(None),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Declare the topology and spawn the consume loops.
    async fn subscribe(
        &self,
        topology: &Topology,
        transport: &Arc<C::Transport>,
        shutdown: &CancellationToken,
        loops: &mut JoinSet<()>,
    ) -> Result<(), TransportError> {
        topology.declare_exchanges(transport.as_ref()).await?;

        for (kind, handler) in &self.handlers {
            let queue = topology.declare_queue(transport.as_ref(), *kind).await?;
            let settings = LoopSettings {
                queue,
                max_retries: self.config.max_retries,
                handler_timeout: self.config.handler_timeout(),
            };

            for worker_id in 0..self.config.workers_per_queue.max(1) {
                let stream = transport
                    .consume(&settings.queue, self.config.prefetch)
                    .await?;
                loops.spawn(consume_loop(
                    worker_id,
                    Arc::clone(transport),
                    stream,
                    Arc::clone(handler),
                    settings.clone(),
                    shutdown.clone(),
                ));
            }
            info!(
                queue = %settings.queue,
                routing_key = kind.routing_key(),
                workers = self.config.workers_per_queue.max(1),
                prefetch = self.config.prefetch,
                "Consuming"
            );
        }
        Ok(())
    }
}

async fn consume_loop<T: MessageTransport + 'static>(
    worker_id: usize,
    transport: Arc<T>,
    mut stream: DeliveryStream,
    handler: Arc<dyn MessageHandler>,
    settings: LoopSettings,
    shutdown: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            delivery = stream.recv() => match delivery {
                Some(delivery) => delivery,
                None => {
                    debug!(worker_id, queue = %settings.queue, "Delivery stream closed");
                    break;
                }
            },
        };
        handle_delivery(transport.as_ref(), handler.as_ref(), &settings, &shutdown, delivery)
            .await;
    }
}

async fn handle_delivery<T: MessageTransport + ?Sized>(
    transport: &T,
    handler: &dyn MessageHandler,
    settings: &LoopSettings,
    shutdown: &CancellationToken,
    delivery: Delivery,
) {
    let count = delivery.delivery_count();

    let mut message = match EventMessage::decode(&delivery.body) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                queue = %settings.queue,
                delivery_tag = delivery.delivery_tag,
                error = %e,
                "Malformed message, dead-lettering"
            );
            settle(transport, &delivery, &settings.queue, Some(false)).await;
            return;
        }
    };
    message.retry_count = count;

    let ctx = ExecutionContext::with_cancellation(shutdown)
        .with_caller(format!("consumer:{}", settings.queue))
        .with_attempt(count + 1, count >= settings.max_retries)
        .with_timeout(settings.handler_timeout);

    let outcome = ctx.run(handler.handle(&ctx, &message)).await;

    let requeue = match outcome {
        Ok(()) => None,
        Err(e) if shutdown.is_cancelled() => {
            debug!(message_id = %message.id, error = %e, "Interrupted by shutdown, requeueing");
            Some(true)
        }
        Err(e) if e.is_retryable() && count < settings.max_retries => {
            warn!(
                message_id = %message.id,
                routing_key = %delivery.routing_key,
                attempt = count + 1,
                max_retries = settings.max_retries,
                error = %e,
                "Handler failed, requeueing"
            );
            Some(true)
        }
        Err(e) => {
            error!(
                message_id = %message.id,
                routing_key = %delivery.routing_key,
                attempt = count + 1,
                code = %e.code(),
                error = %e,
                "Handler failed, dead-lettering"
            );
            Some(false)
        }
    };
    settle(transport, &delivery, &settings.queue, requeue).await;
}

/// `None` acks; `Some(requeue)` nacks.
async fn settle<T: MessageTransport + ?Sized>(
    transport: &T,
    delivery: &Delivery,
    queue: &str,
    requeue: Option<bool>,
) {
    let (result, outcome) = match requeue {
        None => (transport.ack(delivery).await, "ack"),
        Some(true) => (transport.nack(delivery, true).await, "requeue"),
        Some(false) => (transport.nack(delivery, false).await, "dead_letter"),
    };

    match result {
        Ok(()) => record_message_consumed(queue, outcome),
        Err(e) => warn!(
            queue,
            delivery_tag = delivery.delivery_tag,
            outcome,
            error = %e,
            "Failed to settle delivery"
        ),
    }
}
