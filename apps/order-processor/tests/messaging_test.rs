//! Publisher and consumer against the in-memory broker: redelivery,
//! dead-lettering, reconnection and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use order_processor::application::dto::EventMessage;
use order_processor::application::execution::ExecutionContext;
use order_processor::application::ports::{
    DEATH_QUEUE_HEADER, DEATH_REASON_HEADER, DELIVERY_COUNT_HEADER, EventPublisherPort,
    MessageHandler,
};
use order_processor::config::MessagingConfig;
use order_processor::domain::order::{
    CreateOrderCommand, Order, OrderEvent, OrderEventKind, OrderSide,
};
use order_processor::domain::shared::{MessageId, Symbol, UserId};
use order_processor::error::{ErrorCode, ExecutionError};
use order_processor::infrastructure::messaging::{
    ConsumerError, InMemoryBroker, MESSAGE_ID_HEADER, MessageConsumer, MessagePublisher, Topology,
};

const CREATED_QUEUE: &str = "order-processor.order.created";
const DEAD_LETTER_QUEUE: &str = "order-processor.dead-letter";

// =============================================================================
// Fakes
// =============================================================================

enum Behaviour {
    Succeed,
    Fail(ExecutionError),
    Hang,
}

/// Records every message it is handed.
struct RecordingHandler {
    behaviour: Behaviour,
    calls: AtomicU32,
    seen: Mutex<Vec<(MessageId, u32)>>,
}

impl RecordingHandler {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(
        &self,
        _ctx: &ExecutionContext,
        message: &EventMessage,
    ) -> Result<(), ExecutionError> {
        self.seen.lock().push((message.id.clone(), message.retry_count));
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail(err) => Err(err.clone()),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
        }
    }
}

// =============================================================================
// Harness
// =============================================================================

fn config() -> MessagingConfig {
    MessagingConfig {
        connect_backoff_ms: 5,
        connect_max_backoff_ms: 20,
        publish_retry_delay_ms: 5,
        workers_per_queue: 1,
        ..MessagingConfig::default()
    }
}

async fn declared_broker(config: &MessagingConfig) -> InMemoryBroker {
    let broker = InMemoryBroker::new();
    let topology = Topology::new(config.clone());
    topology.declare_exchanges(&broker).await.unwrap();
    topology
        .declare_queue(&broker, OrderEventKind::Created)
        .await
        .unwrap();
    broker
}

fn spawn_consumer(
    broker: &InMemoryBroker,
    config: MessagingConfig,
    handler: Arc<RecordingHandler>,
) -> (CancellationToken, JoinHandle<Result<(), ConsumerError>>) {
    let mut consumer = MessageConsumer::new(broker.clone(), config);
    consumer.register(OrderEventKind::Created, handler);
    let shutdown = CancellationToken::new();
    let running = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.start(&shutdown).await })
    };
    (shutdown, running)
}

fn created_event() -> OrderEvent {
    let mut order = Order::new(CreateOrderCommand::market(
        UserId::new("alice"),
        Symbol::new("BTC"),
        OrderSide::Buy,
        dec!(0.1),
    ))
    .unwrap();
    order.drain_events().remove(0)
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn published_event_is_delivered_once() {
    let config = config();
    let broker = declared_broker(&config).await;
    let handler = RecordingHandler::new(Behaviour::Succeed);
    let (shutdown, running) = spawn_consumer(&broker, config.clone(), Arc::clone(&handler));
    let publisher = MessagePublisher::new(Arc::new(broker.clone()), config);

    publisher.publish_order_event(created_event()).await.unwrap();

    eventually("delivery", || handler.calls() == 1).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(handler.calls(), 1);
    assert_eq!(handler.seen.lock()[0].1, 0);
    assert_eq!(broker.unacked_count(), 0);
    assert_eq!(broker.queue_depth(CREATED_QUEUE), 0);

    shutdown.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn publisher_retries_through_broker_errors() {
    let config = config();
    let broker = declared_broker(&config).await;
    let publisher = MessagePublisher::new(Arc::new(broker.clone()), config);
    broker.fail_next_publishes(2);

    publisher.publish_order_event(created_event()).await.unwrap();

    let queued = broker.queue_messages(CREATED_QUEUE);
    assert_eq!(queued.len(), 1);
    let message = EventMessage::decode(&queued[0].body).unwrap();
    assert_eq!(
        queued[0].headers.get(MESSAGE_ID_HEADER),
        Some(&message.id.to_string())
    );
}

#[tokio::test]
async fn transient_failures_are_redelivered_then_dead_lettered() {
    let config = MessagingConfig {
        max_retries: 3,
        ..config()
    };
    let broker = declared_broker(&config).await;
    let handler = RecordingHandler::new(Behaviour::Fail(ExecutionError::new(
        ErrorCode::ServiceUnavailable,
        "price feed down",
    )));
    let (shutdown, running) = spawn_consumer(&broker, config.clone(), Arc::clone(&handler));
    let publisher = MessagePublisher::new(Arc::new(broker.clone()), config);

    publisher.publish_order_event(created_event()).await.unwrap();

    eventually("dead letter", || broker.queue_depth(DEAD_LETTER_QUEUE) == 1).await;
    assert_eq!(handler.calls(), 4);
    let counts: Vec<u32> = handler.seen.lock().iter().map(|(_, count)| *count).collect();
    assert_eq!(counts, vec![0, 1, 2, 3]);

    let dead = broker.queue_messages(DEAD_LETTER_QUEUE);
    assert_eq!(dead[0].headers.get(DEATH_REASON_HEADER).unwrap(), "rejected");
    assert_eq!(dead[0].headers.get(DEATH_QUEUE_HEADER).unwrap(), CREATED_QUEUE);
    assert_eq!(dead[0].headers.get(DELIVERY_COUNT_HEADER).unwrap(), "3");
    assert_eq!(broker.queue_depth(CREATED_QUEUE), 0);

    shutdown.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn permanent_failures_are_dead_lettered_immediately() {
    let config = config();
    let broker = declared_broker(&config).await;
    let handler = RecordingHandler::new(Behaviour::Fail(ExecutionError::new(
        ErrorCode::InvalidRequest,
        "bad order",
    )));
    let (shutdown, running) = spawn_consumer(&broker, config.clone(), Arc::clone(&handler));
    let publisher = MessagePublisher::new(Arc::new(broker.clone()), config);

    publisher.publish_order_event(created_event()).await.unwrap();

    eventually("dead letter", || broker.queue_depth(DEAD_LETTER_QUEUE) == 1).await;
    assert_eq!(handler.calls(), 1);

    shutdown.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn consumer_reconnects_after_connection_loss() {
    let config = config();
    let broker = declared_broker(&config).await;
    let handler = RecordingHandler::new(Behaviour::Succeed);
    let (shutdown, running) = spawn_consumer(&broker, config.clone(), Arc::clone(&handler));
    let publisher = MessagePublisher::new(Arc::new(broker.clone()), config);

    publisher.publish_order_event(created_event()).await.unwrap();
    eventually("first delivery", || handler.calls() == 1).await;
    eventually("first ack", || broker.unacked_count() == 0).await;

    broker.disconnect_all();
    eventually("reconnect", || broker.connections() >= 2).await;

    publisher.publish_order_event(created_event()).await.unwrap();
    eventually("second delivery", || handler.calls() == 2).await;
    assert_eq!(broker.queue_depth(DEAD_LETTER_QUEUE), 0);

    shutdown.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn consumer_survives_initial_connect_failures() {
    let config = MessagingConfig {
        connect_attempts: 5,
        ..config()
    };
    let broker = declared_broker(&config).await;
    broker.fail_next_connects(2);
    let handler = RecordingHandler::new(Behaviour::Succeed);
    let (shutdown, running) = spawn_consumer(&broker, config.clone(), Arc::clone(&handler));
    let publisher = MessagePublisher::new(Arc::new(broker.clone()), config);

    publisher.publish_order_event(created_event()).await.unwrap();

    eventually("delivery", || handler.calls() == 1).await;
    assert_eq!(broker.connections(), 1);

    shutdown.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_requeues_the_in_flight_message() {
    let config = config();
    let broker = declared_broker(&config).await;
    let handler = RecordingHandler::new(Behaviour::Hang);
    let (shutdown, running) = spawn_consumer(&broker, config.clone(), Arc::clone(&handler));
    let publisher = MessagePublisher::new(Arc::new(broker.clone()), config);

    publisher.publish_order_event(created_event()).await.unwrap();
    eventually("handler started", || handler.calls() == 1).await;

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(broker.queue_depth(CREATED_QUEUE), 1);
    assert_eq!(broker.queue_depth(DEAD_LETTER_QUEUE), 0);
    assert_eq!(broker.unacked_count(), 0);
}
