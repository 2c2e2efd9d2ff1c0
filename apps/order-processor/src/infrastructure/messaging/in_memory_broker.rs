//! In-process topic broker.
//!
//! Implements the subset of AMQP semantics the processor relies on: topic
//! exchanges with `*`/`#` patterns, per-queue dead-letter exchange and TTL,
//! per-consumer prefetch with round-robin dispatch, and requeue with an
//! `x-delivery-count` header. `disconnect_all` and the failure hooks stand in
//! for a broker restart in tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::application::ports::{
    DEATH_QUEUE_HEADER, DEATH_REASON_HEADER, DELIVERY_COUNT_HEADER, Delivery, DeliveryStream,
    ExchangeSpec, MessageTransport, OutboundMessage, QueueSpec, TransportConnector,
    TransportError,
};

/// Outstanding deliveries allowed when a consumer asks for prefetch 0.
const UNBOUNDED_PREFETCH: usize = 1024;

/// A message waiting in a queue, as seen by [`InMemoryBroker::queue_messages`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Exchange it was last published or dead-lettered to.
    pub exchange: String,
    /// Routing key.
    pub routing_key: String,
    /// Payload.
    pub body: Vec<u8>,
    /// Headers.
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
    headers: BTreeMap<String, String>,
    expires_at: Option<Instant>,
    redelivered: bool,
}

impl Message {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct Consumer {
    tag: String,
    limit: usize,
    in_flight: usize,
    sender: mpsc::Sender<Delivery>,
}

struct Queue {
    spec: QueueSpec,
    ready: VecDeque<Message>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
}

struct Unacked {
    queue: String,
    consumer_tag: String,
    message: Message,
}

struct Binding {
    queue: String,
    exchange: String,
    pattern: String,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, Queue>,
    bindings: Vec<Binding>,
    unacked: HashMap<u64, Unacked>,
    next_delivery_tag: u64,
    next_consumer_tag: u64,
    failing_connects: u32,
    failing_publishes: u32,
    connections: u32,
}

/// Shared in-memory broker; clones share state.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryBroker")
            .field("exchanges", &state.exchanges.len())
            .field("queues", &state.queues.len())
            .field("unacked", &state.unacked.len())
            .finish()
    }
}

impl InMemoryBroker {
    /// An empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every consumer and requeue their unacknowledged deliveries.
    pub fn disconnect_all(&self) {
        let mut state = self.state.lock();
        let unacked: Vec<Unacked> = state.unacked.drain().map(|(_, u)| u).collect();
        for queue in state.queues.values_mut() {
            queue.consumers.clear();
        }
        for Unacked { queue, mut message, .. } in unacked {
            message.redelivered = true;
            if let Some(q) = state.queues.get_mut(&queue) {
                q.ready.push_front(message);
            }
        }
        debug!("Broker dropped all consumers");
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().failing_connects = n;
    }

    /// Fail the next `n` publishes.
    pub fn fail_next_publishes(&self, n: u32) {
        self.state.lock().failing_publishes = n;
    }

    /// Successful connections so far.
    #[must_use]
    pub fn connections(&self) -> u32 {
        self.state.lock().connections
    }

    /// Messages ready for delivery in `queue`, after expiring stale ones.
    #[must_use]
    pub fn queue_depth(&self, queue: &str) -> usize {
        let mut state = self.state.lock();
        state.settle(vec![queue.to_string()]);
        state.queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Snapshot of the messages ready in `queue`.
    #[must_use]
    pub fn queue_messages(&self, queue: &str) -> Vec<QueuedMessage> {
        let mut state = self.state.lock();
        state.settle(vec![queue.to_string()]);
        state.queues.get(queue).map_or_else(Vec::new, |q| {
            q.ready
                .iter()
                .map(|m| QueuedMessage {
                    exchange: m.exchange.clone(),
                    routing_key: m.routing_key.clone(),
                    body: m.body.clone(),
                    headers: m.headers.clone(),
                })
                .collect()
        })
    }

    /// Deliveries handed out and not yet acked or nacked.
    #[must_use]
    pub fn unacked_count(&self) -> usize {
        self.state.lock().unacked.len()
    }
}

impl State {
    /// Queues bound to `exchange` whose pattern matches `routing_key`.
    fn route(&self, exchange: &str, routing_key: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.bindings
            .iter()
            .filter(|b| b.exchange == exchange && topic_matches(&b.pattern, routing_key))
            .filter(|b| seen.insert(b.queue.as_str()))
            .map(|b| b.queue.clone())
            .collect()
    }

    fn enqueue(&mut self, exchange: &str, message: &Message) -> Vec<String> {
        let targets = self.route(exchange, &message.routing_key);
        if targets.is_empty() {
            trace!(exchange, routing_key = %message.routing_key, "Unroutable message dropped");
        }
        let now = Instant::now();
        for name in &targets {
            if let Some(queue) = self.queues.get_mut(name) {
                let mut message = message.clone();
                message.exchange = exchange.to_string();
                if let Some(ttl) = queue.spec.message_ttl {
                    let queue_expiry = now + ttl;
                    message.expires_at = Some(
                        message
                            .expires_at
                            .map_or(queue_expiry, |at| at.min(queue_expiry)),
                    );
                }
                queue.ready.push_back(message);
            }
        }
        targets
    }

    /// Route `message` to the dead-letter exchange of `queue`, if any.
    fn dead_letter(&mut self, queue: &str, mut message: Message, reason: &str) -> Vec<String> {
        let Some(spec) = self.queues.get(queue).map(|q| q.spec.clone()) else {
            return Vec::new();
        };
        let Some(exchange) = spec.dead_letter_exchange else {
            debug!(queue, reason, "Message discarded without dead-letter exchange");
            return Vec::new();
        };

        message
            .headers
            .insert(DEATH_REASON_HEADER.to_string(), reason.to_string());
        message
            .headers
            .entry(DEATH_QUEUE_HEADER.to_string())
            .or_insert_with(|| queue.to_string());
        if let Some(key) = spec.dead_letter_routing_key {
            message.routing_key = key;
        }
        message.expires_at = None;
        message.redelivered = false;

        debug!(queue, exchange = %exchange, reason, "Message dead-lettered");
        self.enqueue(&exchange, &message)
    }

    /// Expire and deliver until no queue in the worklist changes.
    fn settle(&mut self, mut dirty: Vec<String>) {
        while let Some(name) = dirty.pop() {
            let more = self.pump(&name);
            dirty.extend(more);
        }
    }

    /// Expire stale messages at the head of `name` and hand ready messages to
    /// consumers with prefetch room. Returns queues that received
    /// dead-lettered messages.
    fn pump(&mut self, name: &str) -> Vec<String> {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut dirty = Vec::new();

        loop {
            self.reap_closed(name);
            let Some(queue) = self.queues.get_mut(name) else {
                break;
            };

            let Some(front) = queue.ready.front() else {
                break;
            };
            if front.is_expired(now) {
                if let Some(message) = queue.ready.pop_front() {
                    expired.push(message);
                }
                continue;
            }

            let count = queue.consumers.len();
            let Some(index) = (0..count)
                .map(|offset| (queue.next_consumer + offset) % count)
                .find(|&i| queue.consumers[i].in_flight < queue.consumers[i].limit)
            else {
                break;
            };
            queue.next_consumer = (index + 1) % count.max(1);

            let Some(message) = queue.ready.pop_front() else {
                break;
            };
            self.next_delivery_tag += 1;
            let delivery_tag = self.next_delivery_tag;
            let consumer = &mut queue.consumers[index];
            let delivery = Delivery {
                consumer_tag: consumer.tag.clone(),
                delivery_tag,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                body: message.body.clone(),
                headers: message.headers.clone(),
                redelivered: message.redelivered,
            };

            if consumer.sender.try_send(delivery).is_ok() {
                consumer.in_flight += 1;
                let consumer_tag = consumer.tag.clone();
                self.unacked.insert(
                    delivery_tag,
                    Unacked {
                        queue: name.to_string(),
                        consumer_tag,
                        message,
                    },
                );
            } else {
                // Receiver gone; the next pass reaps the consumer.
                queue.ready.push_front(message);
            }
        }

        for message in expired {
            dirty.extend(self.dead_letter(name, message, "expired"));
        }
        dirty
    }

    /// Drop consumers whose stream was closed and requeue what they held,
    /// as a broker does when a channel goes away.
    fn reap_closed(&mut self, name: &str) {
        let Some(queue) = self.queues.get_mut(name) else {
            return;
        };
        let closed: HashSet<String> = queue
            .consumers
            .iter()
            .filter(|c| c.sender.is_closed())
            .map(|c| c.tag.clone())
            .collect();
        if closed.is_empty() {
            return;
        }
        queue.consumers.retain(|c| !closed.contains(&c.tag));

        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.queue == name && closed.contains(&u.consumer_tag))
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();
        for tag in tags.into_iter().rev() {
            if let Some(Unacked { mut message, .. }) = self.unacked.remove(&tag) {
                message.redelivered = true;
                queue.ready.push_front(message);
            }
        }
        trace!(queue = name, consumers = closed.len(), "Reaped closed consumers");
    }

    fn settle_delivery(&mut self, delivery: &Delivery) -> Result<Unacked, TransportError> {
        let unacked = self
            .unacked
            .remove(&delivery.delivery_tag)
            .ok_or_else(|| TransportError::ChannelClosed {
                message: format!("unknown delivery tag {}", delivery.delivery_tag),
            })?;
        if let Some(queue) = self.queues.get_mut(&unacked.queue) {
            if let Some(consumer) = queue
                .consumers
                .iter_mut()
                .find(|c| c.tag == unacked.consumer_tag)
            {
                consumer.in_flight = consumer.in_flight.saturating_sub(1);
            }
        }
        Ok(unacked)
    }
}

/// AMQP topic matching: `*` is exactly one word, `#` zero or more.
fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}

#[async_trait]
impl MessageTransport for InMemoryBroker {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), TransportError> {
        self.state
            .lock()
            .exchanges
            .entry(spec.name.clone())
            .or_insert_with(|| spec.clone());
        Ok(())
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), TransportError> {
        self.state
            .lock()
            .queues
            .entry(spec.name.clone())
            .or_insert_with(|| Queue {
                spec: spec.clone(),
                ready: VecDeque::new(),
                consumers: Vec::new(),
                next_consumer: 0,
            });
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.queues.contains_key(queue) {
            return Err(TransportError::NotFound {
                kind: "queue",
                name: queue.to_string(),
            });
        }
        if !state.exchanges.contains_key(exchange) {
            return Err(TransportError::NotFound {
                kind: "exchange",
                name: exchange.to_string(),
            });
        }
        let exists = state
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange && b.pattern == pattern);
        if !exists {
            state.bindings.push(Binding {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                pattern: pattern.to_string(),
            });
        }
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(TransportError::PublishFailed {
                message: "broker unavailable".to_string(),
            });
        }
        if !state.exchanges.contains_key(&message.exchange) {
            return Err(TransportError::NotFound {
                kind: "exchange",
                name: message.exchange,
            });
        }

        let stored = Message {
            exchange: message.exchange.clone(),
            routing_key: message.routing_key,
            body: message.body,
            headers: message.headers,
            expires_at: message.expiration.map(|ttl| Instant::now() + ttl),
            redelivered: false,
        };
        let dirty = state.enqueue(&message.exchange, &stored);
        state.settle(dirty);
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, TransportError> {
        let mut state = self.state.lock();
        state.next_consumer_tag += 1;
        let tag = format!("ctag-{}", state.next_consumer_tag);

        let limit = if prefetch == 0 {
            UNBOUNDED_PREFETCH
        } else {
            usize::from(prefetch)
        };
        let (sender, receiver) = mpsc::channel(limit);

        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::NotFound {
                kind: "queue",
                name: queue.to_string(),
            })?;
        q.consumers.push(Consumer {
            tag,
            limit,
            in_flight: 0,
            sender,
        });
        state.settle(vec![queue.to_string()]);
        Ok(receiver)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let unacked = state.settle_delivery(delivery)?;
        state.settle(vec![unacked.queue]);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let Unacked {
            queue, mut message, ..
        } = state.settle_delivery(delivery)?;

        let mut dirty = vec![queue.clone()];
        if requeue {
            let count = delivery.delivery_count() + 1;
            message
                .headers
                .insert(DELIVERY_COUNT_HEADER.to_string(), count.to_string());
            message.redelivered = true;
            if let Some(q) = state.queues.get_mut(&queue) {
                q.ready.push_front(message);
            }
        } else {
            dirty.extend(state.dead_letter(&queue, message, "rejected"));
        }
        state.settle(dirty);
        Ok(())
    }
}

#[async_trait]
impl TransportConnector for InMemoryBroker {
    type Transport = Self;

    async fn connect(&self) -> Result<Arc<Self::Transport>, TransportError> {
        let mut state = self.state.lock();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(TransportError::ConnectionError {
                message: "connection refused".to_string(),
            });
        }
        state.connections += 1;
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn broker_with_queue(name: &str, pattern: &str) -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker
            .declare_exchange(&ExchangeSpec::durable_topic("events"))
            .await
            .unwrap();
        broker
            .declare_exchange(&ExchangeSpec::durable_topic("events.dlx"))
            .await
            .unwrap();
        broker
            .declare_queue(&QueueSpec::durable(name).with_dead_letter_exchange("events.dlx"))
            .await
            .unwrap();
        broker.declare_queue(&QueueSpec::durable("dlq")).await.unwrap();
        broker.bind_queue(name, "events", pattern).await.unwrap();
        broker.bind_queue("dlq", "events.dlx", "#").await.unwrap();
        broker
    }

    fn message(routing_key: &str) -> OutboundMessage {
        OutboundMessage::json("events", routing_key, b"{}".to_vec())
    }

    #[test]
    fn topic_patterns() {
        assert!(topic_matches("order.created", "order.created"));
        assert!(topic_matches("order.*", "order.created"));
        assert!(!topic_matches("order.*", "order.created.v2"));
        assert!(topic_matches("order.#", "order.created.v2"));
        assert!(topic_matches("order.#", "order"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(!topic_matches("order.created", "order.failed"));
        assert!(topic_matches("*.created", "order.created"));
    }

    #[tokio::test]
    async fn publish_routes_and_delivers() {
        let broker = broker_with_queue("q", "order.*").await;
        let mut stream = broker.consume("q", 10).await.unwrap();

        broker.publish(message("order.created")).await.unwrap();
        broker.publish(message("trade.created")).await.unwrap();

        let delivery = stream.recv().await.unwrap();
        assert_eq!(delivery.routing_key, "order.created");
        assert_eq!(broker.unacked_count(), 1);
        broker.ack(&delivery).await.unwrap();
        assert_eq!(broker.unacked_count(), 0);
        assert_eq!(broker.queue_depth("q"), 0);
    }

    #[tokio::test]
    async fn prefetch_limits_outstanding_deliveries() {
        let broker = broker_with_queue("q", "#").await;
        let mut stream = broker.consume("q", 2).await.unwrap();
        for _ in 0..5 {
            broker.publish(message("order.created")).await.unwrap();
        }

        assert_eq!(broker.unacked_count(), 2);
        assert_eq!(broker.queue_depth("q"), 3);

        let first = stream.recv().await.unwrap();
        broker.ack(&first).await.unwrap();
        assert_eq!(broker.unacked_count(), 2);
        assert_eq!(broker.queue_depth("q"), 2);
    }

    #[tokio::test]
    async fn requeue_increments_delivery_count() {
        let broker = broker_with_queue("q", "#").await;
        let mut stream = broker.consume("q", 1).await.unwrap();
        broker.publish(message("order.created")).await.unwrap();

        let first = stream.recv().await.unwrap();
        assert_eq!(first.delivery_count(), 0);
        broker.nack(&first, true).await.unwrap();

        let second = stream.recv().await.unwrap();
        assert_eq!(second.delivery_count(), 1);
        assert!(second.redelivered);
    }

    #[tokio::test]
    async fn reject_without_requeue_dead_letters() {
        let broker = broker_with_queue("q", "#").await;
        let mut stream = broker.consume("q", 1).await.unwrap();
        broker.publish(message("order.created")).await.unwrap();

        let delivery = stream.recv().await.unwrap();
        broker.nack(&delivery, false).await.unwrap();

        let dead = broker.queue_messages("dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].routing_key, "order.created");
        assert_eq!(
            dead[0].headers.get(DEATH_REASON_HEADER).map(String::as_str),
            Some("rejected")
        );
        assert_eq!(
            dead[0].headers.get(DEATH_QUEUE_HEADER).map(String::as_str),
            Some("q")
        );
    }

    #[tokio::test]
    async fn expired_messages_are_dead_lettered() {
        let broker = broker_with_queue("q", "#").await;
        let mut outbound = message("order.created");
        outbound.expiration = Some(Duration::from_millis(10));
        broker.publish(outbound).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(broker.queue_depth("q"), 0);
        let dead = broker.queue_messages("dlq");
        assert_eq!(dead.len(), 1);
        assert_eq!(
            dead[0].headers.get(DEATH_REASON_HEADER).map(String::as_str),
            Some("expired")
        );
    }

    #[tokio::test]
    async fn disconnect_requeues_unacked() {
        let broker = broker_with_queue("q", "#").await;
        let mut stream = broker.consume("q", 1).await.unwrap();
        broker.publish(message("order.created")).await.unwrap();
        let delivery = stream.recv().await.unwrap();

        broker.disconnect_all();

        assert!(stream.recv().await.is_none());
        assert!(broker.ack(&delivery).await.is_err());
        let mut stream = broker.consume("q", 1).await.unwrap();
        let redelivered = stream.recv().await.unwrap();
        assert!(redelivered.redelivered);
    }

    #[tokio::test]
    async fn dropped_stream_returns_its_deliveries() {
        let broker = broker_with_queue("q", "#").await;
        let mut stream = broker.consume("q", 5).await.unwrap();
        broker.publish(message("order.created")).await.unwrap();
        let _delivery = stream.recv().await.unwrap();
        assert_eq!(broker.unacked_count(), 1);

        drop(stream);

        assert_eq!(broker.queue_depth("q"), 1);
        assert_eq!(broker.unacked_count(), 0);
    }

    #[tokio::test]
    async fn round_robin_between_consumers() {
        let broker = broker_with_queue("q", "#").await;
        let mut a = broker.consume("q", 10).await.unwrap();
        let mut b = broker.consume("q", 10).await.unwrap();

        broker.publish(message("order.created")).await.unwrap();
        broker.publish(message("order.created")).await.unwrap();

        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    #[tokio::test]
    async fn connect_failures_then_success() {
        let broker = InMemoryBroker::new();
        broker.fail_next_connects(2);

        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_ok());
        assert_eq!(broker.connections(), 1);
    }

    #[tokio::test]
    async fn unknown_exchange_is_not_found() {
        let broker = InMemoryBroker::new();
        let err = broker.publish(message("order.created")).await.unwrap_err();
        assert!(matches!(err, TransportError::NotFound { kind: "exchange", .. }));
    }
}
