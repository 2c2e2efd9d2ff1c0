//! Message Handlers
//!
//! Both handlers re-read the order before acting so that redeliveries of an
//! already-settled event acknowledge without side effects.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use super::dispatch::OrderDispatcher;
use crate::application::dto::EventMessage;
use crate::application::execution::{ExecutionContext, OrderExecutor};
use crate::application::ports::MessageHandler;
use crate::domain::order::{OrderEvent, OrderEventKind, OrderRepository, OrderStatus};
use crate::domain::shared::{MessageId, OrderId, Timestamp};
use crate::error::{ErrorCategory, ErrorCode, ExecutionError};

// ============================================================================
// order.created
// ============================================================================

/// Executes newly created orders through the worker pool.
pub struct OrderCreatedHandler<R, X>
where
    R: OrderRepository,
    X: OrderExecutor + 'static,
{
    repository: Arc<R>,
    dispatcher: Arc<OrderDispatcher<X>>,
}

impl<R, X> OrderCreatedHandler<R, X>
where
    R: OrderRepository,
    X: OrderExecutor + 'static,
{
    /// Create a new `OrderCreatedHandler`.
    pub const fn new(repository: Arc<R>, dispatcher: Arc<OrderDispatcher<X>>) -> Self {
        Self {
            repository,
            dispatcher,
        }
    }
}

#[async_trait]
impl<R, X> MessageHandler for OrderCreatedHandler<R, X>
where
    R: OrderRepository,
    X: OrderExecutor + 'static,
{
    async fn handle(
        &self,
        ctx: &ExecutionContext,
        message: &EventMessage,
    ) -> Result<(), ExecutionError> {
        let OrderEvent::Created(created) = message.event()? else {
            return Err(ExecutionError::malformed(format!(
                "expected order.created, got {}",
                message.event_type
            )));
        };

        let order = self
            .repository
            .find_by_id(&created.order_id)
            .await?
            .ok_or_else(|| ExecutionError::order_not_found(created.order_id.as_str()))?;

        if order.status() != OrderStatus::Pending {
            debug!(
                order_id = %order.id(),
                status = %order.status(),
                message_id = %message.id,
                "Order already settled, acknowledging"
            );
            return Ok(());
        }

        match self.dispatcher.dispatch_and_wait(ctx, &order).await {
            Ok(result) => {
                info!(
                    order_id = %order.id(),
                    duration_ms = result.duration.as_millis(),
                    "Order executed from message"
                );
                Ok(())
            }
            // The order reached a terminal state; the failure is recorded on it.
            Err(e) if e.code() == ErrorCode::OrderNotPending => Ok(()),
            Err(e) if e.category() == ErrorCategory::Validation => {
                info!(order_id = %order.id(), error = %e, "Order rejected");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// order.executed | order.cancelled | order.failed
// ============================================================================

/// One recorded lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    /// Envelope id.
    pub message_id: MessageId,
    /// Order concerned.
    pub order_id: OrderId,
    /// Event kind.
    pub event_type: OrderEventKind,
    /// Order status confirmed at record time.
    pub status: OrderStatus,
    /// Producing service.
    pub source: String,
    /// When the entry was recorded.
    pub recorded_at: Timestamp,
}

/// Entries kept by [`AuditTrailHandler::new`].
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// The most recent entries and the message ids they came from.
///
/// `seen` holds the ids of `entries` plus those still being verified, so
/// duplicates are caught for as long as the entry is retained.
struct AuditLog {
    capacity: usize,
    seen: HashSet<MessageId>,
    entries: VecDeque<AuditEntry>,
}

impl AuditLog {
    fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            seen: HashSet::new(),
            entries: VecDeque::new(),
        }
    }

    fn push(&mut self, entry: AuditEntry) {
        if self.entries.len() == self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.seen.remove(&evicted.message_id);
            }
        }
        self.entries.push_back(entry);
    }
}

/// Records terminal transitions once per message id, keeping a bounded
/// window of recent entries.
pub struct AuditTrailHandler<R: OrderRepository> {
    repository: Arc<R>,
    log: RwLock<AuditLog>,
}

impl<R: OrderRepository> AuditTrailHandler<R> {
    /// Create a handler keeping [`DEFAULT_AUDIT_CAPACITY`] entries.
    pub fn new(repository: Arc<R>) -> Self {
        Self::with_capacity(repository, DEFAULT_AUDIT_CAPACITY)
    }

    /// Create a handler keeping the latest `capacity` entries. A message
    /// redelivered after its entry was evicted is recorded again.
    pub fn with_capacity(repository: Arc<R>, capacity: usize) -> Self {
        Self {
            repository,
            log: RwLock::new(AuditLog::with_capacity(capacity)),
        }
    }

    /// Retained entries in arrival order.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.log.read().entries.iter().cloned().collect()
    }

    async fn verify(&self, message: &EventMessage) -> Result<AuditEntry, ExecutionError> {
        let event = message.event()?;
        if event.kind() == OrderEventKind::Created {
            return Err(ExecutionError::malformed(
                "order.created is not a terminal transition",
            ));
        }

        let order = self
            .repository
            .find_by_id(event.order_id())
            .await?
            .ok_or_else(|| ExecutionError::order_not_found(event.order_id().as_str()))?;

        let expected = event.kind().resulting_status();
        if order.status() != expected {
            return Err(ExecutionError::new(
                ErrorCode::InvalidStateTransition,
                format!(
                    "order {} is {}, event {} expects {expected}",
                    order.id(),
                    order.status(),
                    event.kind()
                ),
            ));
        }

        Ok(AuditEntry {
            message_id: message.id.clone(),
            order_id: order.id().clone(),
            event_type: event.kind(),
            status: order.status(),
            source: message.source.clone(),
            recorded_at: Timestamp::now(),
        })
    }
}

#[async_trait]
impl<R: OrderRepository> MessageHandler for AuditTrailHandler<R> {
    async fn handle(
        &self,
        _ctx: &ExecutionContext,
        message: &EventMessage,
    ) -> Result<(), ExecutionError> {
        if !self.log.write().seen.insert(message.id.clone()) {
            debug!(message_id = %message.id, "Duplicate audit message");
            return Ok(());
        }

        match self.verify(message).await {
            Ok(entry) => {
                info!(
                    order_id = %entry.order_id,
                    event_type = %entry.event_type,
                    "Audit entry recorded"
                );
                self.log.write().push(entry);
                Ok(())
            }
            Err(e) => {
                self.log.write().seen.remove(&message.id);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::execution::{ExecutionResult, FeeOutcome, PriceOutcome};
    use crate::application::worker_pool::WorkerPool;
    use crate::config::WorkerPoolConfig;
    use crate::domain::order::{CreateOrderCommand, ExecutionFill, Order, OrderSide};
    use crate::domain::shared::{Symbol, UserId};
    use crate::infrastructure::persistence::InMemoryOrderRepository;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    struct FixedExecutor {
        error: Option<ExecutionError>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl OrderExecutor for FixedExecutor {
        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            order: &Order,
        ) -> Result<ExecutionResult, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = &self.error {
                return Err(err.clone());
            }
            let mut result = ExecutionResult::new(order.id().clone());
            result.price = Some(PriceOutcome {
                market_price: dec!(10),
                slippage: dec!(0),
                execution_price: dec!(10),
                source: "test".to_string(),
            });
            result.fee = Some(FeeOutcome {
                rate: dec!(0),
                amount: dec!(0),
                minimum_applied: false,
            });
            result.total_amount = Some(dec!(10));
            result.success = true;
            Ok(result)
        }
    }

    fn new_order() -> Order {
        Order::new(CreateOrderCommand::market(
            UserId::new("alice"),
            Symbol::new("BTC"),
            OrderSide::Buy,
            dec!(1),
        ))
        .unwrap()
    }

    fn created_message(order: &mut Order) -> EventMessage {
        let event = order.drain_events().remove(0);
        EventMessage::from_event(&event, "test", 0).unwrap()
    }

    async fn created_handler(
        error: Option<ExecutionError>,
    ) -> (
        Arc<InMemoryOrderRepository>,
        Arc<FixedExecutor>,
        Arc<WorkerPool<FixedExecutor>>,
        OrderCreatedHandler<InMemoryOrderRepository, FixedExecutor>,
    ) {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let executor = Arc::new(FixedExecutor {
            error,
            calls: AtomicU32::new(0),
        });
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&executor),
            WorkerPoolConfig {
                workers: 1,
                max_retries: 0,
                ..WorkerPoolConfig::default()
            },
        ));
        pool.start(&CancellationToken::new()).unwrap();
        let dispatcher = Arc::new(OrderDispatcher::new(Arc::clone(&pool), Arc::clone(&executor)));
        let handler = OrderCreatedHandler::new(Arc::clone(&repo), dispatcher);
        (repo, executor, pool, handler)
    }

    #[tokio::test]
    async fn created_pending_order_is_dispatched() {
        let (repo, executor, pool, handler) = created_handler(None).await;
        let mut order = new_order();
        repo.create(&order).await.unwrap();
        let message = created_message(&mut order);

        handler.handle(&ExecutionContext::new(), &message).await.unwrap();

        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn created_for_settled_order_is_a_no_op() {
        let (repo, executor, pool, handler) = created_handler(None).await;
        let mut order = new_order();
        let message = created_message(&mut order);
        order
            .mark_executed(ExecutionFill {
                price: dec!(10),
                total_amount: dec!(10),
                fee: dec!(0),
            })
            .unwrap();
        repo.create(&order).await.unwrap();

        handler.handle(&ExecutionContext::new(), &message).await.unwrap();

        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn created_for_unknown_order_is_not_found() {
        let (_repo, _executor, pool, handler) = created_handler(None).await;
        let mut order = new_order();
        let message = created_message(&mut order);

        let err = handler.handle(&ExecutionContext::new(), &message).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::OrderNotFound);
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn validation_failure_is_acknowledged() {
        let err = ExecutionError::new(ErrorCode::InsufficientBalance, "insufficient balance");
        let (repo, _executor, pool, handler) = created_handler(Some(err)).await;
        let mut order = new_order();
        repo.create(&order).await.unwrap();
        let message = created_message(&mut order);

        assert!(handler.handle(&ExecutionContext::new(), &message).await.is_ok());
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn transient_failure_is_returned() {
        let (repo, _executor, pool, handler) =
            created_handler(Some(ExecutionError::timeout("slow"))).await;
        let mut order = new_order();
        repo.create(&order).await.unwrap();
        let message = created_message(&mut order);

        let err = handler.handle(&ExecutionContext::new(), &message).await.unwrap_err();

        assert!(err.is_retryable());
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn audit_records_once_per_message() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let mut order = new_order();
        order.drain_events();
        order.cancel(Some("user request".to_string())).unwrap();
        repo.create(&order).await.unwrap();
        let message = EventMessage::from_event(&order.drain_events()[0], "test", 0).unwrap();
        let handler = AuditTrailHandler::new(Arc::clone(&repo));

        handler.handle(&ExecutionContext::new(), &message).await.unwrap();
        handler.handle(&ExecutionContext::new(), &message).await.unwrap();

        let entries = handler.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn audit_window_evicts_oldest_entries() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let handler = AuditTrailHandler::with_capacity(Arc::clone(&repo), 2);
        let mut messages = Vec::new();
        for _ in 0..3 {
            let mut order = new_order();
            order.drain_events();
            order.cancel(None).unwrap();
            repo.create(&order).await.unwrap();
            messages.push(EventMessage::from_event(&order.drain_events()[0], "test", 0).unwrap());
        }

        for message in &messages {
            handler.handle(&ExecutionContext::new(), message).await.unwrap();
        }

        let entries = handler.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message_id, messages[1].id);
        assert_eq!(entries[1].message_id, messages[2].id);
        assert_eq!(handler.log.read().seen.len(), 2);
    }

    #[tokio::test]
    async fn audit_rejects_status_mismatch_and_allows_retry() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let mut order = new_order();
        order.drain_events();
        let pending = order.clone();
        order.mark_failed("boom").unwrap();
        let message = EventMessage::from_event(&order.drain_events()[0], "test", 0).unwrap();
        repo.create(&pending).await.unwrap();
        let handler = AuditTrailHandler::new(Arc::clone(&repo));

        let err = handler.handle(&ExecutionContext::new(), &message).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStateTransition);

        repo.update(&order).await.unwrap();
        handler.handle(&ExecutionContext::new(), &message).await.unwrap();
        assert_eq!(handler.entries().len(), 1);
    }
}
