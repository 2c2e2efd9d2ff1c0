//! Execute Order Use Case
//!
//! Wraps an [`OrderExecutor`] with persistence and event publication:
//!
//! 1. Claim the order id so concurrent duplicates and cancels are refused
//! 2. Re-read the order; anything but `pending` is refused
//! 3. Execute
//! 4. Persist `executed`, or `failed` when no further attempt will follow
//! 5. Publish the lifecycle event (failures are logged only)
//!
//! An execution interrupted by cancellation or a stopping pool leaves the
//! order `pending` for redelivery.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::claims::OrderClaims;
use crate::application::execution::{ExecutionContext, ExecutionResult, OrderExecutor};
use crate::application::ports::EventPublisherPort;
use crate::domain::order::{Order, OrderRepository, OrderStatus};
use crate::domain::shared::OrderId;
use crate::error::{ErrorCode, ExecutionError};

/// Persisting, idempotent order execution.
pub struct ExecuteOrderUseCase<R, X, E>
where
    R: OrderRepository,
    X: OrderExecutor,
    E: EventPublisherPort,
{
    repository: Arc<R>,
    executor: Arc<X>,
    publisher: Arc<E>,
    claims: Arc<OrderClaims>,
}

impl<R, X, E> ExecuteOrderUseCase<R, X, E>
where
    R: OrderRepository,
    X: OrderExecutor,
    E: EventPublisherPort,
{
    /// Create a new `ExecuteOrderUseCase`.
    pub fn new(repository: Arc<R>, executor: Arc<X>, publisher: Arc<E>) -> Self {
        Self {
            repository,
            executor,
            publisher,
            claims: OrderClaims::shared(),
        }
    }

    /// Share `claims` with a [`CancelOrderUseCase`](super::CancelOrderUseCase).
    #[must_use]
    pub fn with_claims(mut self, claims: Arc<OrderClaims>) -> Self {
        self.claims = claims;
        self
    }

    /// The claim registry this use case holds orders in.
    #[must_use]
    pub fn claims(&self) -> Arc<OrderClaims> {
        Arc::clone(&self.claims)
    }

    async fn persist(&self, order: &mut Order) -> Result<(), ExecutionError> {
        self.repository.update(order).await?;

        let events = order.drain_events();
        if let Err(e) = self.publisher.publish_order_events(events).await {
            warn!(order_id = %order.id(), error = %e, "Failed to publish order event");
        }
        Ok(())
    }
}

fn not_pending(order_id: &OrderId, state: impl std::fmt::Display) -> ExecutionError {
    ExecutionError::new(
        ErrorCode::OrderNotPending,
        format!("order {order_id} is {state}, not pending"),
    )
    .with_context("order_id", order_id.as_str())
}

#[async_trait]
impl<R, X, E> OrderExecutor for ExecuteOrderUseCase<R, X, E>
where
    R: OrderRepository,
    X: OrderExecutor,
    E: EventPublisherPort,
{
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        order: &Order,
    ) -> Result<ExecutionResult, ExecutionError> {
        let _claim = self
            .claims
            .try_claim(order.id())
            .ok_or_else(|| not_pending(order.id(), "claimed by another operation"))?;

        let mut current = self
            .repository
            .find_by_id(order.id())
            .await?
            .ok_or_else(|| ExecutionError::order_not_found(order.id().as_str()))?;
        if current.status() != OrderStatus::Pending {
            return Err(not_pending(current.id(), current.status()));
        }

        match self.executor.execute(ctx, &current).await {
            Ok(result) => {
                let fill = result
                    .fill()
                    .ok_or_else(|| ExecutionError::internal("execution result has no fill"))?;
                current.mark_executed(fill)?;
                self.persist(&mut current).await?;
                Ok(result)
            }
            Err(err) if err.is_retryable() && !ctx.is_final_attempt() => {
                debug!(
                    order_id = %current.id(),
                    attempt = ctx.attempt(),
                    error = %err,
                    "Retryable failure, order left pending"
                );
                Err(err)
            }
            Err(err) if matches!(err.code(), ErrorCode::Cancelled | ErrorCode::NotRunning) => {
                debug!(
                    order_id = %current.id(),
                    error = %err,
                    "Execution interrupted, order left pending"
                );
                Err(err)
            }
            Err(err) => {
                current.mark_failed(err.to_string())?;
                self.persist(&mut current).await?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::NoOpEventPublisher;
    use crate::application::use_cases::CancelOrderUseCase;
    use crate::domain::order::{CreateOrderCommand, OrderSide};
    use crate::domain::shared::{Symbol, UserId};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::application::execution::{FeeOutcome, PriceOutcome};
    use crate::infrastructure::persistence::InMemoryOrderRepository;

    /// Executor returning scripted outcomes.
    struct ScriptedExecutor {
        error: Option<ExecutionError>,
        delay: Duration,
        calls: AtomicU32,
    }

    impl ScriptedExecutor {
        fn succeeding() -> Self {
            Self {
                error: None,
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            }
        }

        fn failing(error: ExecutionError) -> Self {
            Self {
                error: Some(error),
                ..Self::succeeding()
            }
        }
    }

    #[async_trait]
    impl OrderExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            order: &Order,
        ) -> Result<ExecutionResult, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if let Some(err) = &self.error {
                return Err(err.clone());
            }
            let mut result = ExecutionResult::new(order.id().clone());
            result.price = Some(PriceOutcome {
                market_price: dec!(100),
                slippage: dec!(0),
                execution_price: dec!(100),
                source: "test".to_string(),
            });
            result.total_amount = Some(dec!(100));
            result.fee = Some(FeeOutcome {
                rate: dec!(0.001),
                amount: dec!(0.1),
                minimum_applied: false,
            });
            result.success = true;
            Ok(result)
        }
    }

    async fn seeded() -> (Arc<InMemoryOrderRepository>, Order) {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let order = Order::new(CreateOrderCommand::market(
            UserId::new("alice"),
            Symbol::new("BTC"),
            OrderSide::Buy,
            dec!(1),
        ))
        .unwrap();
        repo.create(&order).await.unwrap();
        (repo, order)
    }

    fn use_case(
        repo: &Arc<InMemoryOrderRepository>,
        executor: ScriptedExecutor,
    ) -> ExecuteOrderUseCase<InMemoryOrderRepository, ScriptedExecutor, NoOpEventPublisher> {
        ExecuteOrderUseCase::new(
            Arc::clone(repo),
            Arc::new(executor),
            Arc::new(NoOpEventPublisher),
        )
    }

    #[tokio::test]
    async fn success_persists_executed() {
        let (repo, order) = seeded().await;
        let use_case = use_case(&repo, ScriptedExecutor::succeeding());

        use_case.execute(&ExecutionContext::new(), &order).await.unwrap();

        let stored = repo.find_by_id(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Executed);
        assert_eq!(stored.total_amount(), Some(dec!(100)));
        assert_eq!(stored.fee(), Some(dec!(0.1)));
    }

    #[tokio::test]
    async fn validation_failure_persists_failed_with_message() {
        let (repo, order) = seeded().await;
        let err = ExecutionError::new(ErrorCode::InsufficientBalance, "insufficient balance");
        let use_case = use_case(&repo, ScriptedExecutor::failing(err));

        let result = use_case.execute(&ExecutionContext::new(), &order).await;

        assert!(result.is_err());
        let stored = repo.find_by_id(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Failed);
        assert_eq!(stored.error_message(), Some("insufficient balance"));
    }

    #[tokio::test]
    async fn retryable_failure_before_final_attempt_leaves_pending() {
        let (repo, order) = seeded().await;
        let use_case = use_case(&repo, ScriptedExecutor::failing(ExecutionError::timeout("slow")));
        let ctx = ExecutionContext::new().with_attempt(1, false);

        let err = use_case.execute(&ctx, &order).await.unwrap_err();

        assert!(err.is_retryable());
        let stored = repo.find_by_id(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Pending);
    }

    #[tokio::test]
    async fn retryable_failure_on_final_attempt_persists_failed() {
        let (repo, order) = seeded().await;
        let use_case = use_case(&repo, ScriptedExecutor::failing(ExecutionError::timeout("slow")));

        let _ = use_case.execute(&ExecutionContext::new(), &order).await;

        let stored = repo.find_by_id(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Failed);
    }

    #[tokio::test]
    async fn terminal_order_is_not_executed_again() {
        let (repo, order) = seeded().await;
        let use_case = use_case(&repo, ScriptedExecutor::succeeding());
        use_case.execute(&ExecutionContext::new(), &order).await.unwrap();

        let err = use_case.execute(&ExecutionContext::new(), &order).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::OrderNotPending);
        assert_eq!(use_case.executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn interrupted_execution_leaves_pending() {
        let (repo, order) = seeded().await;
        for err in [
            ExecutionError::cancelled("execution context cancelled"),
            ExecutionError::new(ErrorCode::NotRunning, "worker pool stopped"),
        ] {
            let use_case = use_case(&repo, ScriptedExecutor::failing(err.clone()));

            let returned = use_case.execute(&ExecutionContext::new(), &order).await.unwrap_err();

            assert_eq!(returned.code(), err.code());
            let stored = repo.find_by_id(order.id()).await.unwrap().unwrap();
            assert_eq!(stored.status(), OrderStatus::Pending);
            assert_eq!(stored.error_message(), None);
        }
    }

    #[tokio::test]
    async fn cancel_during_execution_is_refused() {
        let (repo, order) = seeded().await;
        let executor = ScriptedExecutor {
            delay: Duration::from_millis(200),
            ..ScriptedExecutor::succeeding()
        };
        let use_case = Arc::new(use_case(&repo, executor));
        let cancel = CancelOrderUseCase::new(
            Arc::clone(&repo),
            Arc::new(NoOpEventPublisher),
            use_case.claims(),
        );

        let running = {
            let use_case = Arc::clone(&use_case);
            let order = order.clone();
            tokio::spawn(async move { use_case.execute(&ExecutionContext::new(), &order).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let refused = cancel.cancel(order.id(), None).await.unwrap_err();

        assert_eq!(refused.code(), ErrorCode::OrderNotPending);
        assert!(running.await.unwrap().is_ok());
        let stored = repo.find_by_id(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Executed);
    }

    #[tokio::test]
    async fn concurrent_duplicate_is_refused() {
        let (repo, order) = seeded().await;
        let executor = ScriptedExecutor {
            delay: Duration::from_millis(100),
            ..ScriptedExecutor::succeeding()
        };
        let use_case = use_case(&repo, executor);
        let ctx = ExecutionContext::new();

        let (first, second) = tokio::join!(
            use_case.execute(&ctx, &order),
            use_case.execute(&ctx, &order)
        );

        assert_eq!(
            [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(),
            1
        );
        assert_eq!(use_case.executor.calls.load(Ordering::SeqCst), 1);
    }
}
