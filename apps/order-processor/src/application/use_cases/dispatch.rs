//! Order Dispatch
//!
//! Routes an order through the worker pool and waits for its final outcome.
//! When the queue is full the order executes inline on the caller's task.
//!
//! A queued task keeps the caller's deadline but not its cancellation: a
//! caller that stops waiting (consumer shutdown) leaves the task to finish
//! while the pool drains.

use std::sync::Arc;

use tracing::warn;

use crate::application::execution::{ExecutionContext, ExecutionResult, OrderExecutor};
use crate::application::worker_pool::{OrderTask, PoolError, WorkerPool};
use crate::domain::order::Order;
use crate::error::ExecutionError;

/// Pool-first execution with an inline fallback.
pub struct OrderDispatcher<X: OrderExecutor + 'static> {
    pool: Arc<WorkerPool<X>>,
    executor: Arc<X>,
}

impl<X: OrderExecutor + 'static> OrderDispatcher<X> {
    /// Create a dispatcher over `pool`, falling back to `executor`.
    pub const fn new(pool: Arc<WorkerPool<X>>, executor: Arc<X>) -> Self {
        Self { pool, executor }
    }

    /// Submit `order` and wait for its final outcome, retries included.
    ///
    /// # Errors
    ///
    /// Returns the execution error, `NotRunning` if the pool has stopped, or
    /// `Cancelled`/`Timeout` if `ctx` ends first.
    pub async fn dispatch_and_wait(
        &self,
        ctx: &ExecutionContext,
        order: &Order,
    ) -> Result<ExecutionResult, ExecutionError> {
        ctx.check()?;
        let (task, outcome) = OrderTask::with_completion(order.clone(), ctx.detached());

        match self.pool.submit(task) {
            Ok(()) => {}
            Err(PoolError::QueueFull { capacity }) => {
                warn!(order_id = %order.id(), capacity, "Queue full, executing inline");
                return self.executor.execute(ctx, order).await;
            }
            Err(e) => return Err(e.into()),
        }

        ctx.run(async {
            outcome.await.map_err(|_| {
                ExecutionError::internal("worker pool dropped the task without an outcome")
            })?
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerPoolConfig;
    use crate::domain::order::{CreateOrderCommand, OrderSide};
    use crate::domain::shared::{Symbol, UserId};
    use crate::error::ErrorCode;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct CountingExecutor {
        calls: AtomicU32,
        delay: Duration,
    }

    #[async_trait]
    impl OrderExecutor for CountingExecutor {
        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            order: &Order,
        ) -> Result<ExecutionResult, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let mut result = ExecutionResult::new(order.id().clone());
            result.success = true;
            Ok(result)
        }
    }

    fn order() -> Order {
        Order::new(CreateOrderCommand::market(
            UserId::new("alice"),
            Symbol::new("BTC"),
            OrderSide::Buy,
            dec!(1),
        ))
        .unwrap()
    }

    fn config(workers: usize, queue_size: usize) -> WorkerPoolConfig {
        WorkerPoolConfig {
            workers,
            queue_size,
            ..WorkerPoolConfig::default()
        }
    }

    #[tokio::test]
    async fn waits_for_pool_outcome() {
        let executor = Arc::new(CountingExecutor {
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        });
        let pool = Arc::new(WorkerPool::new(Arc::clone(&executor), config(2, 10)));
        pool.start(&CancellationToken::new()).unwrap();
        let dispatcher = OrderDispatcher::new(Arc::clone(&pool), Arc::clone(&executor));

        let result = dispatcher
            .dispatch_and_wait(&ExecutionContext::new(), &order())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn full_queue_executes_inline() {
        let executor = Arc::new(CountingExecutor {
            calls: AtomicU32::new(0),
            delay: Duration::from_millis(200),
        });
        let pool = Arc::new(WorkerPool::new(Arc::clone(&executor), config(1, 1)));
        pool.start(&CancellationToken::new()).unwrap();
        // One running, one queued.
        pool.submit(OrderTask::new(order(), ExecutionContext::new())).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.submit(OrderTask::new(order(), ExecutionContext::new())).unwrap();
        let dispatcher = OrderDispatcher::new(Arc::clone(&pool), Arc::clone(&executor));

        let result = dispatcher
            .dispatch_and_wait(&ExecutionContext::new(), &order())
            .await;

        assert!(result.is_ok());
        pool.stop().await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn caller_cancellation_leaves_task_to_the_pool() {
        let executor = Arc::new(CountingExecutor {
            calls: AtomicU32::new(0),
            delay: Duration::from_millis(100),
        });
        let pool = Arc::new(WorkerPool::new(Arc::clone(&executor), config(1, 10)));
        pool.start(&CancellationToken::new()).unwrap();
        let dispatcher = OrderDispatcher::new(Arc::clone(&pool), Arc::clone(&executor));
        let ctx = ExecutionContext::new();

        let canceller = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                ctx.cancel();
            })
        };
        let err = dispatcher.dispatch_and_wait(&ctx, &order()).await.unwrap_err();
        canceller.await.unwrap();
        assert_eq!(err.code(), ErrorCode::Cancelled);

        pool.stop().await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.metrics().succeeded, 1);
    }

    #[tokio::test]
    async fn stopped_pool_is_not_running() {
        let executor = Arc::new(CountingExecutor {
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        });
        let pool = Arc::new(WorkerPool::new(Arc::clone(&executor), config(1, 1)));
        let dispatcher = OrderDispatcher::new(pool, executor);

        let err = dispatcher
            .dispatch_and_wait(&ExecutionContext::new(), &order())
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::NotRunning);
    }
}
