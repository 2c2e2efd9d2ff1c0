//! Tasks submitted to the worker pool.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::application::execution::{ExecutionContext, ExecutionResult};
use crate::domain::order::{Order, OrderKind, OrderSide};
use crate::domain::shared::{OrderId, Timestamp};
use crate::error::ExecutionError;

/// Priority every task starts with.
pub const BASE_PRIORITY: u32 = 100;
/// Bonus for sells, which release funds.
pub const SELL_BONUS: u32 = 20;
/// Bonus for market orders, which expect immediate execution.
pub const MARKET_BONUS: u32 = 10;
/// Cap on the age bonus.
pub const MAX_AGE_BONUS: u32 = 50;

/// Final outcome delivered to a task's completion channel.
pub type TaskOutcome = Result<ExecutionResult, ExecutionError>;

/// Priority score for an order; higher runs first.
///
/// Orders older than `age_threshold` gain one point per second beyond it,
/// up to [`MAX_AGE_BONUS`].
#[must_use]
pub fn priority_score(order: &Order, age_threshold: Duration) -> u32 {
    let mut score = BASE_PRIORITY;
    if order.side() == OrderSide::Sell {
        score += SELL_BONUS;
    }
    if order.kind() == OrderKind::Market {
        score += MARKET_BONUS;
    }

    let overdue = order.created_at().elapsed().saturating_sub(age_threshold);
    let age_bonus = u32::try_from(overdue.as_secs()).unwrap_or(u32::MAX);
    score + age_bonus.min(MAX_AGE_BONUS)
}

/// An order waiting for or undergoing execution in the pool.
#[derive(Debug)]
pub struct OrderTask {
    /// The order.
    pub order: Order,
    /// Caller scope; cancelling it abandons the task.
    pub context: ExecutionContext,
    /// Score assigned at (re)enqueue.
    pub priority: u32,
    /// Attempts already failed and retried.
    pub retry_count: u32,
    /// Retry bound, the pool default when unset.
    pub max_retries: Option<u32>,
    /// When the task was first submitted.
    pub enqueued_at: Timestamp,
    completion: Option<oneshot::Sender<TaskOutcome>>,
}

impl OrderTask {
    /// A task without a completion channel.
    #[must_use]
    pub fn new(order: Order, context: ExecutionContext) -> Self {
        Self {
            order,
            context,
            priority: BASE_PRIORITY,
            retry_count: 0,
            max_retries: None,
            enqueued_at: Timestamp::now(),
            completion: None,
        }
    }

    /// A task that reports its final outcome on the returned receiver.
    #[must_use]
    pub fn with_completion(
        order: Order,
        context: ExecutionContext,
    ) -> (Self, oneshot::Receiver<TaskOutcome>) {
        let (tx, rx) = oneshot::channel();
        let mut task = Self::new(order, context);
        task.completion = Some(tx);
        (task, rx)
    }

    /// Override the pool's retry bound.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Order id.
    #[must_use]
    pub const fn order_id(&self) -> &OrderId {
        self.order.id()
    }

    /// Deliver the final outcome. Later calls are ignored.
    pub fn complete(&mut self, outcome: TaskOutcome) {
        if let Some(tx) = self.completion.take() {
            // The submitter may have stopped waiting.
            let _ = tx.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::CreateOrderCommand;
    use crate::domain::shared::{Symbol, UserId};
    use rust_decimal_macros::dec;

    fn market(side: OrderSide) -> Order {
        Order::new(CreateOrderCommand::market(
            UserId::new("u"),
            Symbol::new("BTC"),
            side,
            dec!(1),
        ))
        .unwrap()
    }

    #[test]
    fn sells_and_market_orders_score_higher() {
        let threshold = Duration::from_secs(30);
        let limit_buy = Order::new(CreateOrderCommand::limit(
            UserId::new("u"),
            Symbol::new("BTC"),
            OrderSide::Buy,
            dec!(1),
            dec!(100),
        ))
        .unwrap();

        assert_eq!(priority_score(&limit_buy, threshold), BASE_PRIORITY);
        assert_eq!(
            priority_score(&market(OrderSide::Buy), threshold),
            BASE_PRIORITY + MARKET_BONUS
        );
        assert_eq!(
            priority_score(&market(OrderSide::Sell), threshold),
            BASE_PRIORITY + MARKET_BONUS + SELL_BONUS
        );
    }

    #[test]
    fn age_bonus_is_capped() {
        let order = market(OrderSide::Buy);
        std::thread::sleep(Duration::from_millis(1100));

        let score = priority_score(&order, Duration::ZERO);
        assert!(score > BASE_PRIORITY + MARKET_BONUS);
        assert!(score <= BASE_PRIORITY + MARKET_BONUS + MAX_AGE_BONUS);
    }

    #[tokio::test]
    async fn completion_is_delivered_once() {
        let (mut task, rx) =
            OrderTask::with_completion(market(OrderSide::Buy), ExecutionContext::new());

        task.complete(Err(ExecutionError::internal("first")));
        task.complete(Err(ExecutionError::internal("second")));

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap_err().message(), "first");
    }
}
