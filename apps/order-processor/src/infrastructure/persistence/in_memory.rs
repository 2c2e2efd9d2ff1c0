//! In-memory order repository.
//!
//! Stores snapshots without pending events. Refuses to move an order that is
//! already terminal into a different status, so a late writer cannot undo a
//! recorded outcome.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::order::{
    Order, OrderError, OrderPage, OrderQuery, OrderRepository, OrderSummary,
};
use crate::domain::shared::{OrderId, UserId};

/// In-memory implementation of `OrderRepository`.
#[derive(Debug, Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl InMemoryOrderRepository {
    /// Create a new empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    /// Whether the repository is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }
}

fn snapshot(order: &Order) -> Order {
    let mut stored = order.clone();
    stored.drain_events();
    stored
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: &Order) -> Result<(), OrderError> {
        let mut orders = self.orders.write();
        if orders.contains_key(order.id()) {
            return Err(OrderError::DuplicateOrderId {
                order_id: order.id().to_string(),
            });
        }
        orders.insert(order.id().clone(), snapshot(order));
        Ok(())
    }

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, OrderError> {
        Ok(self.orders.read().get(id).cloned())
    }

    async fn update(&self, order: &Order) -> Result<(), OrderError> {
        let mut orders = self.orders.write();
        let stored = orders
            .get_mut(order.id())
            .ok_or_else(|| OrderError::NotFound {
                order_id: order.id().to_string(),
            })?;

        if stored.status().is_terminal() && stored.status() != order.status() {
            return Err(OrderError::InvalidStateTransition {
                from: stored.status(),
                to: order.status(),
            });
        }

        *stored = snapshot(order);
        Ok(())
    }

    async fn list_by_owner(
        &self,
        owner: &UserId,
        query: &OrderQuery,
    ) -> Result<OrderPage, OrderError> {
        let mut matching: Vec<Order> = self
            .orders
            .read()
            .values()
            .filter(|o| o.user_id() == owner && query.matches(o))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });

        let total = matching.len();
        let orders = matching
            .into_iter()
            .skip(query.offset())
            .take(query.limit())
            .collect();

        Ok(OrderPage {
            orders,
            total,
            page: query.page.max(1),
            page_size: query.limit(),
        })
    }

    async fn summary(&self, owner: &UserId) -> Result<OrderSummary, OrderError> {
        let mut summary = OrderSummary::default();
        for order in self.orders.read().values().filter(|o| o.user_id() == owner) {
            summary.record(order);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{CreateOrderCommand, ExecutionFill, OrderSide, OrderStatus};
    use crate::domain::shared::Symbol;
    use rust_decimal_macros::dec;

    fn order(user: &str, symbol: &str) -> Order {
        Order::new(CreateOrderCommand::market(
            UserId::new(user),
            Symbol::new(symbol),
            OrderSide::Buy,
            dec!(1),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let repo = InMemoryOrderRepository::new();
        let order = order("alice", "BTC");

        repo.create(&order).await.unwrap();
        let err = repo.create(&order).await.unwrap_err();

        assert!(matches!(err, OrderError::DuplicateOrderId { .. }));
    }

    #[tokio::test]
    async fn stored_orders_carry_no_pending_events() {
        let repo = InMemoryOrderRepository::new();
        let order = order("alice", "BTC");
        repo.create(&order).await.unwrap();

        let stored = repo.find_by_id(order.id()).await.unwrap().unwrap();
        assert!(stored.pending_events().is_empty());
    }

    #[tokio::test]
    async fn terminal_order_cannot_change_status() {
        let repo = InMemoryOrderRepository::new();
        let pending = order("alice", "BTC");
        repo.create(&pending).await.unwrap();

        let mut executed = pending.clone();
        executed
            .mark_executed(ExecutionFill {
                price: dec!(100),
                total_amount: dec!(100),
                fee: dec!(0.1),
            })
            .unwrap();
        repo.update(&executed).await.unwrap();

        let mut failed = pending;
        failed.mark_failed("late failure").unwrap();
        let err = repo.update(&failed).await.unwrap_err();

        assert!(matches!(err, OrderError::InvalidStateTransition { .. }));
        let stored = repo.find_by_id(executed.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Executed);
    }

    #[tokio::test]
    async fn update_of_unknown_order_fails() {
        let repo = InMemoryOrderRepository::new();
        let err = repo.update(&order("alice", "BTC")).await.unwrap_err();
        assert!(matches!(err, OrderError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_filters_and_paginates() {
        let repo = InMemoryOrderRepository::new();
        for _ in 0..3 {
            repo.create(&order("alice", "BTC")).await.unwrap();
        }
        repo.create(&order("alice", "ETH")).await.unwrap();
        repo.create(&order("bob", "BTC")).await.unwrap();

        let query = OrderQuery {
            symbol: Some(Symbol::new("BTC")),
            page: 2,
            page_size: 2,
            ..OrderQuery::default()
        };
        let page = repo.list_by_owner(&UserId::new("alice"), &query).await.unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.orders.len(), 1);
        assert_eq!(page.total_pages(), 2);
    }

    #[tokio::test]
    async fn summary_counts_by_status() {
        let repo = InMemoryOrderRepository::new();
        let mut executed = order("alice", "BTC");
        repo.create(&executed).await.unwrap();
        executed
            .mark_executed(ExecutionFill {
                price: dec!(100),
                total_amount: dec!(100),
                fee: dec!(0.1),
            })
            .unwrap();
        repo.update(&executed).await.unwrap();
        repo.create(&order("alice", "ETH")).await.unwrap();

        let summary = repo.summary(&UserId::new("alice")).await.unwrap();

        assert_eq!(summary.total_orders, 2);
        assert_eq!(summary.executed, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.executed_volume, dec!(100));
        assert_eq!(summary.total_fees, dec!(0.1));
    }
}
