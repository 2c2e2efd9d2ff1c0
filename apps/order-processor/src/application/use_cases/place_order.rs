//! Place Order Use Case

use std::sync::Arc;

use tracing::{info, warn};

use crate::application::ports::EventPublisherPort;
use crate::domain::order::{CreateOrderCommand, Order, OrderRepository};
use crate::error::ExecutionError;

/// Creates pending orders and announces them with `order.created`.
pub struct PlaceOrderUseCase<R, E>
where
    R: OrderRepository,
    E: EventPublisherPort,
{
    repository: Arc<R>,
    publisher: Arc<E>,
}

impl<R, E> PlaceOrderUseCase<R, E>
where
    R: OrderRepository,
    E: EventPublisherPort,
{
    /// Create a new `PlaceOrderUseCase`.
    pub const fn new(repository: Arc<R>, publisher: Arc<E>) -> Self {
        Self {
            repository,
            publisher,
        }
    }

    /// Validate, persist and announce a new order.
    ///
    /// A publish failure is logged; the order stays persisted.
    ///
    /// # Errors
    ///
    /// Returns error if the command is invalid or persistence fails.
    pub async fn place(&self, cmd: CreateOrderCommand) -> Result<Order, ExecutionError> {
        let mut order = Order::new(cmd)?;
        self.repository.create(&order).await?;

        info!(
            order_id = %order.id(),
            user_id = %order.user_id(),
            symbol = %order.symbol(),
            side = %order.side(),
            kind = %order.kind(),
            quantity = %order.quantity(),
            "Order placed"
        );

        let events = order.drain_events();
        if let Err(e) = self.publisher.publish_order_events(events).await {
            warn!(order_id = %order.id(), error = %e, "Failed to publish order created event");
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::NoOpEventPublisher;
    use crate::domain::order::{OrderSide, OrderStatus};
    use crate::domain::shared::{Symbol, UserId};
    use crate::error::ErrorCode;
    use crate::infrastructure::persistence::InMemoryOrderRepository;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn place_persists_pending_order() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let use_case = PlaceOrderUseCase::new(Arc::clone(&repo), Arc::new(NoOpEventPublisher));

        let order = use_case
            .place(CreateOrderCommand::market(
                UserId::new("alice"),
                Symbol::new("BTC"),
                OrderSide::Buy,
                dec!(0.1),
            ))
            .await
            .unwrap();

        let stored = repo.find_by_id(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Pending);
    }

    #[tokio::test]
    async fn invalid_command_is_rejected() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let use_case = PlaceOrderUseCase::new(Arc::clone(&repo), Arc::new(NoOpEventPublisher));

        let err = use_case
            .place(CreateOrderCommand::market(
                UserId::new("alice"),
                Symbol::new("BTC"),
                OrderSide::Buy,
                dec!(0),
            ))
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::InvalidRequest);
        assert!(repo.is_empty());
    }
}
