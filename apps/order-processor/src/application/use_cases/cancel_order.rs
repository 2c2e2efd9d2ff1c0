//! Cancel Order Use Case

use std::sync::Arc;

use tracing::{info, warn};

use super::claims::OrderClaims;
use crate::application::ports::EventPublisherPort;
use crate::domain::order::{Order, OrderRepository};
use crate::domain::shared::OrderId;
use crate::error::{ErrorCode, ExecutionError};

/// Cancels pending orders.
pub struct CancelOrderUseCase<R, E>
where
    R: OrderRepository,
    E: EventPublisherPort,
{
    repository: Arc<R>,
    publisher: Arc<E>,
    claims: Arc<OrderClaims>,
}

impl<R, E> CancelOrderUseCase<R, E>
where
    R: OrderRepository,
    E: EventPublisherPort,
{
    /// Create a new `CancelOrderUseCase`.
    ///
    /// `claims` must be the registry of the
    /// [`ExecuteOrderUseCase`](super::ExecuteOrderUseCase) running the same
    /// orders.
    pub const fn new(repository: Arc<R>, publisher: Arc<E>, claims: Arc<OrderClaims>) -> Self {
        Self {
            repository,
            publisher,
            claims,
        }
    }

    /// Move a pending order to `cancelled` and announce it.
    ///
    /// # Errors
    ///
    /// Returns `OrderNotFound` for unknown orders, `OrderNotPending` while
    /// the order is executing and `InvalidStateTransition` for orders that
    /// already reached a terminal state.
    pub async fn cancel(
        &self,
        order_id: &OrderId,
        reason: Option<String>,
    ) -> Result<Order, ExecutionError> {
        let _claim = self.claims.try_claim(order_id).ok_or_else(|| {
            ExecutionError::new(
                ErrorCode::OrderNotPending,
                format!("order {order_id} is executing, not pending"),
            )
            .with_context("order_id", order_id.as_str())
        })?;

        let mut order = self
            .repository
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ExecutionError::order_not_found(order_id.as_str()))?;

        order.cancel(reason)?;
        self.repository.update(&order).await?;
        info!(order_id = %order_id, "Order cancelled");

        let events = order.drain_events();
        if let Err(e) = self.publisher.publish_order_events(events).await {
            warn!(order_id = %order_id, error = %e, "Failed to publish order cancelled event");
        }

        Ok(order)
    }
}
