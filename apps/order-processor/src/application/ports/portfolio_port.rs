//! Portfolio Port (Driven Port)
//!
//! Holdings updates are best-effort; failures never fail an order.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ServiceError;
use crate::domain::order::OrderSide;
use crate::domain::shared::{Symbol, UserId};

/// A holdings change after an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingsUpdate {
    /// Account owner.
    pub user_id: UserId,
    /// Asset.
    pub symbol: Symbol,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Execution price.
    pub price: Decimal,
    /// Buy adds to holdings, sell removes.
    pub side: OrderSide,
}

/// Port for the holdings service.
#[async_trait]
pub trait PortfolioPort: Send + Sync {
    /// Apply a holdings update.
    async fn update_holdings(&self, update: HoldingsUpdate) -> Result<(), ServiceError>;
}
