//! Price Feed Port (Driven Port)

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ServiceError;
use crate::domain::shared::{Symbol, Timestamp};

/// Current market price with metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Quoted symbol.
    pub symbol: Symbol,
    /// Last price.
    pub price: Decimal,
    /// Where the price came from.
    pub source: String,
    /// When the price was observed.
    pub as_of: Timestamp,
}

/// Port for the pricing service.
#[async_trait]
pub trait PriceFeedPort: Send + Sync {
    /// Get the current price for a symbol.
    async fn current_price(&self, symbol: &Symbol) -> Result<PriceQuote, ServiceError>;
}
