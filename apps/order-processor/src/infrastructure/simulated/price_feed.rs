//! Simulated price feed.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use super::Faults;
use crate::application::ports::{PriceFeedPort, PriceQuote, ServiceError};
use crate::config::SimulationConfig;
use crate::domain::shared::{Symbol, Timestamp};

const SOURCE: &str = "simulated";

/// Static prices per symbol, adjustable at runtime.
#[derive(Debug, Default)]
pub struct SimulatedPriceFeed {
    prices: RwLock<HashMap<Symbol, Decimal>>,
    faults: Faults,
}

impl SimulatedPriceFeed {
    /// A feed with no prices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from configuration.
    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        let feed = Self::new();
        for (symbol, price) in &config.prices {
            feed.set_price(Symbol::new(symbol.as_str()), *price);
        }
        feed
    }

    /// Add a price.
    #[must_use]
    pub fn with_price(self, symbol: &str, price: Decimal) -> Self {
        self.set_price(Symbol::new(symbol), price);
        self
    }

    /// Set or replace a price.
    pub fn set_price(&self, symbol: Symbol, price: Decimal) {
        self.prices.write().insert(symbol, price);
    }

    /// Delay every call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults.set_latency(latency);
    }

    /// Fail the next call with `error`.
    pub fn fail_next(&self, error: ServiceError) {
        self.faults.push_failure(error);
    }

    /// Number of price lookups.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.faults.calls()
    }
}

#[async_trait]
impl PriceFeedPort for SimulatedPriceFeed {
    async fn current_price(&self, symbol: &Symbol) -> Result<PriceQuote, ServiceError> {
        self.faults.before_call().await?;

        let price = self
            .prices
            .read()
            .get(symbol)
            .copied()
            .ok_or_else(|| ServiceError::NotFound {
                message: format!("no market price for {symbol}"),
            })?;

        Ok(PriceQuote {
            symbol: symbol.clone(),
            price,
            source: SOURCE.to_string(),
            as_of: Timestamp::now(),
        })
    }
}
