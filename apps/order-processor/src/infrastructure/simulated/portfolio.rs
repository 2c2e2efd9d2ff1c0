//! Simulated holdings service.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use super::Faults;
use crate::application::ports::{HoldingsUpdate, PortfolioPort, ServiceError};
use crate::domain::order::OrderSide;
use crate::domain::shared::{Symbol, UserId};

/// Net quantity held per owner and symbol.
#[derive(Debug, Default)]
pub struct SimulatedPortfolio {
    holdings: RwLock<HashMap<(UserId, Symbol), Decimal>>,
    faults: Faults,
}

impl SimulatedPortfolio {
    /// An empty portfolio.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Quantity of `symbol` held by `user_id`.
    #[must_use]
    pub fn holdings(&self, user_id: &UserId, symbol: &Symbol) -> Decimal {
        self.holdings
            .read()
            .get(&(user_id.clone(), symbol.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// Delay every call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults.set_latency(latency);
    }

    /// Fail the next call with `error`.
    pub fn fail_next(&self, error: ServiceError) {
        self.faults.push_failure(error);
    }

    /// Number of update calls.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.faults.calls()
    }
}

#[async_trait]
impl PortfolioPort for SimulatedPortfolio {
    async fn update_holdings(&self, update: HoldingsUpdate) -> Result<(), ServiceError> {
        self.faults.before_call().await?;

        let delta = match update.side {
            OrderSide::Buy => update.quantity,
            OrderSide::Sell => -update.quantity,
        };
        *self
            .holdings
            .write()
            .entry((update.user_id, update.symbol))
            .or_default() += delta;
        Ok(())
    }
}
