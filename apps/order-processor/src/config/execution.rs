//! Execution engine configuration: fees, slippage and timeouts.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::domain::pricing::FeeSchedule;

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Fee rate for limit orders.
    #[serde(default = "default_fee_rate")]
    pub maker_fee_rate: Decimal,
    /// Fee rate for market orders.
    #[serde(default = "default_fee_rate")]
    pub taker_fee_rate: Decimal,
    /// Minimum fee per order.
    #[serde(default = "default_minimum_fee")]
    pub minimum_fee: Decimal,
    /// Slippage fraction applied to quoted prices.
    #[serde(default = "default_slippage")]
    pub slippage: Decimal,
    /// Upper bound for slippage.
    #[serde(default = "default_max_slippage")]
    pub max_slippage: Decimal,
    /// Deadline for each concurrent sub-task (milliseconds).
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    /// Deadline for a synchronous execution (milliseconds).
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
    /// Deadline for the best-effort holdings update (milliseconds).
    #[serde(default = "default_portfolio_timeout_ms")]
    pub portfolio_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            maker_fee_rate: default_fee_rate(),
            taker_fee_rate: default_fee_rate(),
            minimum_fee: default_minimum_fee(),
            slippage: default_slippage(),
            max_slippage: default_max_slippage(),
            step_timeout_ms: default_step_timeout_ms(),
            execution_timeout_ms: default_execution_timeout_ms(),
            portfolio_timeout_ms: default_portfolio_timeout_ms(),
        }
    }
}

impl ExecutionConfig {
    /// Fee schedule derived from the configured rates.
    #[must_use]
    pub const fn fee_schedule(&self) -> FeeSchedule {
        FeeSchedule {
            maker_rate: self.maker_fee_rate,
            taker_rate: self.taker_fee_rate,
            minimum_fee: self.minimum_fee,
        }
    }

    /// Per sub-task deadline.
    #[must_use]
    pub const fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    /// Whole-execution deadline.
    #[must_use]
    pub const fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    /// Holdings update deadline.
    #[must_use]
    pub const fn portfolio_timeout(&self) -> Duration {
        Duration::from_millis(self.portfolio_timeout_ms)
    }
}

fn default_fee_rate() -> Decimal {
    dec!(0.001)
}

fn default_minimum_fee() -> Decimal {
    dec!(0.01)
}

fn default_slippage() -> Decimal {
    dec!(0.0005)
}

fn default_max_slippage() -> Decimal {
    dec!(0.01)
}

const fn default_step_timeout_ms() -> u64 {
    5_000
}

const fn default_execution_timeout_ms() -> u64 {
    30_000
}

const fn default_portfolio_timeout_ms() -> u64 {
    5_000
}
