//! Pricing and fee arithmetic.
//!
//! Pure functions, no I/O:
//!
//! - slippage moves the quoted price against the requester (buy up, sell down),
//!   clamped to `[0, max_slippage]`
//! - `fee = max(minimum_fee, amount × rate)`, never negative
//! - a buy needs `total + fee` available; a sell is credited `total - fee`
//!
//! Products and sums are checked: an order too large for a `Decimal` is an
//! [`PricingError::Overflow`], never a panic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::order::{OrderKind, OrderSide};

/// Decimal places kept for fees and amounts.
pub const AMOUNT_SCALE: u32 = 8;

/// Maker/taker fee rates with a floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Rate for limit orders.
    pub maker_rate: Decimal,
    /// Rate for market orders.
    pub taker_rate: Decimal,
    /// Minimum fee charged per order.
    pub minimum_fee: Decimal,
}

impl FeeSchedule {
    /// Single rate for both makers and takers.
    #[must_use]
    pub const fn flat(rate: Decimal, minimum_fee: Decimal) -> Self {
        Self {
            maker_rate: rate,
            taker_rate: rate,
            minimum_fee,
        }
    }

    /// Fee rate for an order kind.
    #[must_use]
    pub const fn rate_for(&self, kind: OrderKind) -> Decimal {
        match kind {
            OrderKind::Limit => self.maker_rate,
            OrderKind::Market => self.taker_rate,
        }
    }

    /// Fee for an order of `kind` worth `amount`.
    ///
    /// # Errors
    ///
    /// Returns `Overflow` if `amount × rate` is not representable.
    pub fn fee_for(&self, kind: OrderKind, amount: Decimal) -> Result<Decimal, PricingError> {
        compute_fee(amount, self.rate_for(kind), self.minimum_fee)
    }
}

/// Pricing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    /// The quoted price is zero or negative.
    #[error("invalid market price {price}")]
    InvalidPrice {
        /// Offending price.
        price: Decimal,
    },

    /// A limit order cannot execute at the current market price.
    #[error("limit price not marketable: {side} limit {limit} vs market {market}")]
    LimitNotMarketable {
        /// Order side.
        side: OrderSide,
        /// Limit price.
        limit: Decimal,
        /// Slippage-adjusted market price.
        market: Decimal,
    },

    /// An amount exceeded the representable range.
    #[error("amount out of range computing {operation}")]
    Overflow {
        /// Which quantity was being computed.
        operation: &'static str,
    },
}

fn overflow(operation: &'static str) -> PricingError {
    PricingError::Overflow { operation }
}

/// Clamp a slippage fraction into `[0, max_slippage]`.
#[must_use]
pub fn clamp_slippage(slippage: Decimal, max_slippage: Decimal) -> Decimal {
    slippage.max(Decimal::ZERO).min(max_slippage.max(Decimal::ZERO))
}

/// Apply side-dependent slippage to a quoted price.
///
/// # Errors
///
/// Returns `Overflow` for a price too large to inflate.
pub fn apply_slippage(
    price: Decimal,
    side: OrderSide,
    slippage: Decimal,
    max_slippage: Decimal,
) -> Result<Decimal, PricingError> {
    let slippage = clamp_slippage(slippage, max_slippage);
    let factor = match side {
        OrderSide::Buy => Decimal::ONE + slippage,
        OrderSide::Sell => Decimal::ONE - slippage,
    };
    price.checked_mul(factor).ok_or_else(|| overflow("slippage"))
}

/// Resolve the price an order executes at.
///
/// Market orders take the slippage-adjusted price. Limit orders execute at
/// their limit when the adjusted market price is at least as good.
///
/// # Errors
///
/// Returns error if the market price is not positive or a limit order is not
/// marketable.
pub fn resolve_execution_price(
    kind: OrderKind,
    side: OrderSide,
    limit_price: Option<Decimal>,
    adjusted_market: Decimal,
) -> Result<Decimal, PricingError> {
    if adjusted_market <= Decimal::ZERO {
        return Err(PricingError::InvalidPrice {
            price: adjusted_market,
        });
    }

    let limit = match (kind, limit_price) {
        (OrderKind::Limit, Some(limit)) => limit,
        _ => return Ok(adjusted_market),
    };

    let marketable = match side {
        OrderSide::Buy => adjusted_market <= limit,
        OrderSide::Sell => adjusted_market >= limit,
    };

    if marketable {
        Ok(limit)
    } else {
        Err(PricingError::LimitNotMarketable {
            side,
            limit,
            market: adjusted_market,
        })
    }
}

/// `amount × rate` before the floor is applied.
///
/// # Errors
///
/// Returns `Overflow` if the product is not representable.
pub fn rated_fee(amount: Decimal, rate: Decimal) -> Result<Decimal, PricingError> {
    amount
        .checked_mul(rate)
        .map(|fee| fee.round_dp(AMOUNT_SCALE))
        .ok_or_else(|| overflow("fee"))
}

/// `max(minimum_fee, amount × rate)`, never negative.
///
/// # Errors
///
/// Returns `Overflow` if `amount × rate` is not representable.
pub fn compute_fee(
    amount: Decimal,
    rate: Decimal,
    minimum_fee: Decimal,
) -> Result<Decimal, PricingError> {
    Ok(rated_fee(amount, rate)?.max(minimum_fee).max(Decimal::ZERO))
}

/// `quantity × price`.
///
/// # Errors
///
/// Returns `Overflow` if the product is not representable.
pub fn total_amount(quantity: Decimal, price: Decimal) -> Result<Decimal, PricingError> {
    quantity
        .checked_mul(price)
        .map(|total| total.round_dp(AMOUNT_SCALE))
        .ok_or_else(|| overflow("total amount"))
}

/// Funds a buy must have available: `total + fee`.
///
/// # Errors
///
/// Returns `Overflow` if the sum is not representable.
pub fn required_funds(total: Decimal, fee: Decimal) -> Result<Decimal, PricingError> {
    total.checked_add(fee).ok_or_else(|| overflow("required funds"))
}

/// Balance change applied on settlement: buys pay `total + fee`, sells
/// receive `total - fee`.
///
/// # Errors
///
/// Returns `Overflow` if a buy's `total + fee` is not representable.
pub fn settlement_amount(
    side: OrderSide,
    total: Decimal,
    fee: Decimal,
) -> Result<Decimal, PricingError> {
    match side {
        OrderSide::Buy => required_funds(total, fee),
        OrderSide::Sell => Ok((total - fee).max(Decimal::ZERO)),
    }
}
