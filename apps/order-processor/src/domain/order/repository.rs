//! Order Repository Trait
//!
//! Persistence abstraction for orders, implemented by infrastructure adapters.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::aggregate::Order;
use super::errors::OrderError;
use super::value_objects::OrderStatus;
use crate::domain::shared::{OrderId, Symbol, UserId};

/// Default page size for owner listings.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Maximum page size for owner listings.
pub const MAX_PAGE_SIZE: usize = 100;

/// Filter and pagination for listing an owner's orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderQuery {
    /// Only orders in this status.
    pub status: Option<OrderStatus>,
    /// Only orders for this symbol.
    pub symbol: Option<Symbol>,
    /// 1-based page number.
    pub page: usize,
    /// Orders per page, clamped to [`MAX_PAGE_SIZE`].
    pub page_size: usize,
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self {
            status: None,
            symbol: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl OrderQuery {
    /// Effective page size.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Number of orders to skip.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.page.max(1).saturating_sub(1).saturating_mul(self.limit())
    }

    /// Whether an order passes the filter.
    #[must_use]
    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|s| order.status() == s)
            && self.symbol.as_ref().is_none_or(|s| order.symbol() == s)
    }
}

/// One page of orders, newest first.
#[derive(Debug, Clone)]
pub struct OrderPage {
    /// Orders on this page.
    pub orders: Vec<Order>,
    /// Total orders matching the filter.
    pub total: usize,
    /// 1-based page number.
    pub page: usize,
    /// Orders per page.
    pub page_size: usize,
}

impl OrderPage {
    /// Number of pages for the filter.
    #[must_use]
    pub const fn total_pages(&self) -> usize {
        if self.page_size == 0 {
            0
        } else {
            self.total.div_ceil(self.page_size)
        }
    }
}

/// Aggregate view of an owner's orders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    /// All orders.
    pub total_orders: usize,
    /// Orders still pending.
    pub pending: usize,
    /// Executed orders.
    pub executed: usize,
    /// Failed orders.
    pub failed: usize,
    /// Cancelled orders.
    pub cancelled: usize,
    /// Sum of `total_amount` over executed orders.
    pub executed_volume: Decimal,
    /// Sum of fees over executed orders.
    pub total_fees: Decimal,
}

impl OrderSummary {
    /// Fold one order into the summary.
    pub fn record(&mut self, order: &Order) {
        self.total_orders += 1;
        match order.status() {
            OrderStatus::Pending => self.pending += 1,
            OrderStatus::Executed => {
                self.executed += 1;
                self.executed_volume = self
                    .executed_volume
                    .saturating_add(order.total_amount().unwrap_or_default());
                self.total_fees = self.total_fees.saturating_add(order.fee().unwrap_or_default());
            }
            OrderStatus::Failed => self.failed += 1,
            OrderStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// Repository trait for Order persistence.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert a new order.
    ///
    /// # Errors
    ///
    /// Returns error if the id already exists or persistence fails.
    async fn create(&self, order: &Order) -> Result<(), OrderError>;

    /// Find an order by its ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, OrderError>;

    /// Replace the stored state of an order.
    ///
    /// # Errors
    ///
    /// Returns error if the order does not exist or the stored order is
    /// already terminal in a different status.
    async fn update(&self, order: &Order) -> Result<(), OrderError>;

    /// List an owner's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    async fn list_by_owner(
        &self,
        owner: &UserId,
        query: &OrderQuery,
    ) -> Result<OrderPage, OrderError>;

    /// Aggregate an owner's orders.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    async fn summary(&self, owner: &UserId) -> Result<OrderSummary, OrderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_offset_and_limit() {
        let query = OrderQuery {
            page: 3,
            page_size: 10,
            ..OrderQuery::default()
        };
        assert_eq!(query.offset(), 20);
        assert_eq!(query.limit(), 10);

        let oversized = OrderQuery {
            page: 0,
            page_size: 1000,
            ..OrderQuery::default()
        };
        assert_eq!(oversized.offset(), 0);
        assert_eq!(oversized.limit(), MAX_PAGE_SIZE);
    }

    #[test]
    fn total_pages_rounds_up() {
        let page = OrderPage {
            orders: vec![],
            total: 21,
            page: 1,
            page_size: 10,
        };
        assert_eq!(page.total_pages(), 3);
    }
}
