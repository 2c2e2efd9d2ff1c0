//! Domain events for the order lifecycle.
//!
//! One event per status transition. The routing key of each event kind is
//! the topic used on the message bus.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::value_objects::{OrderKind, OrderSide, OrderStatus};
use crate::domain::shared::{OrderId, Symbol, Timestamp, UserId};

/// Kind of lifecycle event, used for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrderEventKind {
    /// `order.created`
    #[serde(rename = "order.created")]
    Created,
    /// `order.executed`
    #[serde(rename = "order.executed")]
    Executed,
    /// `order.cancelled`
    #[serde(rename = "order.cancelled")]
    Cancelled,
    /// `order.failed`
    #[serde(rename = "order.failed")]
    Failed,
}

impl OrderEventKind {
    /// All event kinds.
    pub const ALL: [Self; 4] = [Self::Created, Self::Executed, Self::Cancelled, Self::Failed];

    /// Topic routing key.
    #[must_use]
    pub const fn routing_key(&self) -> &'static str {
        match self {
            Self::Created => "order.created",
            Self::Executed => "order.executed",
            Self::Cancelled => "order.cancelled",
            Self::Failed => "order.failed",
        }
    }

    /// Parse a routing key.
    #[must_use]
    pub fn from_routing_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.routing_key() == key)
    }

    /// Order status an order must be in once this event has been emitted.
    #[must_use]
    pub const fn resulting_status(&self) -> OrderStatus {
        match self {
            Self::Created => OrderStatus::Pending,
            Self::Executed => OrderStatus::Executed,
            Self::Cancelled => OrderStatus::Cancelled,
            Self::Failed => OrderStatus::Failed,
        }
    }
}

impl fmt::Display for OrderEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_key())
    }
}

/// All possible order events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEvent {
    /// Order created and pending execution.
    Created(OrderCreated),
    /// Order executed.
    Executed(OrderExecuted),
    /// Order cancelled while pending.
    Cancelled(OrderCancelled),
    /// Order execution failed.
    Failed(OrderFailed),
}

impl OrderEvent {
    /// Get the order ID for this event.
    #[must_use]
    pub const fn order_id(&self) -> &OrderId {
        match self {
            Self::Created(e) => &e.order_id,
            Self::Executed(e) => &e.order_id,
            Self::Cancelled(e) => &e.order_id,
            Self::Failed(e) => &e.order_id,
        }
    }

    /// Get the owner of the order.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        match self {
            Self::Created(e) => &e.user_id,
            Self::Executed(e) => &e.user_id,
            Self::Cancelled(e) => &e.user_id,
            Self::Failed(e) => &e.user_id,
        }
    }

    /// Get the timestamp when this event occurred.
    #[must_use]
    pub const fn occurred_at(&self) -> Timestamp {
        match self {
            Self::Created(e) => e.occurred_at,
            Self::Executed(e) => e.occurred_at,
            Self::Cancelled(e) => e.occurred_at,
            Self::Failed(e) => e.occurred_at,
        }
    }

    /// Get the event kind.
    #[must_use]
    pub const fn kind(&self) -> OrderEventKind {
        match self {
            Self::Created(_) => OrderEventKind::Created,
            Self::Executed(_) => OrderEventKind::Executed,
            Self::Cancelled(_) => OrderEventKind::Cancelled,
            Self::Failed(_) => OrderEventKind::Failed,
        }
    }
}

/// Event: order created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    /// Order ID.
    pub order_id: OrderId,
    /// Owner.
    pub user_id: UserId,
    /// Symbol.
    pub symbol: Symbol,
    /// Side.
    pub side: OrderSide,
    /// Kind.
    pub kind: OrderKind,
    /// Quantity.
    pub quantity: Decimal,
    /// Limit price (if applicable).
    pub limit_price: Option<Decimal>,
    /// When the event occurred.
    pub occurred_at: Timestamp,
}

/// Event: order executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderExecuted {
    /// Order ID.
    pub order_id: OrderId,
    /// Owner.
    pub user_id: UserId,
    /// Symbol.
    pub symbol: Symbol,
    /// Side.
    pub side: OrderSide,
    /// Quantity.
    pub quantity: Decimal,
    /// Execution price.
    pub price: Decimal,
    /// Quantity times execution price.
    pub total_amount: Decimal,
    /// Fee charged.
    pub fee: Decimal,
    /// When the event occurred.
    pub occurred_at: Timestamp,
}

/// Event: order cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    /// Order ID.
    pub order_id: OrderId,
    /// Owner.
    pub user_id: UserId,
    /// Cancellation reason.
    pub reason: Option<String>,
    /// When the event occurred.
    pub occurred_at: Timestamp,
}

/// Event: order failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFailed {
    /// Order ID.
    pub order_id: OrderId,
    /// Owner.
    pub user_id: UserId,
    /// Human-readable failure reason.
    pub reason: String,
    /// When the event occurred.
    pub occurred_at: Timestamp,
}
