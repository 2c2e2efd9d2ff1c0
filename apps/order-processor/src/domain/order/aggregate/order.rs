//! Order Aggregate Root
//!
//! Status only moves forward: `pending -> executed | failed | cancelled`.
//! Every transition records a domain event that callers drain and publish
//! after persisting the new state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::errors::OrderError;
use crate::domain::order::events::{
    OrderCancelled, OrderCreated, OrderEvent, OrderExecuted, OrderFailed,
};
use crate::domain::order::value_objects::{OrderKind, OrderSide, OrderStatus};
use crate::domain::shared::{OrderId, Symbol, Timestamp, UserId};

/// Command to create a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderCommand {
    /// Requester placing the order.
    pub user_id: UserId,
    /// Symbol to trade.
    pub symbol: Symbol,
    /// Order side.
    pub side: OrderSide,
    /// Order kind.
    pub kind: OrderKind,
    /// Quantity to trade.
    pub quantity: Decimal,
    /// Limit price (required for limit orders).
    pub limit_price: Option<Decimal>,
}

impl CreateOrderCommand {
    /// Create a market order command.
    #[must_use]
    pub fn market(user_id: UserId, symbol: Symbol, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            user_id,
            symbol,
            side,
            kind: OrderKind::Market,
            quantity,
            limit_price: None,
        }
    }

    /// Create a limit order command.
    #[must_use]
    pub fn limit(
        user_id: UserId,
        symbol: Symbol,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            user_id,
            symbol,
            side,
            kind: OrderKind::Limit,
            quantity,
            limit_price: Some(limit_price),
        }
    }

    /// Validate the command parameters.
    ///
    /// # Errors
    ///
    /// Returns error if required parameters are missing or invalid.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.user_id.as_str().trim().is_empty() {
            return Err(invalid("user_id", "owner is required"));
        }

        self.symbol
            .validate()
            .map_err(|e| invalid("symbol", e.to_string()))?;

        if self.quantity <= Decimal::ZERO {
            return Err(invalid("quantity", "quantity must be positive"));
        }

        match (self.kind.requires_limit_price(), self.limit_price) {
            (true, None) => Err(invalid("limit_price", "limit price required for limit orders")),
            (_, Some(price)) if price <= Decimal::ZERO => {
                Err(invalid("limit_price", "limit price must be positive"))
            }
            _ => Ok(()),
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> OrderError {
    OrderError::InvalidParameters {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Amounts settled by a successful execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFill {
    /// Execution price.
    pub price: Decimal,
    /// Quantity times execution price.
    pub total_amount: Decimal,
    /// Fee charged.
    pub fee: Decimal,
}

/// Order Aggregate Root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    symbol: Symbol,
    side: OrderSide,
    kind: OrderKind,
    quantity: Decimal,
    /// Limit price until executed, then the execution price.
    price: Option<Decimal>,
    total_amount: Option<Decimal>,
    fee: Option<Decimal>,
    status: OrderStatus,
    error_message: Option<String>,
    #[serde(skip)]
    events: Vec<OrderEvent>,
    created_at: Timestamp,
    executed_at: Option<Timestamp>,
    updated_at: Timestamp,
}

impl Order {
    /// Create a new pending order from a command.
    ///
    /// Records an `OrderCreated` event.
    ///
    /// # Errors
    ///
    /// Returns error if command validation fails.
    pub fn new(cmd: CreateOrderCommand) -> Result<Self, OrderError> {
        cmd.validate()?;

        let id = OrderId::generate();
        let now = Timestamp::now();

        let mut order = Self {
            id: id.clone(),
            user_id: cmd.user_id.clone(),
            symbol: cmd.symbol.clone(),
            side: cmd.side,
            kind: cmd.kind,
            quantity: cmd.quantity,
            price: cmd.limit_price,
            total_amount: None,
            fee: None,
            status: OrderStatus::Pending,
            error_message: None,
            events: Vec::new(),
            created_at: now,
            executed_at: None,
            updated_at: now,
        };

        order.events.push(OrderEvent::Created(OrderCreated {
            order_id: id,
            user_id: cmd.user_id,
            symbol: cmd.symbol,
            side: cmd.side,
            kind: cmd.kind,
            quantity: cmd.quantity,
            limit_price: cmd.limit_price,
            occurred_at: now,
        }));

        Ok(order)
    }

    // ========================================================================
    // Getters
    // ========================================================================

    /// Get the order ID.
    #[must_use]
    pub const fn id(&self) -> &OrderId {
        &self.id
    }

    /// Get the owner.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Get the symbol.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Get the order side.
    #[must_use]
    pub const fn side(&self) -> OrderSide {
        self.side
    }

    /// Get the order kind.
    #[must_use]
    pub const fn kind(&self) -> OrderKind {
        self.kind
    }

    /// Get the quantity.
    #[must_use]
    pub const fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// Get the price: the limit price while pending, the execution price once executed.
    #[must_use]
    pub const fn price(&self) -> Option<Decimal> {
        self.price
    }

    /// Get the limit price of a limit order.
    #[must_use]
    pub const fn limit_price(&self) -> Option<Decimal> {
        match self.kind {
            OrderKind::Limit => self.price,
            OrderKind::Market => None,
        }
    }

    /// Get the computed total amount.
    #[must_use]
    pub const fn total_amount(&self) -> Option<Decimal> {
        self.total_amount
    }

    /// Get the computed fee.
    #[must_use]
    pub const fn fee(&self) -> Option<Decimal> {
        self.fee
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> OrderStatus {
        self.status
    }

    /// Get the failure reason, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Get the execution timestamp.
    #[must_use]
    pub const fn executed_at(&self) -> Option<Timestamp> {
        self.executed_at
    }

    /// Get the last update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    // ========================================================================
    // State Transitions
    // ========================================================================

    /// Record a successful execution.
    ///
    /// # Errors
    ///
    /// Returns error if the order is not pending.
    pub fn mark_executed(&mut self, fill: ExecutionFill) -> Result<(), OrderError> {
        self.transition(OrderStatus::Executed)?;

        let now = self.updated_at;
        self.price = Some(fill.price);
        self.total_amount = Some(fill.total_amount);
        self.fee = Some(fill.fee);
        self.executed_at = Some(now);

        self.events.push(OrderEvent::Executed(OrderExecuted {
            order_id: self.id.clone(),
            user_id: self.user_id.clone(),
            symbol: self.symbol.clone(),
            side: self.side,
            quantity: self.quantity,
            price: fill.price,
            total_amount: fill.total_amount,
            fee: fill.fee,
            occurred_at: now,
        }));

        Ok(())
    }

    /// Record a failed execution.
    ///
    /// # Errors
    ///
    /// Returns error if the order is not pending.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        self.transition(OrderStatus::Failed)?;

        let reason = reason.into();
        self.error_message = Some(reason.clone());

        self.events.push(OrderEvent::Failed(OrderFailed {
            order_id: self.id.clone(),
            user_id: self.user_id.clone(),
            reason,
            occurred_at: self.updated_at,
        }));

        Ok(())
    }

    /// Cancel a pending order.
    ///
    /// # Errors
    ///
    /// Returns error if the order is not pending.
    pub fn cancel(&mut self, reason: Option<String>) -> Result<(), OrderError> {
        self.transition(OrderStatus::Cancelled)?;

        self.events.push(OrderEvent::Cancelled(OrderCancelled {
            order_id: self.id.clone(),
            user_id: self.user_id.clone(),
            reason,
            occurred_at: self.updated_at,
        }));

        Ok(())
    }

    fn transition(&mut self, to: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(to) {
            return Err(OrderError::InvalidStateTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Timestamp::now();
        Ok(())
    }

    // ========================================================================
    // Domain Events
    // ========================================================================

    /// Take all pending domain events.
    pub fn drain_events(&mut self) -> Vec<OrderEvent> {
        std::mem::take(&mut self.events)
    }

    /// Peek at pending domain events.
    #[must_use]
    pub fn pending_events(&self) -> &[OrderEvent] {
        &self.events
    }
}
