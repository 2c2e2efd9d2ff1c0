//! Balance Port (Driven Port)
//!
//! The balance authority owns funds. Mutations are sent as signed
//! transactions and applied atomically on its side.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ServiceError;
use crate::domain::shared::{OrderId, TransactionId, UserId};

/// Outcome of a balance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCheck {
    /// Whether the available balance covers the amount.
    pub sufficient: bool,
    /// Currently available balance.
    pub available: Decimal,
}

/// Direction of a balance transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Remove funds.
    Debit,
    /// Add funds.
    Credit,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debit => f.write_str("debit"),
            Self::Credit => f.write_str("credit"),
        }
    }
}

/// A balance mutation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    /// Account owner.
    pub user_id: UserId,
    /// Positive amount to move.
    pub amount: Decimal,
    /// Debit or credit.
    pub kind: TransactionKind,
    /// Order that caused the mutation.
    pub order_id: OrderId,
    /// Free-form description.
    pub note: String,
}

/// Port for the balance service.
#[async_trait]
pub trait BalancePort: Send + Sync {
    /// Check whether `amount` is available.
    async fn check_balance(
        &self,
        user_id: &UserId,
        amount: Decimal,
    ) -> Result<BalanceCheck, ServiceError>;

    /// Apply a transaction and return its id.
    async fn process_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<TransactionId, ServiceError>;
}
