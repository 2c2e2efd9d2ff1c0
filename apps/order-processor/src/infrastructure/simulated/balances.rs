//! Simulated balance authority.
//!
//! Transactions are applied as signed deltas under one lock, so concurrent
//! debits for the same owner cannot overdraw.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Faults;
use crate::application::ports::{
    BalanceCheck, BalancePort, ServiceError, TransactionKind, TransactionRequest,
};
use crate::config::SimulationConfig;
use crate::domain::shared::{Timestamp, TransactionId, UserId};

/// An applied transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Transaction id.
    pub id: TransactionId,
    /// The request as received.
    pub request: TransactionRequest,
    /// Balance after the transaction.
    pub balance_after: Decimal,
    /// When it was applied.
    pub applied_at: Timestamp,
}

#[derive(Debug, Default)]
struct Ledger {
    balances: HashMap<UserId, Decimal>,
    entries: Vec<LedgerEntry>,
}

/// Account balances with an append-only transaction log.
#[derive(Debug, Default)]
pub struct SimulatedBalanceLedger {
    ledger: Mutex<Ledger>,
    faults: Faults,
}

impl SimulatedBalanceLedger {
    /// An empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from configuration.
    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        let ledger = Self::new();
        for user in &config.users {
            ledger.set_balance(UserId::new(user.id.as_str()), user.balance);
        }
        ledger
    }

    /// Add an account.
    #[must_use]
    pub fn with_balance(self, user_id: impl Into<String>, amount: Decimal) -> Self {
        self.set_balance(UserId::new(user_id), amount);
        self
    }

    /// Set an account balance.
    pub fn set_balance(&self, user_id: UserId, amount: Decimal) {
        self.ledger.lock().balances.insert(user_id, amount);
    }

    /// Current balance, zero for unknown accounts.
    #[must_use]
    pub fn balance(&self, user_id: &UserId) -> Decimal {
        self.ledger
            .lock()
            .balances
            .get(user_id)
            .copied()
            .unwrap_or_default()
    }

    /// Applied transactions in order.
    #[must_use]
    pub fn transactions(&self) -> Vec<LedgerEntry> {
        self.ledger.lock().entries.clone()
    }

    /// Delay every call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults.set_latency(latency);
    }

    /// Fail the next call with `error`.
    pub fn fail_next(&self, error: ServiceError) {
        self.faults.push_failure(error);
    }

    /// Number of check and transaction calls.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.faults.calls()
    }
}

#[async_trait]
impl BalancePort for SimulatedBalanceLedger {
    async fn check_balance(
        &self,
        user_id: &UserId,
        amount: Decimal,
    ) -> Result<BalanceCheck, ServiceError> {
        self.faults.before_call().await?;

        let ledger = self.ledger.lock();
        let available = ledger
            .balances
            .get(user_id)
            .copied()
            .ok_or_else(|| ServiceError::NotFound {
                message: format!("account {user_id} not found"),
            })?;

        Ok(BalanceCheck {
            sufficient: available >= amount,
            available,
        })
    }

    async fn process_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<TransactionId, ServiceError> {
        self.faults.before_call().await?;

        if request.amount < Decimal::ZERO {
            return Err(ServiceError::Rejected {
                message: format!("negative transaction amount {}", request.amount),
            });
        }

        let mut ledger = self.ledger.lock();
        let balance = ledger
            .balances
            .get_mut(&request.user_id)
            .ok_or_else(|| ServiceError::NotFound {
                message: format!("account {} not found", request.user_id),
            })?;

        let next = match request.kind {
            TransactionKind::Debit => *balance - request.amount,
            TransactionKind::Credit => *balance + request.amount,
        };
        if next < Decimal::ZERO {
            return Err(ServiceError::Rejected {
                message: format!(
                    "insufficient balance: available {balance}, required {}",
                    request.amount
                ),
            });
        }
        *balance = next;

        let id = TransactionId::generate();
        ledger.entries.push(LedgerEntry {
            id: id.clone(),
            request,
            balance_after: next,
            applied_at: Timestamp::now(),
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::OrderId;
    use rust_decimal_macros::dec;

    fn debit(amount: Decimal) -> TransactionRequest {
        TransactionRequest {
            user_id: UserId::new("alice"),
            amount,
            kind: TransactionKind::Debit,
            order_id: OrderId::new("o-1"),
            note: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn debit_reduces_balance() {
        let ledger = SimulatedBalanceLedger::new().with_balance("alice", dec!(100));

        ledger.process_transaction(debit(dec!(40))).await.unwrap();

        assert_eq!(ledger.balance(&UserId::new("alice")), dec!(60));
        assert_eq!(ledger.transactions().len(), 1);
    }

    #[tokio::test]
    async fn overdraft_is_rejected_without_entry() {
        let ledger = SimulatedBalanceLedger::new().with_balance("alice", dec!(10));

        let err = ledger.process_transaction(debit(dec!(40))).await.unwrap_err();

        assert!(matches!(err, ServiceError::Rejected { .. }));
        assert_eq!(ledger.balance(&UserId::new("alice")), dec!(10));
        assert!(ledger.transactions().is_empty());
    }

    #[tokio::test]
    async fn injected_failure_is_returned_once() {
        let ledger = SimulatedBalanceLedger::new().with_balance("alice", dec!(10));
        ledger.fail_next(ServiceError::Unavailable {
            message: "maintenance".to_string(),
        });

        assert!(ledger.check_balance(&UserId::new("alice"), dec!(1)).await.is_err());
        assert!(ledger.check_balance(&UserId::new("alice"), dec!(1)).await.is_ok());
        assert_eq!(ledger.calls(), 2);
    }
}
