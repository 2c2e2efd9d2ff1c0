//! Execution result types.

use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::ExecutionFill;
use crate::domain::shared::{OrderId, Timestamp, TransactionId};
use crate::error::ExecutionError;

/// Requester check outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Requester may trade.
    pub valid: bool,
    /// Message from the validation service.
    pub message: String,
}

/// Balance check outcome. Sells are not checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceOutcome {
    /// Whether a check was performed.
    pub checked: bool,
    /// Available funds cover the order.
    pub sufficient: bool,
    /// Reported available balance.
    pub available: Decimal,
    /// Funds the order needs (`total + fee`).
    pub required: Decimal,
}

impl BalanceOutcome {
    /// Outcome for orders that do not spend funds.
    #[must_use]
    pub const fn skipped() -> Self {
        Self {
            checked: false,
            sufficient: true,
            available: Decimal::ZERO,
            required: Decimal::ZERO,
        }
    }
}

/// Pricing outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceOutcome {
    /// Quoted market price.
    pub market_price: Decimal,
    /// Slippage fraction applied.
    pub slippage: Decimal,
    /// Price the order executes at.
    pub execution_price: Decimal,
    /// Where the quote came from.
    pub source: String,
}

/// Fee outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeOutcome {
    /// Rate applied.
    pub rate: Decimal,
    /// Fee charged.
    pub amount: Decimal,
    /// The minimum fee was charged instead of `total × rate`.
    pub minimum_applied: bool,
}

/// Step lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Running.
    Started,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

/// Diagnostic trace of one sub-task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStep {
    /// Step name.
    pub name: String,
    /// Status.
    pub status: StepStatus,
    /// Start time.
    pub started_at: Timestamp,
    /// End time.
    pub completed_at: Option<Timestamp>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Error message when failed.
    pub error: Option<String>,
    /// Snapshot of the step's output.
    pub payload: Option<serde_json::Value>,
    #[serde(skip)]
    clock: Option<Instant>,
}

impl ProcessingStep {
    /// Start a step.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Started,
            started_at: Timestamp::now(),
            completed_at: None,
            duration_ms: 0,
            error: None,
            payload: None,
            clock: Some(Instant::now()),
        }
    }

    fn finish(&mut self, status: StepStatus) {
        self.status = status;
        self.completed_at = Some(Timestamp::now());
        self.duration_ms = self
            .clock
            .map_or(0, |c| u64::try_from(c.elapsed().as_millis()).unwrap_or(u64::MAX));
    }

    /// Mark completed with an output snapshot.
    #[must_use]
    pub fn complete<T: Serialize>(mut self, output: &T) -> Self {
        self.payload = serde_json::to_value(output).ok();
        self.finish(StepStatus::Completed);
        self
    }

    /// Mark failed.
    #[must_use]
    pub fn fail(mut self, error: &ExecutionError) -> Self {
        self.error = Some(error.to_string());
        self.finish(StepStatus::Failed);
        self
    }

    /// Close the step from a result.
    #[must_use]
    pub fn record<T: Serialize>(self, result: &Result<T, ExecutionError>) -> Self {
        match result {
            Ok(output) => self.complete(output),
            Err(e) => self.fail(e),
        }
    }
}

/// Everything the engine learned about one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Order executed.
    pub order_id: OrderId,
    /// Requester check.
    pub validation: Option<ValidationOutcome>,
    /// Balance check.
    pub balance: Option<BalanceOutcome>,
    /// Pricing.
    pub price: Option<PriceOutcome>,
    /// Fee.
    pub fee: Option<FeeOutcome>,
    /// Quantity times execution price.
    pub total_amount: Option<Decimal>,
    /// Balance transaction applied on success.
    pub transaction_id: Option<TransactionId>,
    /// Per-step trace in completion order.
    pub steps: Vec<ProcessingStep>,
    /// Whether the order executed.
    pub success: bool,
    /// First error when unsuccessful.
    pub error: Option<String>,
    /// Start time.
    pub started_at: Timestamp,
    /// End time.
    pub completed_at: Option<Timestamp>,
    /// Wall-clock duration.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl ExecutionResult {
    /// An empty, unsuccessful result.
    #[must_use]
    pub fn new(order_id: OrderId) -> Self {
        Self {
            order_id,
            validation: None,
            balance: None,
            price: None,
            fee: None,
            total_amount: None,
            transaction_id: None,
            steps: Vec::new(),
            success: false,
            error: None,
            started_at: Timestamp::now(),
            completed_at: None,
            duration: Duration::ZERO,
        }
    }

    /// The fill to record on the order, available once pricing and fees succeeded.
    #[must_use]
    pub fn fill(&self) -> Option<ExecutionFill> {
        Some(ExecutionFill {
            price: self.price.as_ref()?.execution_price,
            total_amount: self.total_amount?,
            fee: self.fee?.amount,
        })
    }

    /// Look up a step by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&ProcessingStep> {
        self.steps.iter().find(|s| s.name == name)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
