//! Order execution: the fan-out/fan-in engine, its context and result types.

mod context;
mod engine;
mod result;

pub use context::ExecutionContext;
pub use engine::{
    BALANCE_CHECK_STEP, BALANCE_UPDATE_STEP, ExecutionEngine, FEE_STEP, OrderExecutor,
    PRICE_STEP, USER_VALIDATION_STEP,
};
pub use result::{
    BalanceOutcome, ExecutionResult, FeeOutcome, PriceOutcome, ProcessingStep, StepStatus,
    ValidationOutcome,
};
