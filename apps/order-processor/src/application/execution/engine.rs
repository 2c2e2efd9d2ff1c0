//! Execution Engine
//!
//! Runs one order through four concurrent sub-tasks joined at a barrier:
//!
//! 1. `user_validation` - the requester is known and active
//! 2. `price_fetch` - quote, slippage and limit resolution
//! 3. `balance_check` - a buy's funds cover `total + fee` (skipped for sells)
//! 4. `fee_calculation` - `max(minimum_fee, total × rate)`
//!
//! Balance check and fee calculation share the single price lookup. The first
//! failure cancels the remaining sub-tasks and becomes the call's error. Only
//! when all four succeed is the balance transaction applied; the holdings
//! update that follows is detached and best-effort.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::context::ExecutionContext;
use super::result::{
    BalanceOutcome, ExecutionResult, FeeOutcome, PriceOutcome, ProcessingStep, ValidationOutcome,
};
use crate::application::ports::{
    BalancePort, HoldingsUpdate, PortfolioPort, PriceFeedPort, TransactionKind,
    TransactionRequest, UserValidationPort,
};
use crate::config::ExecutionConfig;
use crate::domain::order::Order;
use crate::domain::pricing::{self, PricingError};
use crate::domain::shared::{Timestamp, TransactionId};
use crate::error::{ErrorCode, ExecutionError};
use crate::observability::record_order_execution;

/// Step name: requester check.
pub const USER_VALIDATION_STEP: &str = "user_validation";
/// Step name: price lookup.
pub const PRICE_STEP: &str = "price_fetch";
/// Step name: funds check.
pub const BALANCE_CHECK_STEP: &str = "balance_check";
/// Step name: fee computation.
pub const FEE_STEP: &str = "fee_calculation";
/// Step name: balance transaction.
pub const BALANCE_UPDATE_STEP: &str = "balance_update";

/// Executes a single order.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    /// Execute `order` within `ctx`.
    ///
    /// # Errors
    ///
    /// Returns the first sub-task failure, wrapped with the sub-task name.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        order: &Order,
    ) -> Result<ExecutionResult, ExecutionError>;
}

/// Fan-out/fan-in order execution against the collaborator ports.
pub struct ExecutionEngine<U, B, P, H>
where
    U: UserValidationPort,
    B: BalancePort,
    P: PriceFeedPort,
    H: PortfolioPort,
{
    users: Arc<U>,
    balances: Arc<B>,
    prices: Arc<P>,
    portfolio: Arc<H>,
    config: ExecutionConfig,
    background: TaskTracker,
}

impl<U, B, P, H> ExecutionEngine<U, B, P, H>
where
    U: UserValidationPort + 'static,
    B: BalancePort + 'static,
    P: PriceFeedPort + 'static,
    H: PortfolioPort + 'static,
{
    /// Create a new engine.
    pub fn new(
        users: Arc<U>,
        balances: Arc<B>,
        prices: Arc<P>,
        portfolio: Arc<H>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            users,
            balances,
            prices,
            portfolio,
            config,
            background: TaskTracker::new(),
        }
    }

    /// Execute an order and return the full trace along with the outcome.
    ///
    /// The trace is populated on failure too: every step that ran is in
    /// `steps`, and `error` holds the first failure.
    pub async fn execute_traced(
        &self,
        ctx: &ExecutionContext,
        order: &Order,
    ) -> (ExecutionResult, Result<(), ExecutionError>) {
        let clock = Instant::now();
        let mut result = ExecutionResult::new(order.id().clone());

        let outcome = self.run(ctx, order, &mut result).await;

        result.duration = clock.elapsed();
        result.completed_at = Some(Timestamp::now());
        match &outcome {
            Ok(()) => {
                result.success = true;
                record_order_execution(order.side().as_str(), "success", result.duration);
                info!(
                    order_id = %order.id(),
                    symbol = %order.symbol(),
                    side = %order.side(),
                    total = ?result.total_amount,
                    fee = ?result.fee.map(|f| f.amount),
                    duration_ms = result.duration.as_millis(),
                    "Order executed"
                );
            }
            Err(e) => {
                result.error = Some(e.to_string());
                record_order_execution(order.side().as_str(), e.code().reason(), result.duration);
                warn!(
                    order_id = %order.id(),
                    code = %e.code(),
                    error = %e,
                    attempt = ctx.attempt(),
                    "Order execution failed"
                );
                debug!(order_id = %order.id(), steps = ?result.steps, "Execution trace");
            }
        }

        (result, outcome)
    }

    /// Wait for detached holdings updates to finish.
    pub async fn drain_background_tasks(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        order: &Order,
        result: &mut ExecutionResult,
    ) -> Result<(), ExecutionError> {
        ctx.check()?;

        let scope = ctx.child().with_timeout(self.config.execution_timeout());
        let barrier = Barrier::new(&scope);
        let price = self.fetch_price(&scope, order).shared();

        let (validation, quoted, balance, fee) = tokio::join!(
            barrier.guard(USER_VALIDATION_STEP, self.validate_user(&scope, order)),
            barrier.guard(PRICE_STEP, price.clone()),
            barrier.guard(BALANCE_CHECK_STEP, self.check_balance(&scope, order, price.clone())),
            barrier.guard(FEE_STEP, self.compute_fee(order, price.clone())),
        );

        let (steps, first_error) = barrier.into_parts();
        result.steps = steps;
        result.validation = validation.ok();
        result.balance = balance.ok();
        result.fee = fee.ok();
        result.price = quoted.ok();

        if let Some(err) = first_error {
            return Err(err);
        }

        let (Some(quote), Some(fee)) = (result.price.clone(), result.fee) else {
            return Err(ExecutionError::internal("sub-tasks succeeded without a price or fee"));
        };
        let total = pricing::total_amount(order.quantity(), quote.execution_price)
            .map_err(|e| pricing_error(e).in_step(BALANCE_UPDATE_STEP))?;
        result.total_amount = Some(total);

        let step = ProcessingStep::start(BALANCE_UPDATE_STEP);
        let settled = self.settle(&scope, order, total, fee.amount).await;
        result.steps.push(step.record(&settled));
        result.transaction_id = Some(settled?);

        self.spawn_holdings_update(HoldingsUpdate {
            user_id: order.user_id().clone(),
            symbol: order.symbol().clone(),
            quantity: order.quantity(),
            price: quote.execution_price,
            side: order.side(),
        });

        Ok(())
    }

    fn step_scope(&self, scope: &ExecutionContext) -> ExecutionContext {
        scope.child().with_timeout(self.config.step_timeout())
    }

    async fn validate_user(
        &self,
        scope: &ExecutionContext,
        order: &Order,
    ) -> Result<ValidationOutcome, ExecutionError> {
        let validation = self
            .step_scope(scope)
            .run(async {
                self.users
                    .verify(order.user_id())
                    .await
                    .map_err(|e| e.into_execution_error(ErrorCode::UserRejected))
            })
            .await
            .map_err(|e| e.in_step(USER_VALIDATION_STEP))?;

        if !validation.valid {
            return Err(ExecutionError::new(
                ErrorCode::UserRejected,
                format!("user validation failed: {}", validation.message),
            )
            .with_context("user_id", order.user_id().as_str())
            .in_step(USER_VALIDATION_STEP));
        }

        Ok(ValidationOutcome {
            valid: true,
            message: validation.message,
        })
    }

    async fn fetch_price(
        &self,
        scope: &ExecutionContext,
        order: &Order,
    ) -> Result<PriceOutcome, ExecutionError> {
        let quote = self
            .step_scope(scope)
            .run(async {
                self.prices
                    .current_price(order.symbol())
                    .await
                    .map_err(|e| e.into_execution_error(ErrorCode::InvalidSymbol))
            })
            .await
            .map_err(|e| e.in_step(PRICE_STEP))?;

        let slippage = pricing::clamp_slippage(self.config.slippage, self.config.max_slippage);
        let adjusted = pricing::apply_slippage(
            quote.price,
            order.side(),
            self.config.slippage,
            self.config.max_slippage,
        )
        .map_err(|e| pricing_error(e).in_step(PRICE_STEP))?;
        let execution_price = pricing::resolve_execution_price(
            order.kind(),
            order.side(),
            order.limit_price(),
            adjusted,
        )
        .map_err(|e| pricing_error(e).in_step(PRICE_STEP))?;

        Ok(PriceOutcome {
            market_price: quote.price,
            slippage,
            execution_price,
            source: quote.source,
        })
    }

    async fn check_balance<F>(
        &self,
        scope: &ExecutionContext,
        order: &Order,
        price: F,
    ) -> Result<BalanceOutcome, ExecutionError>
    where
        F: Future<Output = Result<PriceOutcome, ExecutionError>>,
    {
        if !order.side().requires_funds() {
            return Ok(BalanceOutcome::skipped());
        }

        let price = price.await?;
        let required = pricing::total_amount(order.quantity(), price.execution_price)
            .and_then(|total| {
                let fee = self.config.fee_schedule().fee_for(order.kind(), total)?;
                pricing::required_funds(total, fee)
            })
            .map_err(|e| pricing_error(e).in_step(BALANCE_CHECK_STEP))?;

        let check = self
            .step_scope(scope)
            .run(async {
                self.balances
                    .check_balance(order.user_id(), required)
                    .await
                    .map_err(|e| e.into_execution_error(ErrorCode::UserRejected))
            })
            .await
            .map_err(|e| e.in_step(BALANCE_CHECK_STEP))?;

        if !check.sufficient {
            return Err(ExecutionError::new(
                ErrorCode::InsufficientBalance,
                format!(
                    "insufficient balance: available {}, required {}",
                    check.available.normalize(),
                    required.normalize()
                ),
            )
            .with_context("user_id", order.user_id().as_str())
            .in_step(BALANCE_CHECK_STEP));
        }

        Ok(BalanceOutcome {
            checked: true,
            sufficient: true,
            available: check.available,
            required,
        })
    }

    async fn compute_fee<F>(&self, order: &Order, price: F) -> Result<FeeOutcome, ExecutionError>
    where
        F: Future<Output = Result<PriceOutcome, ExecutionError>>,
    {
        let price = price.await?;
        let schedule = self.config.fee_schedule();
        let rate = schedule.rate_for(order.kind());
        let in_step = |e| pricing_error(e).in_step(FEE_STEP);

        let total =
            pricing::total_amount(order.quantity(), price.execution_price).map_err(in_step)?;
        let rated = pricing::rated_fee(total, rate).map_err(in_step)?;

        Ok(FeeOutcome {
            rate,
            amount: schedule.fee_for(order.kind(), total).map_err(in_step)?,
            minimum_applied: rated < schedule.minimum_fee,
        })
    }

    async fn settle(
        &self,
        scope: &ExecutionContext,
        order: &Order,
        total: rust_decimal::Decimal,
        fee: rust_decimal::Decimal,
    ) -> Result<TransactionId, ExecutionError> {
        let kind = if order.side().requires_funds() {
            TransactionKind::Debit
        } else {
            TransactionKind::Credit
        };
        let amount = pricing::settlement_amount(order.side(), total, fee)
            .map_err(|e| pricing_error(e).in_step(BALANCE_UPDATE_STEP))?;
        let request = TransactionRequest {
            user_id: order.user_id().clone(),
            amount,
            kind,
            order_id: order.id().clone(),
            note: format!(
                "{} {} {} (fee {fee})",
                order.side(),
                order.quantity(),
                order.symbol()
            ),
        };

        self.step_scope(scope)
            .run(async {
                self.balances
                    .process_transaction(request)
                    .await
                    .map_err(|e| e.into_execution_error(ErrorCode::InsufficientBalance))
            })
            .await
            .map_err(|e| e.in_step(BALANCE_UPDATE_STEP))
    }

    fn spawn_holdings_update(&self, update: HoldingsUpdate) {
        let portfolio = Arc::clone(&self.portfolio);
        let timeout = self.config.portfolio_timeout();

        self.background.spawn(async move {
            let user_id = update.user_id.clone();
            let symbol = update.symbol.clone();
            match tokio::time::timeout(timeout, portfolio.update_holdings(update)).await {
                Ok(Ok(())) => debug!(user_id = %user_id, symbol = %symbol, "Holdings updated"),
                Ok(Err(e)) => warn!(
                    user_id = %user_id,
                    symbol = %symbol,
                    error = %e,
                    "Holdings update failed"
                ),
                Err(_) => warn!(
                    user_id = %user_id,
                    symbol = %symbol,
                    timeout_ms = timeout.as_millis(),
                    "Holdings update timed out"
                ),
            }
        });
    }
}

#[async_trait]
impl<U, B, P, H> OrderExecutor for ExecutionEngine<U, B, P, H>
where
    U: UserValidationPort + 'static,
    B: BalancePort + 'static,
    P: PriceFeedPort + 'static,
    H: PortfolioPort + 'static,
{
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        order: &Order,
    ) -> Result<ExecutionResult, ExecutionError> {
        let (result, outcome) = self.execute_traced(ctx, order).await;
        outcome.map(|()| result)
    }
}

/// Join point for the concurrent sub-tasks of one execution.
struct Barrier<'a> {
    scope: &'a ExecutionContext,
    first_error: Mutex<Option<ExecutionError>>,
    steps: Mutex<Vec<ProcessingStep>>,
}

impl<'a> Barrier<'a> {
    fn new(scope: &'a ExecutionContext) -> Self {
        Self {
            scope,
            first_error: Mutex::new(None),
            steps: Mutex::new(Vec::with_capacity(5)),
        }
    }

    /// Await a sub-task and record its step. The first failure is kept and
    /// cancels the siblings.
    async fn guard<T, F>(&self, name: &str, fut: F) -> Result<T, ExecutionError>
    where
        T: Serialize,
        F: Future<Output = Result<T, ExecutionError>>,
    {
        let step = ProcessingStep::start(name);
        let result = fut.await;

        if let Err(e) = &result {
            self.first_error.lock().get_or_insert_with(|| e.clone());
            self.scope.cancel();
        }

        self.steps.lock().push(step.record(&result));
        result
    }

    fn into_parts(self) -> (Vec<ProcessingStep>, Option<ExecutionError>) {
        (self.steps.into_inner(), self.first_error.into_inner())
    }
}

fn pricing_error(err: PricingError) -> ExecutionError {
    let code = match err {
        PricingError::InvalidPrice { .. } => ErrorCode::InvalidSymbol,
        PricingError::LimitNotMarketable { .. } => ErrorCode::LimitNotMarketable,
        PricingError::Overflow { .. } => ErrorCode::InvalidRequest,
    };
    ExecutionError::new(code, err.to_string())
}
