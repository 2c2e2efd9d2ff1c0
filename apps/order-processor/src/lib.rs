// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::items_after_statements
    )
)]

//! Order Processor - Rust Core Library
//!
//! Concurrent order execution with asynchronous event delivery.
//!
//! # Architecture (Hexagonal)
//!
//! ## Layers (inside → outside)
//!
//! - **Domain**: orders, their lifecycle events and pricing arithmetic
//!   - `order`: Order aggregate, status lifecycle, repository trait
//!   - `pricing`: slippage, limit marketability, fees, settlement amounts
//!
//! - **Application**: orchestration
//!   - `execution`: fan-out/fan-in engine running requester validation,
//!     pricing, balance and fee checks concurrently under one deadline
//!   - `worker_pool`: bounded priority queue, retrying workers, metrics,
//!     two-phase stop
//!   - `use_cases`: place, execute, cancel, dispatch, message handlers
//!   - `ports`: collaborator and broker interfaces
//!
//! - **Infrastructure**: adapters
//!   - `messaging`: publisher with retry, consumer with dead-lettering and
//!     reconnect, in-process topic broker
//!   - `persistence`: in-memory order repository
//!   - `simulated`: in-memory collaborators with latency and fault injection
//!
//! # Failure policy
//!
//! See [`error`] for how error codes map to retry and dead-letter decisions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Domain layer - orders and pricing with no I/O.
pub mod domain;

/// Application layer - engine, worker pool, use cases and ports.
pub mod application;

/// Infrastructure layer - adapters.
pub mod infrastructure;

/// Configuration loading and validation.
pub mod config;

/// Error taxonomy shared across layers.
pub mod error;

/// Logging and metrics export.
pub mod observability;

pub use application::execution::{ExecutionContext, ExecutionEngine, ExecutionResult, OrderExecutor};
pub use application::worker_pool::{OrchestratorMetrics, OrderTask, PoolError, WorkerPool};
pub use domain::order::{
    CreateOrderCommand, Order, OrderEvent, OrderKind, OrderSide, OrderStatus,
};
pub use error::{ErrorCategory, ErrorCode, ExecutionError};
