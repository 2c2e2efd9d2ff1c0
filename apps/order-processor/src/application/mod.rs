//! Application Layer
//!
//! - `ports`: interfaces to collaborators and the broker
//! - `execution`: concurrent per-order execution engine
//! - `worker_pool`: bounded prioritised background execution
//! - `use_cases`: placement, execution, cancellation, dispatch and message
//!   handlers
//! - `dto`: wire envelope for lifecycle events

pub mod dto;
pub mod execution;
pub mod ports;
pub mod use_cases;
pub mod worker_pool;
