//! Order aggregate.

mod order;

pub use order::{CreateOrderCommand, ExecutionFill, Order};
