//! Order Bounded Context
//!
//! The Order aggregate, its forward-only status lifecycle, domain events and
//! the persistence port.

pub mod aggregate;
pub mod errors;
pub mod events;
pub mod repository;
pub mod value_objects;

pub use aggregate::{CreateOrderCommand, ExecutionFill, Order};
pub use errors::OrderError;
pub use events::{
    OrderCancelled, OrderCreated, OrderEvent, OrderEventKind, OrderExecuted, OrderFailed,
};
pub use repository::{OrderPage, OrderQuery, OrderRepository, OrderSummary};
pub use value_objects::{OrderKind, OrderSide, OrderStatus};
