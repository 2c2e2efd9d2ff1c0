//! Application Use Cases

mod cancel_order;
mod claims;
mod dispatch;
mod execute_order;
mod handlers;
mod place_order;

pub use cancel_order::CancelOrderUseCase;
pub use claims::{Claim, OrderClaims};
pub use dispatch::OrderDispatcher;
pub use execute_order::ExecuteOrderUseCase;
pub use handlers::{AuditEntry, AuditTrailHandler, DEFAULT_AUDIT_CAPACITY, OrderCreatedHandler};
pub use place_order::PlaceOrderUseCase;
