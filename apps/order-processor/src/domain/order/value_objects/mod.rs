//! Order value objects.

mod order_kind;
mod order_side;
mod order_status;

pub use order_kind::OrderKind;
pub use order_side::OrderSide;
pub use order_status::OrderStatus;
