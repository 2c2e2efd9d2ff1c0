//! Shared Value Objects
//!
//! Immutable domain types compared by value, not identity.

mod identifiers;
mod symbol;
mod timestamp;

pub use identifiers::{MessageId, OrderId, TransactionId, UserId};
pub use symbol::Symbol;
pub use timestamp::Timestamp;
