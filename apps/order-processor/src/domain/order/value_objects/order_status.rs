//! Order status lifecycle.
//!
//! ```text
//!            ┌──> executed
//! pending ───┼──> failed
//!            └──> cancelled
//! ```
//!
//! Every non-pending status is terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Created, awaiting execution.
    Pending,
    /// Executed successfully.
    Executed,
    /// Execution failed.
    Failed,
    /// Cancelled while pending.
    Cancelled,
}

impl OrderStatus {
    /// Returns true if the order can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Returns true if moving to `target` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        matches!(self, Self::Pending) && target.is_terminal()
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
