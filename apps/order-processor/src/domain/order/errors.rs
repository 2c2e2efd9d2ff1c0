//! Failures raised by the order aggregate and its store.

use thiserror::Error;

use super::value_objects::OrderStatus;
use crate::error::{ErrorCode, ExecutionError};

/// Order lifecycle and storage failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The order is terminal, or the move is not out of `pending`.
    #[error("Invalid order state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Status at the time of the call.
        from: OrderStatus,
        /// Requested status.
        to: OrderStatus,
    },

    /// Rejected at construction.
    #[error("Invalid order parameter '{field}': {message}")]
    InvalidParameters {
        /// Offending field, as named on the wire.
        field: String,
        /// Why the value was refused.
        message: String,
    },

    /// No order stored under this id.
    #[error("Order not found: {order_id}")]
    NotFound {
        /// The id looked up.
        order_id: String,
    },

    /// `create` called twice with one id.
    #[error("Duplicate order ID: {order_id}")]
    DuplicateOrderId {
        /// The id already in use.
        order_id: String,
    },

    /// The backing store failed.
    #[error("Order storage error: {message}")]
    Storage {
        /// Backend detail.
        message: String,
    },
}

impl From<OrderError> for ExecutionError {
    fn from(err: OrderError) -> Self {
        let code = match &err {
            OrderError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            OrderError::InvalidParameters { .. } => ErrorCode::InvalidRequest,
            OrderError::NotFound { .. } => ErrorCode::OrderNotFound,
            OrderError::DuplicateOrderId { .. } | OrderError::Storage { .. } => {
                ErrorCode::InternalError
            }
        };
        Self::new(code, err.to_string())
    }
}
