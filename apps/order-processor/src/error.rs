//! Error taxonomy for order processing.
//!
//! Every failure that crosses a component boundary is an [`ExecutionError`]
//! carrying an [`ErrorCode`]. Retry decisions are made from the code's
//! [`ErrorCategory`], never from the message text.
//!
//! | Category | Codes | Policy |
//! |----------|-------|--------|
//! | Validation | requester, symbol, balance, limit, state | terminal, marked `failed` |
//! | Transient | timeout, connection, network, unavailable, rate limit | retried with backoff |
//! | Malformed | undecodable message | dead-lettered on first delivery |
//! | Capacity | queue full | rejected immediately |
//! | Internal | everything else | terminal |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes for order processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors
    /// Invalid request format or missing fields.
    InvalidRequest,
    /// Requester is unknown, inactive or not authorized.
    UserRejected,
    /// Symbol has no market or is malformed.
    InvalidSymbol,
    /// Available balance does not cover the order.
    InsufficientBalance,
    /// Limit price cannot be met at the current market price.
    LimitNotMarketable,
    /// Order not found.
    OrderNotFound,
    /// Order has already left the `pending` state.
    OrderNotPending,
    /// Attempted an illegal order status transition.
    InvalidStateTransition,

    // Transient infrastructure errors
    /// A call or the whole execution exceeded its deadline.
    Timeout,
    /// The collaborator refused the connection.
    ConnectionRefused,
    /// Generic network failure.
    NetworkError,
    /// The collaborator or broker is temporarily unavailable.
    ServiceUnavailable,
    /// The collaborator throttled the request.
    RateLimited,
    /// The worker pool is not accepting work (stopping or stopped).
    NotRunning,

    // Malformed messages
    /// Payload could not be decoded.
    MalformedMessage,

    // Capacity errors
    /// Task queue is at capacity.
    QueueFull,

    // Internal errors
    /// The execution context was cancelled.
    Cancelled,
    /// Unexpected internal error.
    InternalError,
}

/// Coarse classification used for retry and dead-letter decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Business validation failure; never retried.
    Validation,
    /// Infrastructure hiccup; retried with backoff up to a bound.
    Transient,
    /// Poison message; never retried.
    Malformed,
    /// Backpressure rejection; the caller decides what to do.
    Capacity,
    /// Anything else; never retried.
    Internal,
}

impl ErrorCode {
    /// Get the category for this code.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest
            | Self::UserRejected
            | Self::InvalidSymbol
            | Self::InsufficientBalance
            | Self::LimitNotMarketable
            | Self::OrderNotFound
            | Self::OrderNotPending
            | Self::InvalidStateTransition => ErrorCategory::Validation,

            Self::Timeout
            | Self::ConnectionRefused
            | Self::NetworkError
            | Self::ServiceUnavailable
            | Self::RateLimited
            | Self::NotRunning => ErrorCategory::Transient,

            Self::MalformedMessage => ErrorCategory::Malformed,
            Self::QueueFull => ErrorCategory::Capacity,
            Self::Cancelled | Self::InternalError => ErrorCategory::Internal,
        }
    }

    /// Whether an operation failing with this code may succeed if retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }

    /// Get the error reason string.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::UserRejected => "USER_REJECTED",
            Self::InvalidSymbol => "INVALID_SYMBOL",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::LimitNotMarketable => "LIMIT_NOT_MARKETABLE",
            Self::OrderNotFound => "ORDER_NOT_FOUND",
            Self::OrderNotPending => "ORDER_NOT_PENDING",
            Self::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            Self::Timeout => "TIMEOUT",
            Self::ConnectionRefused => "CONNECTION_REFUSED",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::RateLimited => "RATE_LIMITED",
            Self::NotRunning => "NOT_RUNNING",
            Self::MalformedMessage => "MALFORMED_MESSAGE",
            Self::QueueFull => "QUEUE_FULL",
            Self::Cancelled => "CANCELLED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// A classified error with context.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ExecutionError {
    code: ErrorCode,
    message: String,
    context: Vec<(String, String)>,
}

impl ExecutionError {
    /// Create a new execution error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: Vec::new(),
        }
    }

    /// Add context to the error.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }

    /// Prefix the message with the name of the sub-task that produced it.
    #[must_use]
    pub fn in_step(mut self, step: &str) -> Self {
        self.message = format!("{step}: {}", self.message);
        self.with_context("step", step)
    }

    /// Get the error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the category of the error code.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Whether the failed operation may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the context.
    #[must_use]
    pub fn context(&self) -> &[(String, String)] {
        &self.context
    }

    /// Look up a context value by key.
    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

// ============================================
// Convenience Constructors
// ============================================

impl ExecutionError {
    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Create an order not found error.
    #[must_use]
    pub fn order_not_found(order_id: impl Into<String>) -> Self {
        let order_id = order_id.into();
        Self::new(ErrorCode::OrderNotFound, format!("order not found: {order_id}"))
            .with_context("order_id", order_id)
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    /// Create a cancellation error.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }

    /// Create a malformed message error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedMessage, message)
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}
