//! Failure type shared by the collaborator ports.

use crate::error::{ErrorCode, ExecutionError};

/// Error returned by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The call did not complete in time.
    #[error("request timed out: {message}")]
    Timeout {
        /// Detail reported by the collaborator.
        message: String,
    },

    /// The collaborator refused the connection.
    #[error("connection refused: {message}")]
    ConnectionRefused {
        /// Detail reported by the collaborator.
        message: String,
    },

    /// Network failure.
    #[error("network error: {message}")]
    Network {
        /// Detail reported by the collaborator.
        message: String,
    },

    /// The collaborator is temporarily unavailable.
    #[error("service unavailable: {message}")]
    Unavailable {
        /// Detail reported by the collaborator.
        message: String,
    },

    /// The collaborator throttled the request.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Detail reported by the collaborator.
        message: String,
    },

    /// The requested entity does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// Detail reported by the collaborator.
        message: String,
    },

    /// The collaborator rejected the request.
    #[error("rejected: {message}")]
    Rejected {
        /// Detail reported by the collaborator.
        message: String,
    },
}

impl ServiceError {
    /// Error code for this failure; `NotFound` and `Rejected` map to `fallback`.
    #[must_use]
    pub const fn code_or(&self, fallback: ErrorCode) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::ConnectionRefused { .. } => ErrorCode::ConnectionRefused,
            Self::Network { .. } => ErrorCode::NetworkError,
            Self::Unavailable { .. } => ErrorCode::ServiceUnavailable,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::NotFound { .. } | Self::Rejected { .. } => fallback,
        }
    }

    /// Convert into an [`ExecutionError`], classifying business rejections as `fallback`.
    #[must_use]
    pub fn into_execution_error(self, fallback: ErrorCode) -> ExecutionError {
        ExecutionError::new(self.code_or(fallback), self.to_string())
    }
}

impl From<ServiceError> for ExecutionError {
    fn from(err: ServiceError) -> Self {
        err.into_execution_error(ErrorCode::InvalidRequest)
    }
}
