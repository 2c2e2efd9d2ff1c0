//! User Validation Port (Driven Port)
//!
//! Verifies that a requester is active and allowed to trade.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ServiceError;
use crate::domain::shared::UserId;

/// Outcome of a requester check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserValidation {
    /// Whether the requester may trade.
    pub valid: bool,
    /// Explanation when invalid.
    pub message: String,
}

impl UserValidation {
    /// A passing validation.
    #[must_use]
    pub fn valid() -> Self {
        Self {
            valid: true,
            message: String::new(),
        }
    }

    /// A failing validation.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// Port for the requester-validation service.
#[async_trait]
pub trait UserValidationPort: Send + Sync {
    /// Verify a requester.
    async fn verify(&self, user_id: &UserId) -> Result<UserValidation, ServiceError>;
}
