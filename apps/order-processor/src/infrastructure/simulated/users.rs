//! Simulated requester directory.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::Faults;
use crate::application::ports::{ServiceError, UserValidation, UserValidationPort};
use crate::config::SimulationConfig;
use crate::domain::shared::UserId;

/// Known requesters and whether they are active.
#[derive(Debug, Default)]
pub struct SimulatedUserDirectory {
    users: RwLock<HashMap<UserId, bool>>,
    faults: Faults,
}

impl SimulatedUserDirectory {
    /// An empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from configuration.
    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        let directory = Self::new();
        for user in &config.users {
            directory.upsert(UserId::new(user.id.as_str()), user.active);
        }
        directory
    }

    /// Add an active or inactive requester.
    #[must_use]
    pub fn with_user(self, user_id: impl Into<String>, active: bool) -> Self {
        self.upsert(UserId::new(user_id), active);
        self
    }

    /// Add or replace a requester.
    pub fn upsert(&self, user_id: UserId, active: bool) {
        self.users.write().insert(user_id, active);
    }

    /// Delay every call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults.set_latency(latency);
    }

    /// Fail the next call with `error`.
    pub fn fail_next(&self, error: ServiceError) {
        self.faults.push_failure(error);
    }

    /// Number of verify calls.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.faults.calls()
    }
}

#[async_trait]
impl UserValidationPort for SimulatedUserDirectory {
    async fn verify(&self, user_id: &UserId) -> Result<UserValidation, ServiceError> {
        self.faults.before_call().await?;

        match self.users.read().get(user_id) {
            Some(true) => Ok(UserValidation::valid()),
            Some(false) => Ok(UserValidation::invalid(format!("user {user_id} is inactive"))),
            None => Err(ServiceError::NotFound {
                message: format!("user {user_id} not found"),
            }),
        }
    }
}
