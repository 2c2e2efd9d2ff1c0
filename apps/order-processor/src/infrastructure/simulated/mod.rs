//! In-memory collaborators.
//!
//! Stand-ins for the requester, balance, pricing and holdings services.
//! Each supports injected latency and a queue of injected failures, so they
//! double as test fakes.

mod balances;
mod portfolio;
mod price_feed;
mod users;

pub use balances::{LedgerEntry, SimulatedBalanceLedger};
pub use portfolio::SimulatedPortfolio;
pub use price_feed::SimulatedPriceFeed;
pub use users::SimulatedUserDirectory;

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::application::ports::ServiceError;

/// Latency and failure injection shared by the simulated services.
#[derive(Debug, Default)]
pub(crate) struct Faults {
    latency: Mutex<Option<Duration>>,
    failures: Mutex<VecDeque<ServiceError>>,
    calls: Mutex<u64>,
}

impl Faults {
    pub(crate) fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub(crate) fn push_failure(&self, error: ServiceError) {
        self.failures.lock().push_back(error);
    }

    pub(crate) fn calls(&self) -> u64 {
        *self.calls.lock()
    }

    /// Count the call, sleep for the injected latency, then pop the next
    /// injected failure.
    pub(crate) async fn before_call(&self) -> Result<(), ServiceError> {
        *self.calls.lock() += 1;
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.failures.lock().pop_front().map_or(Ok(()), Err)
    }
}
