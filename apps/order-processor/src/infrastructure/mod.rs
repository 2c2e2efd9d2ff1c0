//! Infrastructure Layer
//!
//! Adapters implementing the application ports:
//!
//! - `messaging`: topic exchanges, publisher, consumer and in-process broker
//! - `persistence`: order repository
//! - `simulated`: in-memory requester directory, ledger, price feed and
//!   portfolio used by the binary and tests

pub mod messaging;
pub mod persistence;
pub mod simulated;
