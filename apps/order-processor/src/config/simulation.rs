//! Seed data for the in-memory collaborators the binary runs against.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::default_true;

/// Seed data for simulated users, balances and prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Requesters known to the user directory and ledger.
    #[serde(default = "default_users")]
    pub users: Vec<SimulatedUserConfig>,
    /// Quoted prices by symbol.
    #[serde(default = "default_prices")]
    pub prices: BTreeMap<String, Decimal>,
    /// Artificial latency added to every collaborator call (milliseconds).
    #[serde(default)]
    pub latency_ms: u64,
    /// Demo orders placed on startup.
    #[serde(default)]
    pub seed_orders: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            users: default_users(),
            prices: default_prices(),
            latency_ms: 0,
            seed_orders: 0,
        }
    }
}

/// One simulated requester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedUserConfig {
    /// User ID.
    pub id: String,
    /// Whether the account may trade.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Opening balance.
    #[serde(default)]
    pub balance: Decimal,
}

fn default_users() -> Vec<SimulatedUserConfig> {
    vec![SimulatedUserConfig {
        id: "demo-user".to_string(),
        active: true,
        balance: dec!(100000),
    }]
}

fn default_prices() -> BTreeMap<String, Decimal> {
    BTreeMap::from([
        ("BTC".to_string(), dec!(50000)),
        ("ETH".to_string(), dec!(3000)),
    ])
}
