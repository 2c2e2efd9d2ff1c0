//! Order side (buy or sell).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy order; debits the requester's balance.
    Buy,
    /// Sell order; credits the requester's balance.
    Sell,
}

impl OrderSide {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// Whether the order spends funds and therefore needs a balance check.
    #[must_use]
    pub const fn requires_funds(&self) -> bool {
        matches!(self, Self::Buy)
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_side_serde() {
        let json = serde_json::to_string(&OrderSide::Buy).unwrap();
        assert_eq!(json, "\"buy\"");

        let parsed: OrderSide = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(parsed, OrderSide::Sell);
    }

    #[test]
    fn only_buys_require_funds() {
        assert!(OrderSide::Buy.requires_funds());
        assert!(!OrderSide::Sell.requires_funds());
    }
}
