//! Symbol value object for tradeable assets.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::shared::DomainError;

/// Maximum symbol length accepted by validation.
const MAX_SYMBOL_LEN: usize = 20;

/// A trading symbol such as `BTC` or `ETH-USD`.
///
/// Normalized to uppercase on construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new Symbol.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_uppercase())
    }

    /// Get the symbol string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate the symbol format.
    ///
    /// # Errors
    ///
    /// Returns error if the symbol is empty, too long, or contains characters
    /// other than ASCII letters, digits, `-`, `/` and `.`.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.0.is_empty() {
            return Err(DomainError::invalid("symbol", "symbol cannot be empty"));
        }
        if self.0.len() > MAX_SYMBOL_LEN {
            return Err(DomainError::invalid(
                "symbol",
                format!("symbol longer than {MAX_SYMBOL_LEN} characters"),
            ));
        }
        if !self
            .0
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '/' | '.'))
        {
            return Err(DomainError::invalid(
                "symbol",
                format!("symbol '{}' contains invalid characters", self.0),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_is_uppercased() {
        assert_eq!(Symbol::new(" btc ").as_str(), "BTC");
    }

    #[test]
    fn symbol_validation() {
        assert!(Symbol::new("BTC").validate().is_ok());
        assert!(Symbol::new("ETH-USD").validate().is_ok());
        assert!(Symbol::new("").validate().is_err());
        assert!(Symbol::new("BTC USD").validate().is_err());
        assert!(Symbol::new("A".repeat(21)).validate().is_err());
    }
}
