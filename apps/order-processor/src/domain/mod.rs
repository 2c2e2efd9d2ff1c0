//! Domain Layer
//!
//! Core business types with no infrastructure dependencies.
//!
//! - `shared`: identifiers, symbols and timestamps used across the crate
//! - `order`: the Order aggregate, its lifecycle events and repository port
//! - `pricing`: slippage, fee and settlement arithmetic

pub mod order;
pub mod pricing;
pub mod shared;
