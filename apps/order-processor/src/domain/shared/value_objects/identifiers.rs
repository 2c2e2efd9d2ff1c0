//! Typed identifiers.
//!
//! Each kind carries its own prefix when generated (`ord_…`, `msg_…`), so a
//! transaction id pasted where an order id belongs is visible in logs even
//! though both are plain strings on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident, $prefix:literal, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Prefix used by [`Self::generate`].
            pub const PREFIX: &'static str = $prefix;

            /// Wrap an existing identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Fresh random identifier, `<prefix>_<uuid v4 simple>`.
            #[must_use]
            pub fn generate() -> Self {
                Self(format!("{}_{}", Self::PREFIX, uuid::Uuid::new_v4().simple()))
            }

            /// The identifier text.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

define_id!(OrderId, "ord", "Order identifier, assigned at creation.");
define_id!(UserId, "usr", "Requester that owns an order.");
define_id!(
    TransactionId,
    "txn",
    "Receipt for a balance transaction applied by the balance authority."
);
define_id!(MessageId, "msg", "Event message identifier; consumers dedupe on it.");
