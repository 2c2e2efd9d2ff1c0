//! Per-order exclusion between execution and cancellation.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::shared::OrderId;

/// Order ids currently being executed or cancelled in this process.
///
/// Execution holds its claim from the pending check until the outcome is
/// stored, so a cancel arriving in between is refused instead of racing the
/// balance transaction.
#[derive(Debug, Default)]
pub struct OrderClaims {
    held: Mutex<HashSet<OrderId>>,
}

impl OrderClaims {
    /// Empty registry, ready to share.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `order_id`; `None` when someone else holds it.
    #[must_use]
    pub fn try_claim(&self, order_id: &OrderId) -> Option<Claim<'_>> {
        self.held.lock().insert(order_id.clone()).then(|| Claim {
            claims: self,
            order_id: order_id.clone(),
        })
    }

    /// Whether `order_id` is claimed.
    #[must_use]
    pub fn is_claimed(&self, order_id: &OrderId) -> bool {
        self.held.lock().contains(order_id)
    }
}

/// Held claim, released on drop.
#[derive(Debug)]
pub struct Claim<'a> {
    claims: &'a OrderClaims,
    order_id: OrderId,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.claims.held.lock().remove(&self.order_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_refused_until_release() {
        let claims = OrderClaims::default();
        let id = OrderId::new("ord-1");

        let first = claims.try_claim(&id);
        assert!(first.is_some());
        assert!(claims.try_claim(&id).is_none());
        assert!(claims.is_claimed(&id));

        drop(first);
        assert!(!claims.is_claimed(&id));
        assert!(claims.try_claim(&id).is_some());
    }

    #[test]
    fn claims_are_per_order() {
        let claims = OrderClaims::default();
        let _a = claims.try_claim(&OrderId::new("a")).unwrap();
        assert!(claims.try_claim(&OrderId::new("b")).is_some());
    }
}
