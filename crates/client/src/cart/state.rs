//! Cart state published by [`CartStore`](super::CartStore).

use std::collections::HashMap;

use brickyard_core::{Price, ProductId};
use tracing::warn;

use crate::types::{CartLine, CartPayload};

/// Load phase of the cart cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CartPhase {
    #[default]
    Uninitialized,
    Loading,
    Ready,
}

/// Snapshot of the user's cart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartState {
    pub lines: Vec<CartLine>,
    /// Products with a mutation in flight, keyed to the claim that marked
    /// them.
    pub pending_ids: HashMap<ProductId, u64>,
    /// Claim of the clear-cart request in flight.
    pub clearing: Option<u64>,
    pub initialized: bool,
    pub phase: CartPhase,
    /// Session epoch the cached lines belong to.
    pub(crate) epoch: Option<u64>,
}

impl CartState {
    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }

    #[must_use]
    pub fn subtotal(&self) -> Price {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    #[must_use]
    pub fn quantity_of(&self, id: &str) -> u32 {
        self.lines
            .iter()
            .find(|line| line.product.id.as_str() == id)
            .map_or(0, |line| line.quantity)
    }

    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool {
        self.clearing.is_some() || self.pending_ids.contains_key(id)
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.clearing.is_some() || !self.pending_ids.is_empty()
    }

    pub(crate) fn begin_load(&mut self, epoch: u64) {
        self.phase = CartPhase::Loading;
        self.epoch = Some(epoch);
    }

    /// Replace the lines with a server snapshot.
    ///
    /// Lines for the same product are merged and zero-quantity lines dropped.
    pub(crate) fn replace(&mut self, payload: CartPayload, epoch: u64) {
        let mut lines: Vec<CartLine> = Vec::with_capacity(payload.items.len());
        for line in payload.items.into_iter().filter(|line| line.quantity > 0) {
            match lines.iter_mut().find(|l| l.product.id == line.product.id) {
                Some(existing) => {
                    warn!(
                        product_id = %line.product.id,
                        "Cart contains duplicate lines; merging"
                    );
                    existing.quantity = existing.quantity.saturating_add(line.quantity);
                }
                None => lines.push(line),
            }
        }

        self.lines = lines;
        self.initialized = true;
        self.phase = CartPhase::Ready;
        self.epoch = Some(epoch);
    }

    pub(crate) fn clear_after_failure(&mut self, epoch: u64) {
        self.lines.clear();
        self.initialized = true;
        self.phase = CartPhase::Ready;
        self.epoch = Some(epoch);
    }

    /// Drop lines cached for a session other than `epoch`. Claims are kept.
    ///
    /// Returns whether anything changed.
    pub(crate) fn forget_stale(&mut self, epoch: u64) -> bool {
        if self.epoch.is_none_or(|owner| owner == epoch) {
            return false;
        }
        self.lines.clear();
        self.initialized = false;
        self.phase = CartPhase::Uninitialized;
        self.epoch = None;
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload(value: serde_json::Value) -> CartPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_replace_merges_and_totals() {
        let cart = payload(json!({
            "items": [
                {"product": {"_id": "a", "name": "Castle", "price": 10}, "quantity": 2},
                {"product": {"_id": "b", "name": "Ship", "price": "5.50"}, "quantity": 1},
                {"product": {"_id": "a", "name": "Castle", "price": 10}, "quantity": 1},
                {"product": {"_id": "c", "name": "Gone", "price": 99}, "quantity": 0}
            ]
        }));
        let mut state = CartState::default();
        state.replace(cart, 1);

        assert_eq!(state.lines.len(), 2);
        assert_eq!(state.quantity_of("a"), 3);
        assert_eq!(state.quantity_of("c"), 0);
        assert_eq!(state.item_count(), 4);
        assert_eq!(state.subtotal(), Price::from_cents(3550));
        assert_eq!(state.phase, CartPhase::Ready);
    }

    #[test]
    fn test_clearing_marks_everything_pending() {
        let mut state = CartState::default();
        assert!(!state.is_busy());
        state.clearing = Some(7);
        assert!(state.is_pending("anything"));
        assert!(state.is_busy());
    }

    #[test]
    fn test_forget_stale_keeps_current_session_and_claims() {
        let cart = payload(json!({
            "items": [{"product": {"_id": "a", "name": "A", "price": 1}, "quantity": 1}]
        }));
        let mut state = CartState::default();
        state.replace(cart, 3);
        state.pending_ids.insert(ProductId::new("a"), 11);

        assert!(!state.forget_stale(3));
        assert_eq!(state.item_count(), 1);

        assert!(state.forget_stale(4));
        assert!(state.lines.is_empty());
        assert!(!state.initialized);
        assert_eq!(state.phase, CartPhase::Uninitialized);
        assert!(state.is_pending("a"));

        // Nothing cached any more.
        assert!(!state.forget_stale(5));
    }

    #[test]
    fn test_clear_after_failure() {
        let cart = payload(json!({
            "items": [{"product": {"_id": "a", "name": "A", "price": 1}, "quantity": 1}]
        }));
        let mut state = CartState::default();
        state.replace(cart, 1);
        state.clear_after_failure(1);
        assert!(state.lines.is_empty());
        assert!(state.initialized);
        assert_eq!(state.subtotal(), Price::ZERO);
    }
}
