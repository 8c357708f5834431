//! Favorites state published by [`FavoritesStore`](super::FavoritesStore).

use std::collections::HashSet;

use brickyard_core::ProductId;
use tracing::warn;

use crate::types::{FavoriteProduct, FavoritesPayload};

/// Load phase of the favorites cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FavoritesPhase {
    /// No session, or the session has not booted.
    #[default]
    Uninitialized,
    /// A full fetch is in flight.
    Loading,
    /// The cache reflects the last server answer (possibly empty after a
    /// failed fetch).
    Ready,
}

/// Snapshot of the user's favorites.
///
/// `favorite_ids` always equals the ids in `favorites`; `favorites` never
/// holds two products with the same id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FavoritesState {
    pub favorites: Vec<FavoriteProduct>,
    pub favorite_ids: HashSet<ProductId>,
    /// Ids with a mutation in flight.
    pub pending_ids: HashSet<ProductId>,
    /// True once the first load attempt for this session has finished.
    pub initialized: bool,
    pub phase: FavoritesPhase,
    /// Session epoch the cached list belongs to.
    pub(crate) epoch: Option<u64>,
}

impl FavoritesState {
    #[must_use]
    pub fn is_favorite(&self, id: &str) -> bool {
        self.favorite_ids.contains(id)
    }

    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending_ids.contains(id)
    }

    /// True only when the list is known to be empty, as opposed to not
    /// loaded yet.
    #[must_use]
    pub fn is_confirmed_empty(&self) -> bool {
        self.initialized && self.favorites.is_empty()
    }

    pub(crate) fn begin_load(&mut self, epoch: u64) {
        self.phase = FavoritesPhase::Loading;
        self.epoch = Some(epoch);
    }

    /// Replace the cache with a server snapshot for session `epoch`.
    pub(crate) fn replace(&mut self, payload: FavoritesPayload, epoch: u64) {
        let mut ids = HashSet::with_capacity(payload.favorites.len());
        let favorites: Vec<FavoriteProduct> = payload
            .favorites
            .into_iter()
            .filter(|product| ids.insert(product.id.clone()))
            .collect();

        if let Some(reported) = payload.favorite_ids
            && (reported.len() != ids.len() || reported.iter().any(|id| !ids.contains(id)))
        {
            warn!(
                listed = ids.len(),
                reported = reported.len(),
                "favoriteIds disagrees with favorites; using the list"
            );
        }

        self.favorites = favorites;
        self.favorite_ids = ids;
        self.initialized = true;
        self.phase = FavoritesPhase::Ready;
        self.epoch = Some(epoch);
    }

    /// Record a failed load: confirmed empty rather than still loading.
    pub(crate) fn clear_after_failure(&mut self, epoch: u64) {
        self.favorites.clear();
        self.favorite_ids.clear();
        self.initialized = true;
        self.phase = FavoritesPhase::Ready;
        self.epoch = Some(epoch);
    }

    /// Drop a list cached for a session other than `epoch`. Pending ids are
    /// kept.
    ///
    /// Returns whether anything changed.
    pub(crate) fn forget_stale(&mut self, epoch: u64) -> bool {
        if self.epoch.is_none_or(|owner| owner == epoch) {
            return false;
        }
        self.favorites.clear();
        self.favorite_ids.clear();
        self.initialized = false;
        self.phase = FavoritesPhase::Uninitialized;
        self.epoch = None;
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload(value: serde_json::Value) -> FavoritesPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_replace_dedupes_and_derives_ids() {
        let list = payload(json!({
            "favorites": [
                {"_id": "a", "name": "First"},
                {"_id": "b", "name": "Second"},
                {"_id": "a", "name": "Duplicate"}
            ],
            "favoriteIds": ["a", "b"]
        }));
        let mut state = FavoritesState::default();
        state.replace(list, 1);

        assert_eq!(state.favorites.len(), 2);
        assert_eq!(state.favorites[0].name, "First");
        assert!(state.is_favorite("a"));
        assert!(state.is_favorite("b"));
        assert!(state.initialized);
        assert_eq!(state.phase, FavoritesPhase::Ready);
    }

    #[test]
    fn test_replace_trusts_list_over_reported_ids() {
        let list = payload(json!({
            "favorites": [{"_id": "a", "name": "A"}],
            "favoriteIds": ["a", "ghost"]
        }));
        let mut state = FavoritesState::default();
        state.replace(list, 1);
        assert!(!state.is_favorite("ghost"));
        assert_eq!(state.favorite_ids.len(), 1);
    }

    #[test]
    fn test_replace_keeps_pending() {
        let mut state = FavoritesState::default();
        state.pending_ids.insert(ProductId::new("x"));
        state.replace(payload(json!({"favorites": []})), 1);
        assert!(state.is_pending("x"));
        assert!(state.is_confirmed_empty());
    }

    #[test]
    fn test_clear_after_failure_is_initialized() {
        let mut state = FavoritesState::default();
        state.replace(payload(json!({"favorites": [{"_id": "a", "name": "A"}]})), 1);
        state.clear_after_failure(1);
        assert!(state.favorites.is_empty());
        assert!(state.favorite_ids.is_empty());
        assert!(state.is_confirmed_empty());
    }

    #[test]
    fn test_forget_stale_only_drops_other_sessions() {
        let mut state = FavoritesState::default();
        state.pending_ids.insert(ProductId::new("b"));
        state.replace(payload(json!({"favorites": [{"_id": "a", "name": "A"}]})), 2);

        assert!(!state.forget_stale(2));
        assert!(state.is_favorite("a"));

        assert!(state.forget_stale(3));
        assert!(state.favorites.is_empty());
        assert!(!state.is_favorite("a"));
        assert!(!state.initialized);
        assert_eq!(state.phase, FavoritesPhase::Uninitialized);
        assert!(state.is_pending("b"));
    }

    #[test]
    fn test_default_is_not_confirmed_empty() {
        let state = FavoritesState::default();
        assert!(!state.is_confirmed_empty());
        assert_eq!(state.phase, FavoritesPhase::Uninitialized);
    }
}
