//! Shopping cart synchronized with the storefront backend.
//!
//! Follows the same rules as [`FavoritesStore`](crate::favorites::FavoritesStore):
//! the server snapshot returned by each call replaces the local cache, the
//! products being changed are published as pending, and results that arrive
//! after the signed-in user changed are dropped.
//!
//! Quantity changes are not idempotent, so a second mutation for a product
//! that is already in flight is rejected with [`CartError::Busy`] instead of
//! being merged into the first.

mod state;

pub use state::{CartPhase, CartState};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use brickyard_core::{Price, ProductId};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::http::{ApiError, ApiRequest, ErrorKind};
use crate::notify::Toast;
use crate::session::AuthSession;
use crate::types::CartPayload;

/// Cart collection endpoint.
pub const CART_PATH: &str = "/api/cart";

/// Errors from cart operations.
#[derive(Debug, Clone, Error)]
pub enum CartError {
    #[error("Please log in to manage your cart")]
    Unauthenticated,

    #[error("the session changed before the cart request completed")]
    StaleSession,

    /// A mutation for this product (or a clear) is already in flight.
    #[error("the cart is still updating {0}")]
    Busy(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Api(Arc<ApiError>),

    #[error("cart request task failed: {0}")]
    Task(String),
}

impl From<ApiError> for CartError {
    fn from(err: ApiError) -> Self {
        Self::Api(Arc::new(err))
    }
}

impl CartError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Api(err) => err.kind(),
            Self::StaleSession | Self::Busy(_) | Self::Task(_) => ErrorKind::Unknown,
        }
    }

    /// Toast for this error, if the user has not been told already.
    #[must_use]
    pub fn toast(&self) -> Option<Toast> {
        match self {
            Self::Unauthenticated | Self::Validation(_) => Some(Toast::warning(self.to_string())),
            Self::Busy(_) => Some(Toast::info(self.to_string())),
            Self::Api(err) => match err.as_ref() {
                ApiError::Status { .. } | ApiError::Unreachable { .. } => None,
                other => Some(Toast::error(other.to_string())),
            },
            Self::StaleSession => None,
            Self::Task(_) => Some(Toast::error(self.to_string())),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddItemBody<'a> {
    product_id: &'a str,
    quantity: u32,
}

#[derive(Serialize)]
struct QuantityBody {
    quantity: u32,
}

/// What a mutation claims while it is in flight.
#[derive(Debug, Clone)]
enum Target {
    Product(ProductId),
    Everything,
}

/// Client-side cache of the signed-in user's cart.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CartStore {
    inner: Arc<CartStoreInner>,
}

struct CartStoreInner {
    session: AuthSession,
    state: watch::Sender<CartState>,
    next_claim: AtomicU64,
}

impl CartStore {
    #[must_use]
    pub fn new(session: AuthSession) -> Self {
        let (state, _) = watch::channel(CartState::default());
        Self {
            inner: Arc::new(CartStoreInner {
                session,
                state,
                next_claim: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> CartState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.inner.state.borrow().item_count()
    }

    #[must_use]
    pub fn subtotal(&self) -> Price {
        self.inner.state.borrow().subtotal()
    }

    #[must_use]
    pub fn is_pending(&self, id: &ProductId) -> bool {
        self.inner.state.borrow().is_pending(id.as_str())
    }

    /// Re-fetch the cart for the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns the API error on failure (the cache is then left empty and
    /// initialized), or `StaleSession` if the user changed mid-flight. A
    /// stale result also drops lines still cached for an earlier session.
    #[instrument(skip(self))]
    pub async fn refresh_cart(&self) -> Result<(), CartError> {
        let session = &self.inner.session;
        let epoch = session.epoch();
        if session.current_user().is_none() {
            self.reset();
            return Ok(());
        }

        let loading = self.inner.state.send_if_modified(|state| {
            if session.epoch() != epoch {
                return false;
            }
            state.begin_load(epoch);
            true
        });
        if !loading {
            return Err(CartError::StaleSession);
        }

        let result = session.api().get::<CartPayload>(CART_PATH).await;
        let (payload, failure) = match result {
            Ok(payload) => (Some(payload), None),
            Err(err) => (None, Some(CartError::from(err))),
        };

        let mut applied = false;
        self.inner.state.send_if_modified(|state| {
            let current = session.epoch();
            if current != epoch {
                return state.forget_stale(current);
            }
            match payload {
                Some(payload) => state.replace(payload, epoch),
                None => state.clear_after_failure(epoch),
            }
            applied = true;
            true
        });

        if !applied {
            debug!("Discarding cart fetched for a previous session");
            return Err(CartError::StaleSession);
        }
        failure.map_or(Ok(()), |err| {
            warn!(error = %err, "Failed to load cart");
            Err(err)
        })
    }

    /// Add `quantity` units of a product.
    ///
    /// # Errors
    ///
    /// `Validation` for a zero quantity, `Unauthenticated` without a user,
    /// `Busy` if the product is already being updated, otherwise the API
    /// error or `StaleSession`.
    pub async fn add_item(&self, id: &ProductId, quantity: u32) -> Result<(), CartError> {
        if quantity == 0 {
            return Err(CartError::Validation(
                "Quantity must be at least 1".to_owned(),
            ));
        }
        let request = ApiRequest::post(CART_PATH).json(&AddItemBody {
            product_id: id.as_str(),
            quantity,
        })?;
        self.mutate(Target::Product(id.clone()), request).await
    }

    /// Set the quantity of a line; zero removes it.
    ///
    /// # Errors
    ///
    /// Same as [`CartStore::add_item`], except that zero is allowed.
    pub async fn update_quantity(&self, id: &ProductId, quantity: u32) -> Result<(), CartError> {
        let path = format!("{CART_PATH}/{id}");
        let request = if quantity == 0 {
            ApiRequest::delete(path)
        } else {
            ApiRequest::put(path).json(&QuantityBody { quantity })?
        };
        self.mutate(Target::Product(id.clone()), request).await
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Same as [`CartStore::add_item`].
    pub async fn remove_item(&self, id: &ProductId) -> Result<(), CartError> {
        let request = ApiRequest::delete(format!("{CART_PATH}/{id}"));
        self.mutate(Target::Product(id.clone()), request).await
    }

    /// Empty the cart.
    ///
    /// # Errors
    ///
    /// `Busy` while any other cart mutation is in flight; otherwise as
    /// [`CartStore::add_item`].
    pub async fn clear(&self) -> Result<(), CartError> {
        self.mutate(Target::Everything, ApiRequest::delete(CART_PATH)).await
    }

    /// Drop all cached data.
    pub fn reset(&self) {
        self.inner.state.send_replace(CartState::default());
    }

    /// Follow the session: reset on every identity change, then load the new
    /// user's cart.
    #[must_use]
    pub fn spawn_session_sync(&self) -> JoinHandle<()> {
        let store = self.clone();
        let mut session = self.inner.session.subscribe();
        tokio::spawn(async move {
            let mut synced_epoch = None;
            loop {
                let (booted, epoch) = {
                    let state = session.borrow_and_update();
                    (state.booted, state.epoch)
                };
                if booted && synced_epoch != Some(epoch) {
                    synced_epoch = Some(epoch);
                    store.reset();
                    let store = store.clone();
                    tokio::spawn(async move {
                        if let Err(e) = store.refresh_cart().await {
                            debug!(error = %e, "Cart sync after session change failed");
                        }
                    });
                }
                if session.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    async fn mutate(&self, target: Target, request: ApiRequest) -> Result<(), CartError> {
        if self.inner.session.current_user().is_none() {
            return Err(CartError::Unauthenticated);
        }
        let claim = self.claim(&target)?;
        let release = Release {
            store: self.clone(),
            target,
            claim,
        };

        let store = self.clone();
        let epoch = self.inner.session.epoch();
        let task = tokio::spawn(async move {
            let _release = release;
            store.request(request, epoch).await
        });
        task.await
            .unwrap_or_else(|e| Err(CartError::Task(e.to_string())))
    }

    /// Mark `target` pending under a fresh claim number, or report what is in
    /// the way.
    fn claim(&self, target: &Target) -> Result<u64, CartError> {
        let claim = self.inner.next_claim.fetch_add(1, Ordering::Relaxed);
        let mut conflict = None;
        self.inner.state.send_if_modified(|state| match target {
            Target::Product(id) if state.is_pending(id.as_str()) => {
                conflict = Some(CartError::Busy(id.to_string()));
                false
            }
            Target::Product(id) => {
                state.pending_ids.insert(id.clone(), claim);
                true
            }
            Target::Everything if state.is_busy() => {
                conflict = Some(CartError::Busy("the cart".to_owned()));
                false
            }
            Target::Everything => {
                state.clearing = Some(claim);
                true
            }
        });
        conflict.map_or(Ok(claim), Err)
    }

    #[instrument(skip_all, fields(method = %request.method(), path = request.path()))]
    async fn request(&self, request: ApiRequest, epoch: u64) -> Result<(), CartError> {
        let payload: CartPayload = self.inner.session.api().send(request).await?;

        let session = &self.inner.session;
        let mut applied = false;
        self.inner.state.send_if_modified(|state| {
            let current = session.epoch();
            if current != epoch {
                return state.forget_stale(current);
            }
            state.replace(payload, epoch);
            applied = true;
            true
        });
        if !applied {
            info!("Discarding cart update for a previous session");
            return Err(CartError::StaleSession);
        }
        debug!(items = self.item_count(), "Cart updated");
        Ok(())
    }
}

/// Releases a claimed target when its mutation task ends.
///
/// Only the claim it was created for: after a reset the same product may
/// already be claimed again by a newer mutation.
struct Release {
    store: CartStore,
    target: Target,
    claim: u64,
}

impl Drop for Release {
    fn drop(&mut self) {
        let claim = self.claim;
        self.store
            .inner
            .state
            .send_if_modified(|state| match &self.target {
                Target::Product(id) => {
                    let owned = state.pending_ids.get(id) == Some(&claim);
                    if owned {
                        state.pending_ids.remove(id);
                    }
                    owned
                }
                Target::Everything => {
                    let owned = state.clearing == Some(claim);
                    if owned {
                        state.clearing = None;
                    }
                    owned
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_item_body_shape() {
        let body = serde_json::to_value(AddItemBody {
            product_id: "p1",
            quantity: 2,
        });
        assert_eq!(
            body.ok(),
            Some(serde_json::json!({"productId": "p1", "quantity": 2}))
        );
    }

    #[test]
    fn test_error_kinds_and_toasts() {
        let busy = CartError::Busy("p1".to_owned());
        assert_eq!(busy.kind(), ErrorKind::Unknown);
        assert_eq!(
            busy.toast(),
            Some(Toast::info("the cart is still updating p1"))
        );

        let invalid = CartError::Validation("Quantity must be at least 1".to_owned());
        assert_eq!(invalid.kind(), ErrorKind::Validation);
        assert!(invalid.toast().is_some());

        assert_eq!(CartError::StaleSession.toast(), None);
        assert_eq!(CartError::Unauthenticated.kind(), ErrorKind::Unauthenticated);
    }
}
