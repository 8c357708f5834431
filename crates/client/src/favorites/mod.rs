//! Favorites synchronized with the storefront backend.
//!
//! # Architecture
//!
//! - The backend is the only source of truth: every successful fetch or
//!   mutation replaces the local cache with the snapshot the server returns
//! - State is published through a `tokio::sync::watch` channel so views can
//!   re-render (and disable controls for pending ids) on every change
//! - Mutations are keyed by product id: a second request for an id already
//!   in flight joins it (same direction) or waits for it (opposite
//!   direction), so the store never issues overlapping requests for one id
//! - Each request is tagged with the session epoch; results that arrive
//!   after the signed-in user changed are dropped
//!
//! # Example
//!
//! ```rust,ignore
//! let favorites = FavoritesStore::new(session.clone());
//! let _sync = favorites.spawn_session_sync();
//!
//! let now_favorite = favorites.toggle_favorite(&ProductId::new("75192")).await?;
//! ```

mod state;

pub use state::{FavoritesPhase, FavoritesState};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use brickyard_core::ProductId;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::http::{ApiError, ApiRequest, ErrorKind};
use crate::notify::Toast;
use crate::session::AuthSession;
use crate::types::FavoritesPayload;

/// Favorites collection endpoint.
pub const FAVORITES_PATH: &str = "/api/favorites";

/// Errors from favorites operations.
///
/// Cloneable so that callers joining one in-flight request share its result.
#[derive(Debug, Clone, Error)]
pub enum FavoritesError {
    /// No user is signed in; nothing was sent.
    #[error("Please log in to manage your favorites")]
    Unauthenticated,

    /// The signed-in user changed before the response arrived; the response
    /// was discarded.
    #[error("the session changed before the favorites request completed")]
    StaleSession,

    /// The API call failed.
    #[error(transparent)]
    Api(Arc<ApiError>),

    /// The background request task did not complete.
    #[error("favorites request task failed: {0}")]
    Task(String),
}

impl From<ApiError> for FavoritesError {
    fn from(err: ApiError) -> Self {
        Self::Api(Arc::new(err))
    }
}

impl FavoritesError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::Api(err) => err.kind(),
            Self::StaleSession | Self::Task(_) => ErrorKind::Unknown,
        }
    }

    /// Toast for this error, if the user has not been told already.
    ///
    /// Server and connectivity failures are announced by the HTTP client;
    /// stale results are dropped silently.
    #[must_use]
    pub fn toast(&self) -> Option<Toast> {
        match self {
            Self::Unauthenticated => Some(Toast::warning(self.to_string())),
            Self::Api(err) => match err.as_ref() {
                ApiError::Status { .. } | ApiError::Unreachable { .. } => None,
                other => Some(Toast::error(other.to_string())),
            },
            Self::StaleSession => None,
            Self::Task(_) => Some(Toast::error(self.to_string())),
        }
    }
}

/// Direction of a favorites mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Add,
    Remove,
}

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Add,
    Remove,
    Toggle,
}

impl Intent {
    /// Whether an in-flight `change` already satisfies this intent.
    fn joins(self, change: Change) -> bool {
        matches!(
            (self, change),
            (Self::Toggle, _) | (Self::Add, Change::Add) | (Self::Remove, Change::Remove)
        )
    }

    fn resolve(self, currently_favorite: bool) -> Change {
        match self {
            Self::Add => Change::Add,
            Self::Remove => Change::Remove,
            Self::Toggle if currently_favorite => Change::Remove,
            Self::Toggle => Change::Add,
        }
    }
}

type SharedMutation = Shared<BoxFuture<'static, Result<bool, FavoritesError>>>;

enum Claim {
    Started(SharedMutation),
    Joined(SharedMutation),
    Blocked(SharedMutation),
}

struct InFlight {
    change: Change,
    generation: u64,
    result: SharedMutation,
}

/// Client-side cache of the signed-in user's favorites.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FavoritesStore {
    inner: Arc<FavoritesStoreInner>,
}

struct FavoritesStoreInner {
    session: AuthSession,
    state: watch::Sender<FavoritesState>,
    in_flight: Mutex<HashMap<ProductId, InFlight>>,
    next_generation: AtomicU64,
}

impl FavoritesStore {
    #[must_use]
    pub fn new(session: AuthSession) -> Self {
        let (state, _) = watch::channel(FavoritesState::default());
        Self {
            inner: Arc::new(FavoritesStoreInner {
                session,
                state,
                in_flight: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Receive every future state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<FavoritesState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> FavoritesState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn is_favorite(&self, id: &ProductId) -> bool {
        self.inner.state.borrow().is_favorite(id.as_str())
    }

    /// Whether a mutation for `id` is in flight; views disable the control
    /// for `id` while this holds.
    #[must_use]
    pub fn is_pending(&self, id: &ProductId) -> bool {
        self.inner.state.borrow().is_pending(id.as_str())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.state.borrow().initialized
    }

    /// Re-fetch the full list for the signed-in user.
    ///
    /// With nobody signed in the cache is reset and nothing is fetched. A
    /// failed fetch leaves an empty, initialized cache.
    ///
    /// # Errors
    ///
    /// Returns the API error on failure, or `StaleSession` if the user changed
    /// while the fetch was in flight. The result is then discarded, along with
    /// any list still cached for an earlier session.
    #[instrument(skip(self))]
    pub async fn refresh_favorites(&self) -> Result<(), FavoritesError> {
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
            return Err(FavoritesError::StaleSession);
        }

        let result = self
            .inner
            .session
            .api()
            .get::<FavoritesPayload>(FAVORITES_PATH)
            .await;

        let (payload, failure) = match result {
            Ok(payload) => (Some(payload), None),
            Err(err) => (None, Some(FavoritesError::from(err))),
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
            debug!("Discarding favorites fetched for a previous session");
            return Err(FavoritesError::StaleSession);
        }
        match failure {
            Some(err) => {
                warn!(error = %err, "Failed to load favorites");
                Err(err)
            }
            None => {
                let count = self.inner.state.borrow().favorites.len();
                debug!(count, "Favorites loaded");
                Ok(())
            }
        }
    }

    /// Add a product to the favorites.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` without contacting the server if nobody is
    /// signed in; otherwise the API error, or `StaleSession`.
    pub async fn add_favorite(&self, id: &ProductId) -> Result<(), FavoritesError> {
        self.mutate(id, Intent::Add).await.map(|_| ())
    }

    /// Remove a product from the favorites.
    ///
    /// # Errors
    ///
    /// Same as [`FavoritesStore::add_favorite`].
    pub async fn remove_favorite(&self, id: &ProductId) -> Result<(), FavoritesError> {
        self.mutate(id, Intent::Remove).await.map(|_| ())
    }

    /// Add the product if it is not a favorite, remove it otherwise.
    ///
    /// Returns whether the product is a favorite afterwards.
    ///
    /// # Errors
    ///
    /// Same as [`FavoritesStore::add_favorite`].
    pub async fn toggle_favorite(&self, id: &ProductId) -> Result<bool, FavoritesError> {
        self.mutate(id, Intent::Toggle).await
    }

    /// Drop all cached data and detach in-flight requests.
    pub fn reset(&self) {
        self.lock_in_flight().clear();
        self.inner.state.send_replace(FavoritesState::default());
    }

    /// Follow the session: reset on every identity change, then load the new
    /// user's favorites (or stay empty when signed out).
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
                        if let Err(e) = store.refresh_favorites().await {
                            debug!(error = %e, "Favorites sync after session change failed");
                        }
                    });
                }
                if session.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    async fn mutate(&self, id: &ProductId, intent: Intent) -> Result<bool, FavoritesError> {
        loop {
            if self.inner.session.current_user().is_none() {
                return Err(FavoritesError::Unauthenticated);
            }

            match self.claim(id, intent) {
                Claim::Started(result) => return result.await,
                Claim::Joined(result) => {
                    debug!(product_id = %id, "Joining in-flight favorites request");
                    return result.await;
                }
                Claim::Blocked(blocking) => {
                    debug!(product_id = %id, "Waiting for opposite favorites request");
                    let _ = blocking.await;
                }
            }
        }
    }

    /// Join, wait for, or start the request for `id`.
    fn claim(&self, id: &ProductId, intent: Intent) -> Claim {
        let mut in_flight = self.lock_in_flight();
        if let Some(entry) = in_flight.get(id) {
            return if intent.joins(entry.change) {
                Claim::Joined(entry.result.clone())
            } else {
                Claim::Blocked(entry.result.clone())
            };
        }

        let change = intent.resolve(self.is_favorite(id));
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let result = self.start(id.clone(), change, generation);
        in_flight.insert(
            id.clone(),
            InFlight {
                change,
                generation,
                result: result.clone(),
            },
        );
        Claim::Started(result)
    }

    /// Mark `id` pending and run the mutation on its own task, so it settles
    /// even if every caller stops waiting.
    fn start(&self, id: ProductId, change: Change, generation: u64) -> SharedMutation {
        let epoch = self.inner.session.epoch();
        self.inner.state.send_modify(|state| {
            state.pending_ids.insert(id.clone());
        });

        let store = self.clone();
        let task = tokio::spawn(async move {
            let _settle = SettleGuard {
                store: store.clone(),
                id: id.clone(),
                generation,
            };
            store.request(&id, change, epoch).await
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(FavoritesError::Task(e.to_string())))
        }
        .boxed()
        .shared()
    }

    #[instrument(skip(self, id), fields(product_id = %id))]
    async fn request(
        &self,
        id: &ProductId,
        change: Change,
        epoch: u64,
    ) -> Result<bool, FavoritesError> {
        let api = self.inner.session.api();
        let path = format!("{FAVORITES_PATH}/{id}");
        let payload: FavoritesPayload = match change {
            Change::Add => api.send(ApiRequest::post(path)).await?,
            Change::Remove => api.delete(&path).await?,
        };

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
            info!("Discarding favorites update for a previous session");
            return Err(FavoritesError::StaleSession);
        }

        let favorite = self.is_favorite(id);
        debug!(favorite, "Favorites updated");
        Ok(favorite)
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<ProductId, InFlight>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the pending marker and registry entry when a mutation task ends,
/// however it ends.
struct SettleGuard {
    store: FavoritesStore,
    id: ProductId,
    generation: u64,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        let still_busy = {
            let mut in_flight = self.store.lock_in_flight();
            if in_flight
                .get(&self.id)
                .is_some_and(|entry| entry.generation == self.generation)
            {
                in_flight.remove(&self.id);
            }
            in_flight.contains_key(&self.id)
        };
        if !still_busy {
            self.store.inner.state.send_if_modified(|state| {
                state.pending_ids.remove(&self.id)
            });
        }
    }
}
