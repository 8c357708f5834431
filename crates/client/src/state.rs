//! Client state shared by every view of the storefront.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::cart::CartStore;
use crate::config::ClientConfig;
use crate::favorites::FavoritesStore;
use crate::http::{ApiClient, ApiError};
use crate::notify::Notifier;
use crate::session::AuthSession;
use crate::storage::{FileStore, TokenStore};

/// The wired-up client: API transport, session and synchronized stores.
///
/// This struct is cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ClientConfig,
    session: AuthSession,
    favorites: FavoritesStore,
    cart: CartStore,
}

/// Background tasks started by [`AppState::start`].
///
/// Dropping the handles leaves the tasks running; call [`BackgroundTasks::abort`]
/// to stop them.
#[derive(Debug)]
pub struct BackgroundTasks {
    pub expiry_watch: JoinHandle<()>,
    pub favorites_sync: JoinHandle<()>,
    pub cart_sync: JoinHandle<()>,
}

impl BackgroundTasks {
    pub fn abort(&self) {
        self.expiry_watch.abort();
        self.favorites_sync.abort();
        self.cart_sync.abort();
    }
}

impl AppState {
    /// Build the client, persisting the session token in
    /// `config.session_file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ClientConfig, notifier: Arc<dyn Notifier>) -> Result<Self, ApiError> {
        let tokens = TokenStore::new(Arc::new(FileStore::new(config.session_file.clone())));
        Self::with_tokens(config, tokens, notifier)
    }

    /// Build the client with a caller-provided token store.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_tokens(
        config: ClientConfig,
        tokens: TokenStore,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ApiError> {
        let api = ApiClient::new(&config, tokens, notifier)?;
        let session = AuthSession::new(api);
        let favorites = FavoritesStore::new(session.clone());
        let cart = CartStore::new(session.clone());

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                session,
                favorites,
                cart,
            }),
        })
    }

    /// Start the store sync tasks and the expiry watch, then boot the
    /// session from the stored token.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(&self) -> BackgroundTasks {
        let tasks = BackgroundTasks {
            favorites_sync: self.inner.favorites.spawn_session_sync(),
            cart_sync: self.inner.cart.spawn_session_sync(),
            expiry_watch: self
                .inner
                .session
                .spawn_expiry_watch(self.inner.config.token_check_interval),
        };
        self.inner.session.bootstrap();
        tasks
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn api(&self) -> &ApiClient {
        self.inner.session.api()
    }

    #[must_use]
    pub fn session(&self) -> &AuthSession {
        &self.inner.session
    }

    #[must_use]
    pub fn favorites(&self) -> &FavoritesStore {
        &self.inner.favorites
    }

    #[must_use]
    pub fn cart(&self) -> &CartStore {
        &self.inner.cart
    }
}
