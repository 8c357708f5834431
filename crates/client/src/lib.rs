//! Brickyard storefront client library.
//!
//! Talks to the storefront REST API through an [`ApiClient`](http::ApiClient)
//! that falls back across several origins, and keeps the signed-in user's
//! favorites and cart in sync with the server.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod config;
pub mod favorites;
pub mod http;
pub mod notify;
pub mod session;
pub mod state;
pub mod storage;
pub mod types;

pub use cart::{CartError, CartState, CartStore};
pub use config::{ClientConfig, ConfigError};
pub use favorites::{FavoritesError, FavoritesState, FavoritesStore};
pub use http::{ApiClient, ApiError, ApiRequest, BaseUrls, ErrorKind};
pub use notify::{Notifier, Toast, ToastLevel, TracingNotifier};
pub use session::{AuthSession, SessionError, SessionState};
pub use state::{AppState, BackgroundTasks};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError, TokenStore};
