//! Authenticated session: who is signed in, and since when.
//!
//! [`AuthSession`] is the identity provider the synchronized stores follow.
//! It publishes a [`SessionState`] through a `tokio::sync::watch` channel;
//! every change of signed-in user bumps the state's `epoch`, which the
//! stores use to drop results that belong to a previous session.

mod token;

pub use token::{TokenClaims, TokenError};

use std::sync::Arc;
use std::time::Duration;

use brickyard_core::Email;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::http::{ApiClient, ApiError};
use crate::notify::Toast;
use crate::storage::StorageError;
use crate::types::{AuthUser, LoginRequest, LoginResponse};

/// Login endpoint.
const LOGIN_PATH: &str = "/api/auth/login";

/// Message shown when the expiry watch ends a session.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The login request failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The token could not be persisted or removed.
    #[error("session storage error: {0}")]
    Storage(#[from] StorageError),

    /// The server issued a token the client cannot read.
    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenError),
}

/// Snapshot of the session published to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// True once the stored session has been inspected at startup.
    pub booted: bool,
    /// The signed-in user, if any.
    pub user: Option<AuthUser>,
    /// Incremented on every change of signed-in user.
    pub epoch: u64,
}

/// Identity provider backed by the stored bearer token.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AuthSession {
    inner: Arc<AuthSessionInner>,
}

struct AuthSessionInner {
    api: ApiClient,
    state: watch::Sender<SessionState>,
}

impl AuthSession {
    /// Create a session that has not booted yet.
    #[must_use]
    pub fn new(api: ApiClient) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(AuthSessionInner { api, state }),
        }
    }

    /// The API client this session authenticates.
    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    /// Receive every future state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn current_user(&self) -> Option<AuthUser> {
        self.inner.state.borrow().user.clone()
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.inner.state.borrow().epoch
    }

    #[must_use]
    pub fn is_booted(&self) -> bool {
        self.inner.state.borrow().booted
    }

    /// The stored bearer token.
    #[must_use]
    pub fn token(&self) -> Option<SecretString> {
        self.inner.api.tokens().token()
    }

    /// Inspect the stored token and publish the resulting identity.
    ///
    /// Expired, malformed or anonymous tokens are removed. Always marks the
    /// session booted.
    #[instrument(skip(self))]
    pub fn bootstrap(&self) -> Option<AuthUser> {
        let user = self.token().and_then(|token| {
            match TokenClaims::decode(token.expose_secret()) {
                Ok(claims) if claims.is_expired() => {
                    info!("Stored token has expired");
                    None
                }
                Ok(claims) => claims
                    .to_user()
                    .map_err(|e| warn!(error = %e, "Stored token has no user"))
                    .ok(),
                Err(e) => {
                    warn!(error = %e, "Stored token is unreadable");
                    None
                }
            }
        });

        if user.is_none()
            && self.token().is_some()
            && let Err(e) = self.inner.api.tokens().clear()
        {
            warn!(error = %e, "Failed to remove stale token");
        }

        self.publish(user.clone());
        debug!(signed_in = user.is_some(), "Session booted");
        user
    }

    /// Sign in and persist the issued token.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials are rejected, the server is
    /// unreachable, the token cannot be read, or it cannot be stored.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn login(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<AuthUser, SessionError> {
        let response: LoginResponse = self
            .inner
            .api
            .post(
                LOGIN_PATH,
                &LoginRequest {
                    email: email.as_str(),
                    password: password.expose_secret(),
                },
            )
            .await?;

        let claims = TokenClaims::decode(&response.token)?;
        let user = match response.user {
            Some(user) => user,
            None => claims.to_user()?,
        };

        self.inner
            .api
            .tokens()
            .set_token(&SecretString::from(response.token))?;
        self.publish(Some(user.clone()));
        info!(user_id = %user.id, "Signed in");
        Ok(user)
    }

    /// Forget the token and publish an anonymous session.
    ///
    /// The identity is cleared even if removing the token fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the token could not be removed from storage.
    #[instrument(skip(self))]
    pub fn logout(&self) -> Result<(), SessionError> {
        let cleared = self.inner.api.tokens().clear();
        self.publish(None);
        info!("Signed out");
        cleared.map_err(SessionError::from)
    }

    /// End the session if its token has expired or disappeared.
    ///
    /// Returns true if the session was ended.
    pub fn check_expiry(&self) -> bool {
        if self.current_user().is_none() {
            return false;
        }

        let expired = match self.token() {
            None => {
                info!("Token removed outside this session");
                if self.logout().is_err() {
                    warn!("Failed to clear session after token removal");
                }
                return true;
            }
            Some(token) => TokenClaims::decode(token.expose_secret())
                .map_or(true, |claims| claims.is_expired()),
        };

        if expired {
            warn!("Session token expired");
            if let Err(e) = self.logout() {
                warn!(error = %e, "Failed to remove expired token");
            }
            self.inner
                .api
                .notifier()
                .notify(Toast::warning(SESSION_EXPIRED_MESSAGE));
        }
        expired
    }

    /// Check for token expiry every `period` until the handle is aborted.
    #[must_use]
    pub fn spawn_expiry_watch(&self, period: Duration) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                session.check_expiry();
            }
        })
    }

    /// Publish `user` as the signed-in identity and mark the session booted.
    fn publish(&self, user: Option<AuthUser>) {
        self.inner.state.send_if_modified(|state| {
            let identity_changed =
                state.user.as_ref().map(|u| &u.id) != user.as_ref().map(|u| &u.id);
            let changed = identity_changed || !state.booted || state.user != user;
            if identity_changed {
                state.epoch += 1;
            }
            state.user = user;
            state.booted = true;
            changed
        });
    }
}
