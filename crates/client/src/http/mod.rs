//! Resilient JSON client for the storefront REST API.
//!
//! # Architecture
//!
//! - One [`ApiClient`] per process, cheaply cloneable (`Arc` inside)
//! - Candidate API origins live in [`BaseUrls`], an ordered list with a shared
//!   cursor that only ever moves forward
//! - A transport failure (connection refused, DNS, timeout) moves on to the
//!   next candidate and retries the same request; an HTTP error status never
//!   does
//! - Failures are reported to the user through the configured
//!   [`Notifier`](crate::notify::Notifier) as well as returned
//!
//! # Example
//!
//! ```rust,ignore
//! use brickyard_client::http::{ApiClient, ApiRequest};
//!
//! let client = ApiClient::new(&config, tokens, notifier)?;
//! let payload: FavoritesPayload = client.get("/api/favorites").await?;
//! let payload: FavoritesPayload = client
//!     .send(ApiRequest::post(format!("/api/favorites/{id}")))
//!     .await?;
//! ```

mod base_url;
mod client;

pub use base_url::BaseUrls;
pub use client::{ApiClient, ApiRequest};

use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

/// Message shown when every candidate origin is unreachable.
pub const CANNOT_CONNECT_MESSAGE: &str =
    "Cannot connect to the server. Please check your connection and try again.";

/// Structural classification of a failure, for callers that need to branch
/// (e.g. to prompt a login instead of showing an error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The user must sign in (or lacks permission).
    Unauthenticated,
    /// The request was rejected as invalid.
    Validation,
    /// The server could not be reached.
    Network,
    /// Anything else: server faults, malformed responses.
    Unknown,
}

/// Errors that can occur when talking to the storefront API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Every candidate origin failed at the transport level.
    #[error("cannot connect to the server (tried {})", format_origins(attempted))]
    Unreachable {
        /// Origins tried for this call, in order.
        attempted: Vec<Url>,
    },

    /// The server answered with a non-success status.
    #[error("{message}")]
    Status {
        status: StatusCode,
        /// `message`/`msg` from the response body, or a generic fallback.
        message: String,
    },

    /// Transport failure that is not retried on another origin (client
    /// construction, or the connection dropping mid-response).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body did not match the expected shape.
    #[error("unexpected response from server: {0}")]
    Decode(#[from] serde_json::Error),

    /// The request could not be built (bad path or unserializable body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unreachable { .. } | Self::Transport(_) => ErrorKind::Network,
            Self::Status { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN =>
            {
                ErrorKind::Unauthenticated
            }
            Self::Status { status, .. } if status.is_client_error() => ErrorKind::Validation,
            Self::Status { .. } => ErrorKind::Unknown,
            Self::Decode(_) | Self::InvalidRequest(_) => ErrorKind::Unknown,
        }
    }

    /// HTTP status, when the server answered.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn format_origins(origins: &[Url]) -> String {
    if origins.is_empty() {
        return "no origins".to_string();
    }
    origins
        .iter()
        .map(Url::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Extract a human-readable error from a JSON error body.
///
/// The backend uses `message` on most routes and `msg` on a few older ones.
fn error_message_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "msg"].iter().find_map(|key| {
        value
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    })
}

/// Message used when an error body carries nothing readable.
fn generic_status_message(status: StatusCode) -> String {
    format!("Request failed with status {status}")
}
