//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `BRICKYARD_API_URL` - Primary API origin (default: `http://localhost:5000`)
//! - `BRICKYARD_API_FALLBACK_URLS` - Comma-separated fallback origins, tried in
//!   order when the active origin is unreachable
//! - `BRICKYARD_REQUEST_TIMEOUT_SECS` - Whole-request timeout (default: none)
//! - `BRICKYARD_CONNECT_TIMEOUT_SECS` - Connect timeout (default: none)
//! - `BRICKYARD_SESSION_FILE` - Where the bearer token is persisted
//!   (default: `session.json` in the platform data directory)
//! - `BRICKYARD_TOKEN_CHECK_SECS` - Token expiry polling period (default: 60)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Primary API origin used when `BRICKYARD_API_URL` is unset.
pub const DEFAULT_API_URL: &str = "http://localhost:5000";

const DEFAULT_TOKEN_CHECK_SECS: u64 = 60;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("No API base URL configured")]
    NoBaseUrls,
    #[error("Could not determine a data directory; set BRICKYARD_SESSION_FILE")]
    NoDataDir,
}

/// Brickyard client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Candidate API origins, primary first, without duplicates
    pub base_urls: Vec<Url>,
    /// Whole-request timeout; `None` leaves the transport default
    pub request_timeout: Option<Duration>,
    /// Connect timeout; `None` leaves the transport default
    pub connect_timeout: Option<Duration>,
    /// File holding the persisted session token
    pub session_file: PathBuf,
    /// How often the session checks its token for expiry
    pub token_check_interval: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let primary = get_env_or_default("BRICKYARD_API_URL", DEFAULT_API_URL);
        let fallbacks = get_optional_env("BRICKYARD_API_FALLBACK_URLS").unwrap_or_default();
        let base_urls = parse_base_urls(&primary, &fallbacks)?;

        let request_timeout = get_optional_secs("BRICKYARD_REQUEST_TIMEOUT_SECS")?;
        let connect_timeout = get_optional_secs("BRICKYARD_CONNECT_TIMEOUT_SECS")?;
        let token_check_interval = get_optional_secs("BRICKYARD_TOKEN_CHECK_SECS")?
            .unwrap_or(Duration::from_secs(DEFAULT_TOKEN_CHECK_SECS));

        let session_file = match get_optional_env("BRICKYARD_SESSION_FILE") {
            Some(path) => PathBuf::from(path),
            None => default_session_file()?,
        };

        Ok(Self {
            base_urls,
            request_timeout,
            connect_timeout,
            session_file,
            token_check_interval,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Configuration for the given origins with every other setting at its
    /// default. Intended for embedding and tests.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoBaseUrls` if `base_urls` is empty.
    pub fn with_base_urls(base_urls: Vec<Url>, session_file: PathBuf) -> Result<Self, ConfigError> {
        if base_urls.is_empty() {
            return Err(ConfigError::NoBaseUrls);
        }
        Ok(Self {
            base_urls,
            request_timeout: None,
            connect_timeout: None,
            session_file,
            token_check_interval: Duration::from_secs(DEFAULT_TOKEN_CHECK_SECS),
            sentry_dsn: None,
            sentry_environment: None,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get an optional environment variable, treating blank values as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Get an optional positive number of seconds.
fn get_optional_secs(key: &str) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = get_optional_env(key) else {
        return Ok(None);
    };
    let secs = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if secs == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Some(Duration::from_secs(secs)))
}

/// Parse the primary origin and comma-separated fallbacks into an ordered,
/// de-duplicated candidate list.
fn parse_base_urls(primary: &str, fallbacks: &str) -> Result<Vec<Url>, ConfigError> {
    let mut urls: Vec<Url> = Vec::new();

    let candidates = std::iter::once(("BRICKYARD_API_URL", primary)).chain(
        fallbacks
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| ("BRICKYARD_API_FALLBACK_URLS", s)),
    );

    for (key, raw) in candidates {
        let url = Url::parse(raw.trim())
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), format!("{raw}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEnvVar(
                key.to_string(),
                format!("{raw}: scheme must be http or https"),
            ));
        }
        if !urls.contains(&url) {
            urls.push(url);
        }
    }

    if urls.is_empty() {
        return Err(ConfigError::NoBaseUrls);
    }
    Ok(urls)
}

fn default_session_file() -> Result<PathBuf, ConfigError> {
    directories::ProjectDirs::from("com", "Brickyard", "brickyard")
        .map(|dirs| dirs.data_dir().join("session.json"))
        .ok_or(ConfigError::NoDataDir)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base_urls_primary_only() {
        let urls = parse_base_urls("http://localhost:5000", "").unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].as_str(), "http://localhost:5000/");
    }

    #[test]
    fn test_parse_base_urls_keeps_order_and_dedupes() {
        let urls = parse_base_urls(
            "http://localhost:5000",
            " http://192.168.1.20:5000 , ,http://localhost:5000,https://api.brickyard.example",
        )
        .unwrap();
        let urls: Vec<&str> = urls.iter().map(Url::as_str).collect();
        assert_eq!(
            urls,
            vec![
                "http://localhost:5000/",
                "http://192.168.1.20:5000/",
                "https://api.brickyard.example/",
            ]
        );
    }

    #[test]
    fn test_parse_base_urls_rejects_garbage() {
        let err = parse_base_urls("not a url", "").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "BRICKYARD_API_URL"));
    }

    #[test]
    fn test_parse_base_urls_rejects_non_http_scheme() {
        let err = parse_base_urls("http://localhost:5000", "ftp://files.example").unwrap_err();
        let ConfigError::InvalidEnvVar(key, _) = err else {
            panic!("expected InvalidEnvVar, got {err:?}");
        };
        assert_eq!(key, "BRICKYARD_API_FALLBACK_URLS");
    }

    #[test]
    fn test_with_base_urls_requires_one() {
        let result = ClientConfig::with_base_urls(vec![], PathBuf::from("session.json"));
        assert!(matches!(result, Err(ConfigError::NoBaseUrls)));
    }
}
