//! Candidate API origins with a shared, forward-only cursor.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use url::Url;

use super::ApiError;
use crate::config::ConfigError;

/// Ordered candidate origins plus the index of the active one.
///
/// Clones share the cursor, so an advance made by one request is seen by
/// every later request. The cursor never moves backward and never wraps:
/// once the last candidate is active it stays active.
#[derive(Debug, Clone)]
pub struct BaseUrls {
    inner: Arc<BaseUrlsInner>,
}

#[derive(Debug)]
struct BaseUrlsInner {
    candidates: Vec<Url>,
    cursor: AtomicUsize,
}

impl BaseUrls {
    /// Create a candidate list with the first entry active.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoBaseUrls` if `candidates` is empty.
    pub fn new(candidates: Vec<Url>) -> Result<Self, ConfigError> {
        if candidates.is_empty() {
            return Err(ConfigError::NoBaseUrls);
        }
        Ok(Self {
            inner: Arc::new(BaseUrlsInner {
                candidates,
                cursor: AtomicUsize::new(0),
            }),
        })
    }

    /// All candidates in order.
    #[must_use]
    pub fn candidates(&self) -> &[Url] {
        &self.inner.candidates
    }

    /// Index of the active candidate.
    #[must_use]
    pub fn active_index(&self) -> usize {
        self.inner.cursor.load(Ordering::Acquire)
    }

    /// The active candidate.
    #[must_use]
    pub fn active(&self) -> &Url {
        let candidates = &self.inner.candidates;
        candidates
            .get(self.active_index())
            .or_else(|| candidates.last())
            .unwrap_or_else(|| unreachable!("BaseUrls is never empty"))
    }

    /// Candidates from `start` to the end of the list, with their indices.
    pub(crate) fn iter_from(&self, start: usize) -> impl Iterator<Item = (usize, &Url)> {
        self.inner.candidates.iter().enumerate().skip(start)
    }

    /// Record that the candidate at `failed` is unreachable.
    ///
    /// Moves the cursor to the following candidate if there is one and no
    /// other request has already moved it further.
    pub(crate) fn advance_past(&self, failed: usize) {
        let next = failed + 1;
        if next < self.inner.candidates.len() {
            let previous = self.inner.cursor.fetch_max(next, Ordering::AcqRel);
            if previous < next {
                tracing::info!(
                    from = %self.inner.candidates.get(failed).map_or("", Url::as_str),
                    to = %self.inner.candidates.get(next).map_or("", Url::as_str),
                    "Active API origin advanced"
                );
            }
        }
    }

    /// Resolve a request path against a candidate origin.
    ///
    /// Any path prefix on the origin is kept (`http://host/shop` +
    /// `/api/cart` gives `http://host/shop/api/cart`).
    pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, ApiError> {
        let joined = format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| ApiError::InvalidRequest(format!("{joined}: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn urls(n: usize) -> BaseUrls {
        let candidates = (0..n)
            .map(|i| Url::parse(&format!("http://10.0.0.{i}:5000")).unwrap())
            .collect();
        BaseUrls::new(candidates).unwrap()
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(BaseUrls::new(vec![]), Err(ConfigError::NoBaseUrls)));
    }

    #[test]
    fn test_advance_moves_forward_and_is_shared() {
        let base = urls(3);
        let clone = base.clone();
        base.advance_past(0);
        assert_eq!(clone.active_index(), 1);
        assert_eq!(clone.active().as_str(), "http://10.0.0.1:5000/");
    }

    #[test]
    fn test_advance_never_moves_backward() {
        let base = urls(3);
        base.advance_past(1);
        base.advance_past(0);
        assert_eq!(base.active_index(), 2);
    }

    #[test]
    fn test_advance_never_wraps() {
        let base = urls(2);
        base.advance_past(0);
        base.advance_past(1);
        assert_eq!(base.active_index(), 1);
    }

    #[test]
    fn test_iter_from_skips_earlier_candidates() {
        let base = urls(3);
        let indices: Vec<usize> = base.iter_from(1).map(|(i, _)| i).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn test_endpoint_keeps_prefix() {
        let base = Url::parse("http://host:5000/shop/").unwrap();
        let url = BaseUrls::endpoint(&base, "/api/cart").unwrap();
        assert_eq!(url.as_str(), "http://host:5000/shop/api/cart");

        let base = Url::parse("http://host:5000").unwrap();
        let url = BaseUrls::endpoint(&base, "api/favorites/42").unwrap();
        assert_eq!(url.as_str(), "http://host:5000/api/favorites/42");
    }
}
