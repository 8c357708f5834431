//! HTTP client with multi-origin fallback.

use std::sync::Arc;

use reqwest::Method;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Span, debug, error, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::{
    ApiError, BaseUrls, CANNOT_CONNECT_MESSAGE, error_message_from_body, generic_status_message,
};
use crate::config::ClientConfig;
use crate::notify::{Notifier, Toast};
use crate::storage::TokenStore;

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A request to the storefront API, independent of which origin serves it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
    headers: HeaderMap,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::InvalidRequest` if `body` cannot be serialized.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("body: {e}")))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Add an extra header.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Client for the storefront REST API.
///
/// Attaches the stored bearer token to every request and falls back through
/// the configured origins when the active one cannot be reached.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    client: reqwest::Client,
    base_urls: BaseUrls,
    tokens: TokenStore,
    notifier: Arc<dyn Notifier>,
}

impl ApiClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin list is empty or the underlying HTTP
    /// client cannot be built.
    pub fn new(
        config: &ClientConfig,
        tokens: TokenStore,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build()?;

        let base_urls = BaseUrls::new(config.base_urls.clone())
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

        Ok(Self::from_parts(client, base_urls, tokens, notifier))
    }

    /// Assemble a client from already-built parts.
    #[must_use]
    pub fn from_parts(
        client: reqwest::Client,
        base_urls: BaseUrls,
        tokens: TokenStore,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(ApiClientInner {
                client,
                base_urls,
                tokens,
                notifier,
            }),
        }
    }

    /// The candidate origins and their shared cursor.
    #[must_use]
    pub fn base_urls(&self) -> &BaseUrls {
        &self.inner.base_urls
    }

    /// The origin the next request will try first.
    #[must_use]
    pub fn active_base_url(&self) -> &Url {
        self.inner.base_urls.active()
    }

    /// Token store used for the `Authorization` header.
    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    /// Notifier that receives user-facing failures.
    #[must_use]
    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.inner.notifier
    }

    /// `GET` a path.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await
    }

    /// `POST` a JSON body.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::post(path).json(body)?).await
    }

    /// `PUT` a JSON body.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::put(path).json(body)?).await
    }

    /// `DELETE` a path.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::delete(path)).await
    }

    /// Send a request, falling back through the candidate origins.
    ///
    /// Starts at the active origin. On a transport failure the shared cursor
    /// advances and the request is retried on the next origin; origins before
    /// the starting one are never revisited.
    ///
    /// # Errors
    ///
    /// - `ApiError::Unreachable` if every remaining origin failed to connect
    ///   (the user is notified)
    /// - `ApiError::Status` if the server answered with a non-success status
    ///   (the user is notified with the server's message)
    /// - `ApiError::Decode` if a success body does not match `T`
    /// - `ApiError::Transport` if the response body could not be read
    #[instrument(
        skip_all,
        fields(method = %request.method, path = %request.path, request_id = tracing::field::Empty)
    )]
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let request_id = Uuid::new_v4();
        Span::current().record("request_id", tracing::field::display(request_id));

        let base_urls = &self.inner.base_urls;
        let start = base_urls.active_index();
        let mut attempted = Vec::new();

        for (index, base) in base_urls.iter_from(start) {
            let url = BaseUrls::endpoint(base, &request.path)?;

            match self.build(&request, url, request_id).send().await {
                Ok(response) => {
                    if index != start {
                        debug!(origin = %base, "Request served by fallback origin");
                    }
                    return self.read_response(response).await;
                }
                Err(e) if e.is_builder() => return Err(ApiError::Transport(e)),
                Err(e) => {
                    warn!(origin = %base, error = %e, "API origin unreachable");
                    attempted.push(base.clone());
                    base_urls.advance_past(index);
                }
            }
        }

        error!(attempted = attempted.len(), "All API origins unreachable");
        self.inner.notifier.notify(Toast::error(CANNOT_CONNECT_MESSAGE));
        Err(ApiError::Unreachable { attempted })
    }

    fn build(
        &self,
        request: &ApiRequest,
        url: Url,
        request_id: Uuid,
    ) -> reqwest::RequestBuilder {
        let mut builder = self
            .inner
            .client
            .request(request.method.clone(), url)
            .header(ACCEPT, "application/json")
            .header(REQUEST_ID_HEADER, request_id.to_string())
            .headers(request.headers.clone());

        if let Some(token) = self.inner.tokens.token() {
            builder = builder.bearer_auth(token.expose_secret());
        }

        // `json` also sets `Content-Type: application/json`
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        builder
    }

    async fn read_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message =
                error_message_from_body(&body).unwrap_or_else(|| generic_status_message(status));
            warn!(status = %status, message = %message, "API returned error status");
            self.inner.notifier.notify(Toast::error(message.clone()));
            return Err(ApiError::Status { status, message });
        }

        let text = if body.trim().is_empty() {
            "null"
        } else {
            body.as_str()
        };
        serde_json::from_str(text).map_err(|e| {
            error!(
                error = %e,
                body = %body.chars().take(500).collect::<String>(),
                "Failed to parse API response"
            );
            ApiError::Decode(e)
        })
    }
}
