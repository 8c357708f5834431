//! Integration test support for the Brickyard client.
//!
//! Tests run the real client against [`MockBackend`], an in-process axum
//! server that implements the storefront endpoints the client uses, keeps
//! per-user favorites and carts in memory, and records every request.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p brickyard-integration-tests
//! ```
//!
//! # Controlling the backend
//!
//! - [`MockBackend::hold_mutations`] parks every non-`GET` request until
//!   [`MockBackend::release`] is called, so tests can observe in-flight state
//! - [`MockBackend::hold_reads`] does the same for `GET` requests
//! - [`MockBackend::fail_next`] answers the next API request with a fixed
//!   status and body
//! - [`unused_origin`] yields an origin nothing listens on, for fallback tests

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::{Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use brickyard_client::{AppState, ClientConfig, Notifier, Toast};
use brickyard_core::Email;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use url::Url;

/// Password the mock backend accepts for every account.
pub const PASSWORD: &str = "brick-by-brick";

/// How long [`eventually`] waits before failing the test.
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// JWT helpers
// ============================================================================

/// An unsigned JWT carrying `claims`.
#[must_use]
pub fn jwt(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.mock-signature")
}

/// A token for `user_id` expiring `ttl_secs` from now (negative for one
/// that has already expired).
#[must_use]
pub fn token_for(user_id: &str, ttl_secs: i64) -> String {
    jwt(&json!({
        "id": user_id,
        "email": format!("{user_id}@bricks.example"),
        "exp": chrono::Utc::now().timestamp() + ttl_secs,
    }))
}

/// User id the mock backend assigns to `email`.
#[must_use]
pub fn user_id_for(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    format!("user-{local}")
}

/// An origin with nothing listening on it.
///
/// # Panics
///
/// Panics if no local port can be reserved.
#[must_use]
pub fn unused_origin() -> Url {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to reserve a local port");
    let addr = listener.local_addr().expect("Failed to read reserved port");
    drop(listener);
    origin(addr)
}

fn origin(addr: SocketAddr) -> Url {
    Url::parse(&format!("http://{addr}")).expect("Socket address is a valid origin")
}

/// Poll `condition` until it holds.
///
/// # Panics
///
/// Panics if `condition` does not hold within five seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Notifier
// ============================================================================

/// Notifier that keeps every toast for later assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    toasts: Mutex<Vec<Toast>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.toasts().into_iter().map(|t| t.message).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, toast: Toast) {
        self.toasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(toast);
    }
}

// ============================================================================
// Client harness
// ============================================================================

/// A fully wired client with a recording notifier and a private session
/// file.
pub struct TestClient {
    pub app: AppState,
    pub notifier: Arc<RecordingNotifier>,
    _session_dir: TempDir,
}

impl TestClient {
    /// A client for `origins`, not yet booted.
    ///
    /// # Panics
    ///
    /// Panics if the client cannot be built.
    #[must_use]
    pub fn new(origins: Vec<Url>) -> Self {
        let session_dir = tempfile::tempdir().expect("Failed to create session dir");
        let mut config =
            ClientConfig::with_base_urls(origins, session_dir.path().join("session.json"))
                .expect("At least one origin");
        config.connect_timeout = Some(Duration::from_secs(2));
        config.request_timeout = Some(Duration::from_secs(10));

        let notifier = Arc::new(RecordingNotifier::default());
        let app = AppState::new(config, notifier.clone()).expect("Failed to build client");
        Self {
            app,
            notifier,
            _session_dir: session_dir,
        }
    }

    /// A booted client signed in as `email` against `backend`.
    ///
    /// # Panics
    ///
    /// Panics if the login fails.
    pub async fn signed_in(backend: &MockBackend, email: &str) -> Self {
        let client = Self::new(vec![backend.url()]);
        client.app.session().bootstrap();
        client.login(email).await;
        client
    }

    /// Sign in as `email`.
    ///
    /// # Panics
    ///
    /// Panics if the login fails.
    pub async fn login(&self, email: &str) {
        let email = Email::parse(email).expect("Valid test email");
        self.app
            .session()
            .login(&email, &SecretString::from(PASSWORD))
            .await
            .expect("Login against the mock backend");
    }
}

// ============================================================================
// Mock backend
// ============================================================================

/// A request the backend received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
}

/// In-process storefront backend.
pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<BackendState>,
}

struct BackendState {
    data: Mutex<BackendData>,
    calls: Mutex<Vec<RecordedCall>>,
    fail_next: Mutex<Option<(StatusCode, Value)>>,
    holding: AtomicBool,
    holding_reads: AtomicBool,
    gate: Semaphore,
}

#[derive(Default)]
struct BackendData {
    /// token -> user id
    sessions: HashMap<String, String>,
    favorites: HashMap<String, Vec<String>>,
    carts: HashMap<String, Vec<(String, u32)>>,
}

#[derive(Clone)]
struct CurrentUser(String);

impl MockBackend {
    /// Start a backend on an ephemeral local port.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    pub async fn start() -> Self {
        let state = Arc::new(BackendState {
            data: Mutex::new(BackendData::default()),
            calls: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
            holding: AtomicBool::new(false),
            holding_reads: AtomicBool::new(false),
            gate: Semaphore::new(0),
        });

        let app = Router::new()
            .route("/api/auth/login", post(login))
            .route("/api/favorites", get(list_favorites))
            .route(
                "/api/favorites/{id}",
                post(add_favorite).delete(remove_favorite),
            )
            .route(
                "/api/cart",
                get(show_cart).post(add_to_cart).delete(clear_cart),
            )
            .route("/api/cart/{id}", put(set_quantity).delete(remove_line))
            .layer(middleware::from_fn_with_state(state.clone(), intercept))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock backend");
        let addr = listener.local_addr().expect("Mock backend address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    #[must_use]
    pub fn url(&self) -> Url {
        origin(self.addr)
    }

    /// Every request received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.state.calls).clone()
    }

    /// Number of requests received for `method` and `path`.
    #[must_use]
    pub fn calls_to(&self, method: &Method, path: &str) -> usize {
        lock(&self.state.calls)
            .iter()
            .filter(|call| call.method == *method && call.path == path)
            .count()
    }

    /// Park every non-`GET` request until released.
    pub fn hold_mutations(&self) {
        self.state.holding.store(true, Ordering::SeqCst);
    }

    /// Park every `GET` request until released.
    pub fn hold_reads(&self) {
        self.state.holding_reads.store(true, Ordering::SeqCst);
    }

    /// Let `n` parked (or future) requests through, oldest first.
    pub fn release(&self, n: usize) {
        self.state.gate.add_permits(n);
    }

    /// Stop parking requests and let every parked one through.
    pub fn release_all(&self) {
        self.state.holding.store(false, Ordering::SeqCst);
        self.state.holding_reads.store(false, Ordering::SeqCst);
        self.state.gate.add_permits(1 << 20);
    }

    /// Answer the next API request with `status` and `body`.
    pub fn fail_next(&self, status: StatusCode, body: Value) {
        *lock(&self.state.fail_next) = Some((status, body));
    }

    /// Register `token` as a session for `user_id`.
    pub fn accept_token(&self, token: &str, user_id: &str) {
        lock(&self.state.data)
            .sessions
            .insert(token.to_owned(), user_id.to_owned());
    }

    /// Seed favorites for `user_id` directly.
    pub fn seed_favorites(&self, user_id: &str, ids: &[&str]) {
        lock(&self.state.data).favorites.insert(
            user_id.to_owned(),
            ids.iter().map(|id| (*id).to_owned()).collect(),
        );
    }

    /// Favorites stored for `user_id`.
    #[must_use]
    pub fn favorites_of(&self, user_id: &str) -> Vec<String> {
        lock(&self.state.data)
            .favorites
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Products the backend knows about.
fn product(id: &str) -> Option<Value> {
    let (name, price, stock) = match id {
        "p1" => ("Millennium Falcon", 849.99, 4),
        "p2" => ("Hogwarts Castle", 469.99, 12),
        "p3" => ("Eiffel Tower", 629.99, 0),
        "p4" => ("Botanical Bonsai", 49.99, 30),
        _ => return None,
    };
    Some(json!({
        "_id": id,
        "name": name,
        "price": price,
        "stock": stock,
        "images": [format!("{id}-1.jpg")],
        "themes": [{"_id": "icons", "name": "Icons"}],
        "categories": ["adults"],
    }))
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "message": text }))).into_response()
}

/// Record the call, apply injected failures, park held requests and
/// authenticate.
async fn intercept(
    State(state): State<Arc<BackendState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    lock(&state.calls).push(RecordedCall {
        method: request.method().clone(),
        path: request.uri().path().to_owned(),
        authorization: authorization.clone(),
    });

    if let Some((status, body)) = lock(&state.fail_next).take() {
        return (status, Json(body)).into_response();
    }

    let held = if request.method() == Method::GET {
        &state.holding_reads
    } else {
        &state.holding
    };
    if held.load(Ordering::SeqCst)
        && let Ok(permit) = state.gate.acquire().await
    {
        permit.forget();
    }

    if request.uri().path() == "/api/auth/login" {
        return next.run(request).await;
    }

    let user = authorization
        .as_deref()
        .and_then(|value| value.strip_prefix("Bearer "))
        .and_then(|token| lock(&state.data).sessions.get(token).cloned());
    let Some(user) = user else {
        return message(StatusCode::UNAUTHORIZED, "Not authorized, no token");
    };
    request.extensions_mut().insert(CurrentUser(user));
    next.run(request).await
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(State(state): State<Arc<BackendState>>, Json(body): Json<LoginBody>) -> Response {
    if body.password != PASSWORD {
        return message(StatusCode::UNAUTHORIZED, "Invalid email or password");
    }
    let user_id = user_id_for(&body.email);
    let token = token_for(&user_id, 3600);
    lock(&state.data)
        .sessions
        .insert(token.clone(), user_id.clone());

    Json(json!({
        "token": token,
        "user": {"_id": user_id, "email": body.email, "isAdmin": false},
    }))
    .into_response()
}

fn favorites_body(ids: &[String]) -> Json<Value> {
    let favorites: Vec<Value> = ids.iter().filter_map(|id| product(id)).collect();
    Json(json!({ "favorites": favorites, "favoriteIds": ids }))
}

async fn list_favorites(
    State(state): State<Arc<BackendState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Json<Value> {
    let data = lock(&state.data);
    favorites_body(data.favorites.get(&user).map_or(&[][..], Vec::as_slice))
}

async fn add_favorite(
    State(state): State<Arc<BackendState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Response {
    if product(&id).is_none() {
        return message(StatusCode::NOT_FOUND, "Product not found");
    }
    let mut data = lock(&state.data);
    let ids = data.favorites.entry(user).or_default();
    if !ids.contains(&id) {
        ids.push(id);
    }
    favorites_body(ids).into_response()
}

async fn remove_favorite(
    State(state): State<Arc<BackendState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Json<Value> {
    let mut data = lock(&state.data);
    let ids = data.favorites.entry(user).or_default();
    ids.retain(|existing| *existing != id);
    favorites_body(ids)
}

fn cart_body(lines: &[(String, u32)]) -> Json<Value> {
    let items: Vec<Value> = lines
        .iter()
        .filter_map(|(id, quantity)| {
            product(id).map(|product| json!({ "product": product, "quantity": quantity }))
        })
        .collect();
    Json(json!({ "items": items }))
}

async fn show_cart(
    State(state): State<Arc<BackendState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Json<Value> {
    let data = lock(&state.data);
    cart_body(data.carts.get(&user).map_or(&[][..], Vec::as_slice))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddToCartBody {
    product_id: String,
    quantity: u32,
}

async fn add_to_cart(
    State(state): State<Arc<BackendState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<AddToCartBody>,
) -> Response {
    if product(&body.product_id).is_none() {
        return message(StatusCode::NOT_FOUND, "Product not found");
    }
    let mut data = lock(&state.data);
    let lines = data.carts.entry(user).or_default();
    match lines.iter_mut().find(|(id, _)| *id == body.product_id) {
        Some((_, quantity)) => *quantity += body.quantity,
        None => lines.push((body.product_id, body.quantity)),
    }
    cart_body(lines).into_response()
}

#[derive(Deserialize)]
struct QuantityBody {
    quantity: u32,
}

async fn set_quantity(
    State(state): State<Arc<BackendState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(body): Json<QuantityBody>,
) -> Response {
    let mut data = lock(&state.data);
    let lines = data.carts.entry(user).or_default();
    let Some(line) = lines.iter_mut().find(|(existing, _)| *existing == id) else {
        return message(StatusCode::NOT_FOUND, "Item not in cart");
    };
    line.1 = body.quantity;
    lines.retain(|(_, quantity)| *quantity > 0);
    cart_body(lines).into_response()
}

async fn remove_line(
    State(state): State<Arc<BackendState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Json<Value> {
    let mut data = lock(&state.data);
    let lines = data.carts.entry(user).or_default();
    lines.retain(|(existing, _)| *existing != id);
    cart_body(lines)
}

async fn clear_cart(
    State(state): State<Arc<BackendState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Json<Value> {
    let mut data = lock(&state.data);
    data.carts.insert(user, Vec::new());
    cart_body(&[])
}
