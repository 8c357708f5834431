//! Cart store against the mock backend.
//!
//! Run with: cargo test -p brickyard-integration-tests --test cart_sync

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use axum::http::Method;
use brickyard_client::cart::CartPhase;
use brickyard_client::{CartError, ErrorKind};
use brickyard_core::{Price, ProductId};
use brickyard_integration_tests::{MockBackend, TestClient, eventually, token_for, user_id_for};
use secrecy::SecretString;

const EMMET: &str = "emmet@bricks.example";

fn id(raw: &str) -> ProductId {
    ProductId::new(raw)
}

#[tokio::test]
async fn test_cart_mutations_reconcile_wholesale() {
    let backend = MockBackend::start().await;
    let client = TestClient::signed_in(&backend, EMMET).await;
    let cart = client.app.cart();

    cart.refresh_cart().await.unwrap();
    assert!(cart.snapshot().initialized);
    assert_eq!(cart.item_count(), 0);

    cart.add_item(&id("p2"), 2).await.unwrap();
    cart.add_item(&id("p4"), 1).await.unwrap();
    cart.add_item(&id("p2"), 1).await.unwrap();
    let state = cart.snapshot();
    assert_eq!(state.lines.len(), 2);
    assert_eq!(state.quantity_of("p2"), 3);
    assert_eq!(cart.item_count(), 4);
    assert_eq!(cart.subtotal(), Price::from_cents(3 * 46999 + 4999));

    cart.update_quantity(&id("p2"), 1).await.unwrap();
    assert_eq!(cart.snapshot().quantity_of("p2"), 1);

    cart.update_quantity(&id("p2"), 0).await.unwrap();
    assert_eq!(cart.snapshot().quantity_of("p2"), 0);
    assert_eq!(backend.calls_to(&Method::DELETE, "/api/cart/p2"), 1);

    cart.remove_item(&id("p4")).await.unwrap();
    assert_eq!(cart.item_count(), 0);
}

#[tokio::test]
async fn test_clear_cart() {
    let backend = MockBackend::start().await;
    let client = TestClient::signed_in(&backend, EMMET).await;
    let cart = client.app.cart();

    cart.add_item(&id("p1"), 1).await.unwrap();
    cart.add_item(&id("p2"), 1).await.unwrap();
    cart.clear().await.unwrap();

    let state = cart.snapshot();
    assert!(state.lines.is_empty());
    assert!(state.clearing.is_none());
    assert_eq!(cart.subtotal(), Price::ZERO);
}

#[tokio::test]
async fn test_zero_quantity_add_is_rejected_locally() {
    let backend = MockBackend::start().await;
    let client = TestClient::signed_in(&backend, EMMET).await;

    let err = client.app.cart().add_item(&id("p1"), 0).await.unwrap_err();
    assert!(matches!(err, CartError::Validation(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(backend.calls_to(&Method::POST, "/api/cart"), 0);
}

#[tokio::test]
async fn test_unauthenticated_cart_makes_no_request() {
    let backend = MockBackend::start().await;
    let client = TestClient::new(vec![backend.url()]);
    client.app.session().bootstrap();

    let err = client.app.cart().add_item(&id("p1"), 1).await.unwrap_err();
    assert!(matches!(err, CartError::Unauthenticated));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_concurrent_same_product_mutation_is_busy() {
    let backend = MockBackend::start().await;
    let client = TestClient::signed_in(&backend, EMMET).await;
    let cart = client.app.cart().clone();

    backend.hold_mutations();
    let first = {
        let cart = cart.clone();
        tokio::spawn(async move { cart.add_item(&id("p1"), 1).await })
    };
    eventually("first add to reach the server", || {
        backend.calls_to(&Method::POST, "/api/cart") == 1
    })
    .await;
    assert!(cart.is_pending(&id("p1")));

    let err = cart.update_quantity(&id("p1"), 5).await.unwrap_err();
    assert!(matches!(err, CartError::Busy(_)));

    // A clear must wait for every line to settle.
    assert!(matches!(cart.clear().await, Err(CartError::Busy(_))));

    // Other products are independent.
    let other = {
        let cart = cart.clone();
        tokio::spawn(async move { cart.add_item(&id("p2"), 1).await })
    };
    eventually("second add to reach the server", || {
        backend.calls_to(&Method::POST, "/api/cart") == 2
    })
    .await;

    backend.release_all();
    first.await.unwrap().unwrap();
    other.await.unwrap().unwrap();
    assert!(!cart.is_pending(&id("p1")));
    assert_eq!(cart.item_count(), 2);
    assert_eq!(backend.calls_to(&Method::PUT, "/api/cart/p1"), 0);
}

#[tokio::test]
async fn test_cart_follows_session() {
    let backend = MockBackend::start().await;
    let client = TestClient::new(vec![backend.url()]);
    let tasks = client.app.start();
    let cart = client.app.cart();
    let mut updates = cart.subscribe();

    client.login(EMMET).await;
    tokio::time::timeout(
        Duration::from_secs(5),
        updates.wait_for(|state| state.initialized),
    )
    .await
    .unwrap()
    .unwrap();
    cart.add_item(&id("p1"), 2).await.unwrap();

    client.app.session().logout().unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        updates.wait_for(|state| !state.initialized && state.lines.is_empty()),
    )
    .await
    .unwrap()
    .unwrap();

    tasks.abort();
}

#[tokio::test]
async fn test_mutation_settling_after_logout_is_discarded() {
    let backend = MockBackend::start().await;
    let client = TestClient::signed_in(&backend, EMMET).await;
    let cart = client.app.cart().clone();
    let session = client.app.session();

    backend.hold_mutations();
    let stale = {
        let cart = cart.clone();
        tokio::spawn(async move { cart.add_item(&id("p1"), 1).await })
    };
    eventually("first add to reach the server", || {
        backend.calls_to(&Method::POST, "/api/cart") == 1
    })
    .await;

    session.logout().unwrap();
    cart.reset();

    // Back in from a stored token; a login request would be parked too.
    let user = user_id_for(EMMET);
    let token = token_for(&user, 3600);
    backend.accept_token(&token, &user);
    client
        .app
        .api()
        .tokens()
        .set_token(&SecretString::from(token))
        .unwrap();
    assert!(session.bootstrap().is_some());

    let current = {
        let cart = cart.clone();
        tokio::spawn(async move { cart.add_item(&id("p1"), 2).await })
    };
    eventually("second add to reach the server", || {
        backend.calls_to(&Method::POST, "/api/cart") == 2
    })
    .await;

    // Only the request from the previous session settles.
    backend.release(1);
    let err = stale.await.unwrap().unwrap_err();
    assert!(matches!(err, CartError::StaleSession));
    assert_eq!(err.toast(), None);

    let state = cart.snapshot();
    assert!(state.lines.is_empty());
    assert!(!state.initialized);
    assert!(cart.is_pending(&id("p1")));

    let err = cart.update_quantity(&id("p1"), 5).await.unwrap_err();
    assert!(matches!(err, CartError::Busy(_)));
    assert_eq!(backend.calls_to(&Method::PUT, "/api/cart/p1"), 0);

    backend.release_all();
    current.await.unwrap().unwrap();
    assert!(!cart.is_pending(&id("p1")));
    assert_eq!(cart.snapshot().quantity_of("p1"), 3);
}

#[tokio::test]
async fn test_refresh_settling_after_logout_drops_previous_cart() {
    let backend = MockBackend::start().await;
    let client = TestClient::signed_in(&backend, EMMET).await;
    let cart = client.app.cart().clone();

    cart.add_item(&id("p2"), 1).await.unwrap();

    backend.hold_reads();
    let refresh = {
        let cart = cart.clone();
        tokio::spawn(async move { cart.refresh_cart().await })
    };
    eventually("refresh to reach the server", || {
        backend.calls_to(&Method::GET, "/api/cart") == 1
    })
    .await;
    assert_eq!(cart.snapshot().phase, CartPhase::Loading);

    // No session sync is running, so nothing else resets the cart.
    client.app.session().logout().unwrap();
    backend.release_all();

    let err = refresh.await.unwrap().unwrap_err();
    assert!(matches!(err, CartError::StaleSession));
    let state = cart.snapshot();
    assert!(state.lines.is_empty());
    assert!(!state.initialized);
    assert_eq!(state.phase, CartPhase::Uninitialized);
}
