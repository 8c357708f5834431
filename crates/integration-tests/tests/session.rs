//! Sign-in, token persistence and expiry.
//!
//! Run with: cargo test -p brickyard-integration-tests --test session

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use axum::http::Method;
use brickyard_client::session::SESSION_EXPIRED_MESSAGE;
use brickyard_client::{ErrorKind, SessionError, ToastLevel};
use brickyard_core::Email;
use brickyard_integration_tests::{
    MockBackend, PASSWORD, TestClient, eventually, token_for, user_id_for,
};
use secrecy::{ExposeSecret, SecretString};

const EMMET: &str = "emmet@bricks.example";

#[tokio::test]
async fn test_login_stores_token_and_publishes_user() {
    let backend = MockBackend::start().await;
    let client = TestClient::new(vec![backend.url()]);
    let session = client.app.session();
    session.bootstrap();
    let epoch = session.epoch();

    let user = session
        .login(&Email::parse(EMMET).unwrap(), &SecretString::from(PASSWORD))
        .await
        .unwrap();

    assert_eq!(user.id.as_str(), user_id_for(EMMET));
    assert_eq!(session.current_user(), Some(user));
    assert_eq!(session.epoch(), epoch + 1);
    assert!(session.token().is_some());
    assert_eq!(backend.calls_to(&Method::POST, "/api/auth/login"), 1);
}

#[tokio::test]
async fn test_rejected_login_keeps_anonymous_session() {
    let backend = MockBackend::start().await;
    let client = TestClient::new(vec![backend.url()]);
    let session = client.app.session();
    session.bootstrap();

    let err = session
        .login(
            &Email::parse(EMMET).unwrap(),
            &SecretString::from("wrong password"),
        )
        .await
        .unwrap_err();

    let SessionError::Api(api) = &err else {
        panic!("expected an API error, got {err:?}");
    };
    assert_eq!(api.kind(), ErrorKind::Unauthenticated);
    assert!(session.current_user().is_none());
    assert!(session.token().is_none());
    assert_eq!(client.notifier.messages(), vec!["Invalid email or password"]);
}

#[tokio::test]
async fn test_stored_token_survives_restart() {
    let backend = MockBackend::start().await;
    let client = TestClient::signed_in(&backend, EMMET).await;
    let token = client.app.session().token().unwrap();

    // A second client reading the same session file.
    let config = client.app.config().clone();
    let restarted = brickyard_client::AppState::new(
        config,
        std::sync::Arc::new(brickyard_client::TracingNotifier),
    )
    .unwrap();

    let user = restarted.session().bootstrap().unwrap();
    assert_eq!(user.id.as_str(), user_id_for(EMMET));
    assert_eq!(
        restarted.session().token().unwrap().expose_secret(),
        token.expose_secret()
    );
}

#[tokio::test]
async fn test_bootstrap_discards_expired_token() {
    let client = TestClient::new(vec![brickyard_integration_tests::unused_origin()]);
    let tokens = client.app.api().tokens();
    tokens
        .set_token(&SecretString::from(token_for("user-emmet", -60)))
        .unwrap();

    assert!(client.app.session().bootstrap().is_none());
    assert!(client.app.session().is_booted());
    assert!(tokens.token().is_none());
}

#[tokio::test]
async fn test_expiry_watch_ends_session() {
    let backend = MockBackend::start().await;
    let client = TestClient::new(vec![backend.url()]);
    let token = token_for("user-emmet", 2);
    backend.accept_token(&token, "user-emmet");
    client
        .app
        .api()
        .tokens()
        .set_token(&SecretString::from(token))
        .unwrap();

    let session = client.app.session();
    assert!(session.bootstrap().is_some());
    let watch = session.spawn_expiry_watch(Duration::from_millis(100));

    eventually("the expiry watch to sign out", || {
        session.current_user().is_none()
    })
    .await;
    watch.abort();

    assert!(session.token().is_none());
    let toasts = client.notifier.toasts();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].level, ToastLevel::Warning);
    assert_eq!(toasts[0].message, SESSION_EXPIRED_MESSAGE);
}
