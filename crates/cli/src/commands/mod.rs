//! Command implementations.

pub mod auth;
pub mod cart;
pub mod favorites;

use std::sync::Arc;

use brickyard_client::{AppState, ClientConfig, Notifier, Toast, ToastLevel};
use thiserror::Error;

/// Errors from wiring up the client.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to create API client: {0}")]
    Client(#[from] brickyard_client::ApiError),
}

/// Prints toasts to stderr so they never mix with command output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    #[allow(clippy::print_stderr)]
    fn notify(&self, toast: Toast) {
        let prefix = match toast.level {
            ToastLevel::Success => "ok",
            ToastLevel::Info => "note",
            ToastLevel::Warning => "warning",
            ToastLevel::Error => "error",
        };
        eprintln!("{prefix}: {}", toast.message);
    }
}

/// Build the client and restore the stored session.
///
/// The CLI is one-shot, so the background sync tasks are not started; each
/// command refreshes what it needs.
pub fn connect(config: ClientConfig) -> Result<AppState, ConnectError> {
    let app = AppState::new(config, Arc::new(ConsoleNotifier))?;
    app.session().bootstrap();
    Ok(app)
}

/// Show `toast` (if any) through the app's notifier.
pub fn report(app: &AppState, toast: Option<Toast>) {
    if let Some(toast) = toast {
        app.api().notifier().notify(toast);
    }
}
