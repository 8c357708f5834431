//! Toast-style user notifications.
//!
//! Every failure the client surfaces is also reported through a [`Notifier`]
//! so the user hears about it without the caller having to. Front ends plug
//! in their own notifier; [`TracingNotifier`] is the default and simply turns
//! each toast into a tracing event.

use std::fmt;

/// Severity of a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToastLevel {
    Success,
    Info,
    Warning,
    Error,
}

impl fmt::Display for ToastLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Success => "success",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// A non-blocking notification shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

impl Toast {
    #[must_use]
    pub fn new(level: ToastLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ToastLevel::Success, message)
    }

    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(ToastLevel::Info, message)
    }

    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(ToastLevel::Warning, message)
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ToastLevel::Error, message)
    }
}

/// Sink for user-facing notifications.
///
/// Implementations must not block; they are called from inside request
/// handling.
pub trait Notifier: Send + Sync {
    fn notify(&self, toast: Toast);
}

/// Notifier that emits toasts as tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, toast: Toast) {
        match toast.level {
            ToastLevel::Success | ToastLevel::Info => {
                tracing::info!(level = %toast.level, "{}", toast.message);
            }
            ToastLevel::Warning => tracing::warn!("{}", toast.message),
            ToastLevel::Error => tracing::error!("{}", toast.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_level() {
        assert_eq!(Toast::success("ok").level, ToastLevel::Success);
        assert_eq!(Toast::warning("careful").level, ToastLevel::Warning);
        assert_eq!(Toast::error("boom").message, "boom");
    }

    #[test]
    fn test_level_display() {
        assert_eq!(ToastLevel::Warning.to_string(), "warning");
    }
}
