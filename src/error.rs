//! Error types for the subscription client.

use thiserror::Error;

/// Errors surfaced by the subscription client.
///
/// Only [`ListenError::Configuration`] is ever returned to the caller of
/// [`listen`](crate::listen); everything else is absorbed by the supervisor
/// loop and observable through the `on_error` hook.
#[derive(Debug, Error)]
pub enum ListenError {
    /// Invalid connection target or channel name. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport-level failure reported by the database driver.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The live connection ended without a driver-level error.
    #[error("connection closed")]
    ConnectionClosed,

    /// A user-supplied hook panicked. The panic is caught so the supervisor
    /// task survives, and this error is routed through `on_error`.
    #[error("{hook} hook panicked")]
    HookPanic { hook: &'static str },

    /// Error returned by a message handler. Stays local to the hook call and
    /// is never treated as a connection-level event.
    #[error("message handler error: {0}")]
    Handler(String),
}

pub type Result<T> = std::result::Result<T, ListenError>;
