//! User-facing event hooks and the dispatcher that guards them.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::warn;

use crate::error::{ListenError, Result};

/// Event hooks for one subscription.
///
/// Implement only the hooks you care about; every method has a no-op
/// default. Hooks run sequentially on the subscription's background task,
/// so no two hooks for the same subscription ever execute concurrently, and
/// a slow `on_message` back-pressures the read loop instead of letting
/// undelivered notifications pile up.
#[async_trait]
pub trait ListenEventHandler: Send + Sync {
    /// Called once per received notification, in publish order.
    ///
    /// A returned error is visible only to the caller of this hook; it is
    /// not escalated to [`on_error`](Self::on_error) and does not reset the
    /// connection.
    async fn on_message(&self, payload: &str) -> Result<()> {
        let _ = payload;
        Ok(())
    }

    /// Called with every recoverable failure (connect, subscribe, read),
    /// and with panics caught in other hooks.
    async fn on_error(&self, error: &ListenError) {
        let _ = error;
    }

    /// Called when an established session drops mid-flight. Failures before
    /// any session was established do not count as a loss.
    async fn on_connection_loss(&self) {}

    /// Called after a lost session has been re-established. The first
    /// successful connection does not count as a reconnection.
    async fn on_reconnect(&self) {}
}

/// Invokes hooks with panic isolation.
///
/// A panicking hook is converted into [`ListenError::HookPanic`] and routed
/// through the regular `on_error` path, so user code can never corrupt the
/// supervisor's state machine or tear down its task.
pub(crate) struct Dispatcher<H> {
    handler: Arc<H>,
}

impl<H> std::fmt::Debug for Dispatcher<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl<H: ListenEventHandler> Dispatcher<H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Deliver one payload. The handler's own `Err` is returned untouched;
    /// a panic becomes `HookPanic` and also fires `on_error`.
    pub(crate) async fn message(&self, payload: &str) -> Result<()> {
        match AssertUnwindSafe(self.handler.on_message(payload))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                self.error(&ListenError::HookPanic { hook: "on_message" }).await;
                Err(ListenError::HookPanic { hook: "on_message" })
            }
        }
    }

    pub(crate) async fn error(&self, error: &ListenError) {
        if AssertUnwindSafe(self.handler.on_error(error))
            .catch_unwind()
            .await
            .is_err()
        {
            warn!(hook = "on_error", "hook panicked, ignoring");
        }
    }

    pub(crate) async fn connection_loss(&self) {
        if AssertUnwindSafe(self.handler.on_connection_loss())
            .catch_unwind()
            .await
            .is_err()
        {
            self.error(&ListenError::HookPanic {
                hook: "on_connection_loss",
            })
            .await;
        }
    }

    pub(crate) async fn reconnect(&self) {
        if AssertUnwindSafe(self.handler.on_reconnect())
            .catch_unwind()
            .await
            .is_err()
        {
            self.error(&ListenError::HookPanic { hook: "on_reconnect" })
                .await;
        }
    }
}
