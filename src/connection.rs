//! Connection factory seam and the production sqlx implementation.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgListener};
use tracing::debug;

use crate::error::{ListenError, Result};

/// Opens physical connections for the supervisor.
///
/// The supervisor builds a fresh connection per attempt and discards a
/// handle permanently after any failure, so implementations do not need to
/// be resilient themselves. Injecting a scripted implementation is how the
/// state machine is tested without a live server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    /// Synchronous sanity check of the connection target. Failures here are
    /// fatal configuration errors and are never retried.
    fn validate_target(&self, target: &str) -> Result<()>;

    /// Establish one connection to the target.
    async fn connect(&self, target: &str) -> Result<Self::Conn>;
}

/// One live database session.
#[async_trait]
pub trait Connection: Send {
    /// Issue the channel subscription on this session.
    async fn subscribe(&mut self, channel: &str) -> Result<()>;

    /// Block until the next notification payload arrives.
    async fn recv(&mut self) -> Result<String>;

    /// Close the session. Safe to call more than once.
    async fn close(&mut self);
}

/// Production connector backed by [`sqlx::postgres::PgListener`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

#[async_trait]
impl Connector for PgConnector {
    type Conn = PgChannelConnection;

    fn validate_target(&self, target: &str) -> Result<()> {
        target
            .parse::<PgConnectOptions>()
            .map(|_| ())
            .map_err(|e| ListenError::Configuration(format!("invalid connection target: {e}")))
    }

    async fn connect(&self, target: &str) -> Result<Self::Conn> {
        let inner = PgListener::connect(target).await?;
        Ok(PgChannelConnection { inner: Some(inner) })
    }
}

/// Live `LISTEN` session over a dedicated sqlx connection.
pub struct PgChannelConnection {
    inner: Option<PgListener>,
}

impl std::fmt::Debug for PgChannelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgChannelConnection")
            .field("open", &self.inner.is_some())
            .finish()
    }
}

#[async_trait]
impl Connection for PgChannelConnection {
    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        let listener = self.inner.as_mut().ok_or(ListenError::ConnectionClosed)?;
        listener.listen(channel).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<String> {
        let listener = self.inner.as_mut().ok_or(ListenError::ConnectionClosed)?;
        // try_recv reports a dropped connection as Ok(None) instead of
        // silently reconnecting; reconnection is the supervisor's job and a
        // dead handle is never reused.
        match listener.try_recv().await? {
            Some(notification) => Ok(notification.payload().to_string()),
            None => Err(ListenError::ConnectionClosed),
        }
    }

    async fn close(&mut self) {
        if let Some(listener) = self.inner.take() {
            debug!("closing listen connection");
            drop(listener);
        }
    }
}
