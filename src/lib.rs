//! Resilient PostgreSQL `LISTEN`/`NOTIFY` subscription client.
//!
//! A subscription is the long-lived intent to receive messages on one
//! channel, spanning possibly many physical connections over its life.
//! [`listen`] spawns a background task that connects, issues `LISTEN`, and
//! delivers each notification payload to the caller's
//! [`ListenEventHandler`] in publish order. When the connection drops, the
//! task reconnects and resubscribes on its own with capped exponential
//! backoff; the caller only observes the outage through the optional
//! `on_error` / `on_connection_loss` / `on_reconnect` hooks.
//!
//! `NOTIFY` delivery is fire-and-forget: messages published while the
//! client is disconnected are lost. The client resumes listening, it does
//! not recover missed messages.
//!
//! ```no_run
//! use pg_listen::{listen, ListenConfig, ListenEventHandler};
//! use tokio_util::sync::CancellationToken;
//!
//! struct PrintHandler;
//!
//! #[async_trait::async_trait]
//! impl ListenEventHandler for PrintHandler {
//!     async fn on_message(&self, payload: &str) -> pg_listen::Result<()> {
//!         println!("received: {payload}");
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> pg_listen::Result<()> {
//! let cancel = CancellationToken::new();
//! let handle = listen(
//!     ListenConfig::new("postgres://localhost/app", "jobs"),
//!     cancel.clone(),
//!     PrintHandler,
//! )?;
//!
//! // ... later: deterministic teardown from any state.
//! cancel.cancel();
//! handle.wait().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod listener;
mod receiver;

pub use config::{BackoffConfig, ListenConfig};
pub use connection::{Connection, Connector, PgChannelConnection, PgConnector};
pub use error::{ListenError, Result};
pub use handler::ListenEventHandler;
pub use listener::{listen, ChannelListener, ConnectionState, ListenerHandle, ListenerStats};
