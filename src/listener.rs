//! Connection supervisor: owns the subscription state machine.

use std::sync::{Arc, RwLock};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backoff::BackoffPolicy;
use crate::config::ListenConfig;
use crate::connection::{Connection, Connector, PgConnector};
use crate::error::{ListenError, Result};
use crate::handler::{Dispatcher, ListenEventHandler};
use crate::receiver::{ReadOutcome, Receiver};

/// Connection lifecycle of one subscription.
///
/// Owned exclusively by the supervisor task; other components only see it
/// through [`ListenerStats`] snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Subscribing,
    Listening,
    Failed,
}

/// Point-in-time counters for a subscription.
#[derive(Debug, Clone, Default)]
pub struct ListenerStats {
    pub state: ConnectionState,
    pub connected: bool,
    pub messages_received: u64,
    pub connection_errors: u64,
    pub reconnects: u64,
}

/// Shared snapshot storage, written only by the supervisor task.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedStats(Arc<RwLock<ListenerStats>>);

impl SharedStats {
    fn snapshot(&self) -> ListenerStats {
        self.0.read().unwrap().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        let mut stats = self.0.write().unwrap();
        stats.state = state;
        stats.connected = state == ConnectionState::Listening;
    }

    pub(crate) fn record_message(&self) {
        self.0.write().unwrap().messages_received += 1;
    }

    fn record_connection_error(&self) {
        self.0.write().unwrap().connection_errors += 1;
    }

    fn record_reconnect(&self) {
        self.0.write().unwrap().reconnects += 1;
    }
}

/// Start a resilient subscription on `config.channel` against a PostgreSQL
/// server.
///
/// Validates the configuration synchronously, then spawns the supervisor as
/// a background task on the current tokio runtime. Runtime failures (lost
/// connections, failed reconnect attempts) are handled internally with
/// backoff and surface only through the handler's hooks; after this call
/// returns `Ok`, nothing is ever reported back to the caller except via
/// hooks.
///
/// Cancelling `cancel` tears the subscription down from any state: no new
/// connect attempt starts, in-flight waits unwind promptly, any open
/// connection is closed, and no hook fires afterwards.
pub fn listen<H>(
    config: ListenConfig,
    cancel: CancellationToken,
    handler: H,
) -> Result<ListenerHandle>
where
    H: ListenEventHandler + 'static,
{
    ChannelListener::spawn(PgConnector, config, cancel, handler)
}

/// Handle to a running subscription.
///
/// Dropping the handle does not stop the subscription; only the
/// cancellation token does.
#[derive(Debug)]
pub struct ListenerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    stats: SharedStats,
}

impl ListenerHandle {
    /// Request teardown. Equivalent to cancelling the caller's token.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether the supervisor task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Snapshot of the subscription's state and counters.
    pub fn stats(&self) -> ListenerStats {
        self.stats.snapshot()
    }

    /// Wait for the supervisor task to exit.
    pub async fn wait(self) {
        let _ = self.join.await;
    }
}

enum SessionEnd {
    Cancelled,
    Failed,
}

/// Supervisor for one channel subscription.
///
/// Runs the state machine on a single background task: connect, subscribe,
/// read until failure, then back off and retry, until the cancellation
/// token fires. Production code goes through [`listen`];
/// [`ChannelListener::spawn`] accepts any [`Connector`] so the machine can
/// be driven against a scripted factory.
pub struct ChannelListener<C: Connector, H> {
    connector: C,
    config: ListenConfig,
    dispatcher: Dispatcher<H>,
    backoff: BackoffPolicy,
    cancel: CancellationToken,
    stats: SharedStats,
    state: ConnectionState,
    /// Set once a session's subscription has been acknowledged. Gates both
    /// the loss hook (only drops after having been alive count) and the
    /// reconnect hook (the first successful connect is not a reconnection).
    reached_listening: bool,
}

impl<C, H> ChannelListener<C, H>
where
    C: Connector,
    H: ListenEventHandler + 'static,
{
    /// Validate the configuration and start the supervisor task.
    pub fn spawn(
        connector: C,
        config: ListenConfig,
        cancel: CancellationToken,
        handler: H,
    ) -> Result<ListenerHandle> {
        config.validate()?;
        connector.validate_target(&config.database_url)?;

        let stats = SharedStats::default();
        let listener = Self {
            connector,
            backoff: BackoffPolicy::new(config.backoff.clone()),
            config,
            dispatcher: Dispatcher::new(handler),
            cancel: cancel.clone(),
            stats: stats.clone(),
            state: ConnectionState::Disconnected,
            reached_listening: false,
        };

        let join = tokio::spawn(listener.run());
        Ok(ListenerHandle {
            cancel,
            join,
            stats,
        })
    }

    /// Supervisor loop. Every suspension point races the cancellation
    /// token, so teardown is prompt from any state.
    #[instrument(skip(self), fields(channel = %self.config.channel))]
    async fn run(mut self) {
        info!("starting channel subscription");

        while !self.cancel.is_cancelled() {
            match self.session().await {
                SessionEnd::Cancelled => break,
                SessionEnd::Failed => {
                    if !self.backoff_wait().await {
                        break;
                    }
                }
            }
        }

        self.transition(ConnectionState::Disconnected);
        info!("channel subscription stopped");
    }

    /// One connect → subscribe → read pass.
    async fn session(&mut self) -> SessionEnd {
        self.transition(ConnectionState::Connecting);
        let connected = tokio::select! {
            _ = self.cancel.cancelled() => None,
            connected = self.connector.connect(&self.config.database_url) => Some(connected),
        };
        let mut conn = match connected {
            None => return SessionEnd::Cancelled,
            Some(Ok(conn)) => conn,
            Some(Err(error)) => {
                warn!(%error, "connect attempt failed");
                return self.fail(None, &error, false).await;
            }
        };

        self.transition(ConnectionState::Subscribing);
        let subscribed = tokio::select! {
            _ = self.cancel.cancelled() => None,
            subscribed = conn.subscribe(&self.config.channel) => Some(subscribed),
        };
        match subscribed {
            None => {
                conn.close().await;
                return SessionEnd::Cancelled;
            }
            Some(Err(error)) => {
                warn!(%error, "subscribe failed");
                let lost = self.reached_listening;
                return self.fail(Some(&mut conn), &error, lost).await;
            }
            Some(Ok(())) => {}
        }

        if self.reached_listening {
            info!("resubscribed after connection loss");
            self.stats.record_reconnect();
            self.dispatcher.reconnect().await;
        } else {
            debug!("subscription established");
        }
        self.reached_listening = true;
        self.backoff.reset();
        self.transition(ConnectionState::Listening);

        let outcome = Receiver {
            conn: &mut conn,
            dispatcher: &self.dispatcher,
            cancel: &self.cancel,
            stats: &self.stats,
        }
        .run()
        .await;

        match outcome {
            ReadOutcome::Cancelled => {
                conn.close().await;
                SessionEnd::Cancelled
            }
            ReadOutcome::Failed(error) => {
                warn!(%error, "listen connection lost");
                self.fail(Some(&mut conn), &error, true).await
            }
        }
    }

    /// Common failure path: report, close the dead handle, return to
    /// `Disconnected` so the caller backs off and retries.
    async fn fail(
        &mut self,
        conn: Option<&mut C::Conn>,
        error: &ListenError,
        lost_session: bool,
    ) -> SessionEnd {
        // A transport failure can race the cancellation signal; once the
        // token has fired, hooks stay quiet.
        if self.cancel.is_cancelled() {
            if let Some(conn) = conn {
                conn.close().await;
            }
            return SessionEnd::Cancelled;
        }

        self.transition(ConnectionState::Failed);
        self.stats.record_connection_error();
        if lost_session {
            self.dispatcher.connection_loss().await;
        }
        self.dispatcher.error(error).await;

        if let Some(conn) = conn {
            conn.close().await;
        }
        self.transition(ConnectionState::Disconnected);
        SessionEnd::Failed
    }

    /// Sleep out the next backoff delay; false when cancellation preempts.
    async fn backoff_wait(&mut self) -> bool {
        let delay = self.backoff.next_delay();
        debug!(
            attempt = self.backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "waiting before reconnect attempt"
        );
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
        self.stats.set_state(next);
    }
}
