//! Read loop for one established session.

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::connection::Connection;
use crate::error::ListenError;
use crate::handler::{Dispatcher, ListenEventHandler};
use crate::listener::SharedStats;

/// Why a read loop ended.
pub(crate) enum ReadOutcome {
    /// The cancellation signal fired.
    Cancelled,
    /// The transport failed; the supervisor decides what happens next.
    Failed(ListenError),
}

/// Drives one established session: block for the next notification, deliver
/// it, read again.
///
/// One message is processed fully, including the handler call, before the
/// next read. That keeps delivery in order and one-at-a-time; a slow
/// handler back-pressures the channel rather than buffering notifications.
pub(crate) struct Receiver<'a, C, H> {
    pub(crate) conn: &'a mut C,
    pub(crate) dispatcher: &'a Dispatcher<H>,
    pub(crate) cancel: &'a CancellationToken,
    pub(crate) stats: &'a SharedStats,
}

impl<C: Connection, H: ListenEventHandler> Receiver<'_, C, H> {
    pub(crate) async fn run(self) -> ReadOutcome {
        loop {
            let payload = tokio::select! {
                _ = self.cancel.cancelled() => return ReadOutcome::Cancelled,
                received = self.conn.recv() => match received {
                    Ok(payload) => payload,
                    Err(error) => return ReadOutcome::Failed(error),
                },
            };

            trace!(payload_len = payload.len(), "notification received");
            self.stats.record_message();

            if let Err(error) = self.dispatcher.message(&payload).await {
                // Handler errors stay local to the hook call by contract.
                debug!(%error, "message handler returned an error");
            }
        }
    }
}
