//! Shared test harness: a scripted connection factory and a counting
//! handler, so the state machine can be exercised without a live server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use pg_listen::{
    BackoffConfig, Connection, Connector, ListenConfig, ListenError, ListenEventHandler, Result,
};

/// One scripted connection attempt.
pub enum Script {
    /// The connect call itself fails.
    ConnectErr,
    /// The connect call never completes (until cancellation).
    ConnectHang,
    /// Connect succeeds, the subscription command fails.
    SubscribeErr,
    /// Connect succeeds, the subscription command never completes.
    SubscribeHang,
    /// A live session fed by the paired [`SessionFeed`].
    Session(mpsc::UnboundedReceiver<SessionEvent>),
}

pub enum SessionEvent {
    Message(String),
    Drop,
}

/// Feeds one scripted session.
#[derive(Clone)]
pub struct SessionFeed(mpsc::UnboundedSender<SessionEvent>);

impl SessionFeed {
    pub fn publish(&self, payload: &str) {
        // A send to a torn-down session is a notify to nobody.
        let _ = self.0.send(SessionEvent::Message(payload.to_string()));
    }

    /// Terminate the session as if the backend was killed.
    pub fn drop_connection(&self) {
        let _ = self.0.send(SessionEvent::Drop);
    }
}

/// Connector that replays a queue of scripted attempts. Once the queue is
/// exhausted, further connect calls hang until cancellation.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    connect_calls: Arc<AtomicU64>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a live session and return its feed.
    pub fn push_session(&self) -> SessionFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Script::Session(rx));
        SessionFeed(tx)
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn connect_calls(&self) -> u64 {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Conn = ScriptedConnection;

    fn validate_target(&self, _target: &str) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, _target: &str) -> Result<Self::Conn> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::ConnectErr) => Err(ListenError::ConnectionClosed),
            Some(Script::ConnectHang) | None => std::future::pending().await,
            Some(Script::SubscribeErr) => Ok(ScriptedConnection {
                events: None,
                subscribe: SubscribeBehavior::Fail,
            }),
            Some(Script::SubscribeHang) => Ok(ScriptedConnection {
                events: None,
                subscribe: SubscribeBehavior::Hang,
            }),
            Some(Script::Session(events)) => Ok(ScriptedConnection {
                events: Some(events),
                subscribe: SubscribeBehavior::Ok,
            }),
        }
    }
}

pub enum SubscribeBehavior {
    Ok,
    Fail,
    Hang,
}

pub struct ScriptedConnection {
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    subscribe: SubscribeBehavior,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn subscribe(&mut self, _channel: &str) -> Result<()> {
        match self.subscribe {
            SubscribeBehavior::Ok => Ok(()),
            SubscribeBehavior::Fail => Err(ListenError::ConnectionClosed),
            SubscribeBehavior::Hang => std::future::pending().await,
        }
    }

    async fn recv(&mut self) -> Result<String> {
        match self.events.as_mut() {
            None => std::future::pending().await,
            Some(events) => match events.recv().await {
                Some(SessionEvent::Message(payload)) => Ok(payload),
                Some(SessionEvent::Drop) | None => Err(ListenError::ConnectionClosed),
            },
        }
    }

    async fn close(&mut self) {
        self.events = None;
    }
}

/// Handler that records everything it sees; clones share state.
#[derive(Clone, Default)]
pub struct CountingHandler {
    inner: Arc<HandlerState>,
}

#[derive(Default)]
struct HandlerState {
    messages: Mutex<Vec<String>>,
    errors: AtomicU64,
    losses: AtomicU64,
    reconnects: AtomicU64,
    sequence: Mutex<Vec<String>>,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.inner.messages.lock().unwrap().clone()
    }

    pub fn errors(&self) -> u64 {
        self.inner.errors.load(Ordering::SeqCst)
    }

    pub fn losses(&self) -> u64 {
        self.inner.losses.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> u64 {
        self.inner.reconnects.load(Ordering::SeqCst)
    }

    /// Interleaving of hook firings, for ordering assertions.
    pub fn sequence(&self) -> Vec<String> {
        self.inner.sequence.lock().unwrap().clone()
    }

    fn record(&self, event: impl Into<String>) {
        self.inner.sequence.lock().unwrap().push(event.into());
    }
}

#[async_trait]
impl ListenEventHandler for CountingHandler {
    async fn on_message(&self, payload: &str) -> Result<()> {
        self.inner
            .messages
            .lock()
            .unwrap()
            .push(payload.to_string());
        self.record(format!("message:{payload}"));
        Ok(())
    }

    async fn on_error(&self, _error: &ListenError) {
        self.inner.errors.fetch_add(1, Ordering::SeqCst);
        self.record("error");
    }

    async fn on_connection_loss(&self) {
        self.inner.losses.fetch_add(1, Ordering::SeqCst);
        self.record("loss");
    }

    async fn on_reconnect(&self) {
        self.inner.reconnects.fetch_add(1, Ordering::SeqCst);
        self.record("reconnect");
    }
}

/// Configuration with short, deterministic reconnect delays.
pub fn test_config() -> ListenConfig {
    let mut config = ListenConfig::new("postgres://scripted/test", "events");
    config.backoff = BackoffConfig {
        base_delay_ms: 5,
        max_delay_ms: 20,
        multiplier: 2.0,
        jitter: false,
    };
    config
}

/// Poll until `predicate` holds, failing the test after two seconds.
pub async fn wait_for(description: &str, predicate: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !predicate() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {description}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
