//! Reconnecting live-event client.
//!
//! One supervisor task owns the transport and the reconnect timer, so there
//! is never more than one of each. [`ConnectionMachine`] makes the rules
//! explicit: a close signal schedules a reconnect only if none is pending and
//! the client has not been stopped.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::event::LiveEvent;
use super::transport::{Connector, WsConnector};

/// Delay between a transport close and the next connect attempt.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(8);

/// Reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }
}

/// Transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// What subscribers receive, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotification {
    /// The transport opened.
    Opened,
    /// A recognized event.
    Event(LiveEvent),
    /// Something went wrong but the client keeps running.
    Diagnostic(String),
    /// The transport closed; `reconnect_in` is set when a retry is scheduled.
    Closed { reconnect_in: Option<Duration> },
}

/// Connection lifecycle rules, free of any I/O.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    reconnect_pending: bool,
    stopped: bool,
    attempts: u64,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Closed,
            reconnect_pending: false,
            stopped: true,
            attempts: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Connect attempts started so far.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Start a connect attempt.
    ///
    /// Refused while a transport is connecting or open, or while the
    /// reconnect timer owns the next attempt.
    pub fn begin_connect(&mut self) -> bool {
        if self.state != ConnectionState::Closed || self.reconnect_pending {
            return false;
        }
        self.stopped = false;
        self.state = ConnectionState::Connecting;
        self.attempts += 1;
        true
    }

    /// Transport opened.
    pub fn opened(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Open;
        true
    }

    /// Transport closed (or failed to open).
    ///
    /// Returns the backoff iff this signal scheduled the reconnect. Repeated
    /// close signals, and closes after [`Self::stop`], schedule nothing.
    pub fn closed(&mut self, policy: &ReconnectPolicy) -> Option<Duration> {
        if self.state == ConnectionState::Closed {
            return None;
        }
        self.state = ConnectionState::Closed;
        if self.stopped || self.reconnect_pending {
            return None;
        }
        self.reconnect_pending = true;
        Some(policy.backoff)
    }

    /// Reconnect timer fired. Returns `true` if a new attempt was started.
    pub fn fire_reconnect(&mut self) -> bool {
        if !self.reconnect_pending || self.stopped {
            return false;
        }
        self.reconnect_pending = false;
        self.begin_connect()
    }

    /// Explicit disconnect: cancel any pending reconnect.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.reconnect_pending = false;
    }
}

struct Shared {
    machine: ConnectionMachine,
    subscribers: Vec<mpsc::UnboundedSender<ClientNotification>>,
}

impl Shared {
    fn emit(&mut self, notification: &ClientNotification) {
        self.subscribers
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }
}

/// Owns one logical live connection and its reconnect policy.
pub struct LiveEventClient {
    url: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    shared: Arc<Mutex<Shared>>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl LiveEventClient {
    pub fn new(url: impl Into<String>, connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        Self {
            url: url.into(),
            connector,
            policy,
            shared: Arc::new(Mutex::new(Shared {
                machine: ConnectionMachine::new(),
                subscribers: Vec::new(),
            })),
            shutdown: None,
            task: None,
        }
    }

    /// Client over a real WebSocket.
    pub fn websocket(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self::new(url, Arc::new(WsConnector), policy)
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Register a subscriber. Notifications arrive in order, without loss.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ClientNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.shared).subscribers.push(tx);
        rx
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        lock(&self.shared).machine.state()
    }

    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        lock(&self.shared).machine.reconnect_pending()
    }

    /// Connect attempts made since creation, including reconnects.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        lock(&self.shared).machine.attempts()
    }

    /// Open the transport. No-op while one is live or a reconnect is pending.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("live client already running");
            return;
        }
        if !lock(&self.shared).machine.begin_connect() {
            debug!("connect refused by connection state");
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);
        self.task = Some(tokio::spawn(supervise(
            self.url.clone(),
            Arc::clone(&self.connector),
            self.policy,
            Arc::clone(&self.shared),
            shutdown_rx,
        )));
    }

    /// Close the transport and cancel any pending reconnect.
    ///
    /// No reconnect happens afterwards until [`Self::connect`] is called.
    pub async fn disconnect(&mut self) {
        lock(&self.shared).machine.stop();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("live supervisor ended abnormally: {e}");
            }
        }
    }
}

impl Drop for LiveEventClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            lock(&self.shared).machine.stop();
            task.abort();
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn dispatch(shared: &Mutex<Shared>, raw: &str) {
    match LiveEvent::parse(raw) {
        Ok(Some(event)) => {
            debug!(event = event.tag(), total = event.total_count(), "live event");
            lock(shared).emit(&ClientNotification::Event(event));
        }
        Ok(None) => debug!("ignoring live event with unknown tag"),
        Err(e) => {
            warn!("dropping live payload: {e}");
            lock(shared).emit(&ClientNotification::Diagnostic(e.to_string()));
        }
    }
}

/// Close bookkeeping shared by every exit path of a connection.
fn mark_closed(shared: &Mutex<Shared>, policy: &ReconnectPolicy) -> Option<Duration> {
    let mut guard = lock(shared);
    let delay = guard.machine.closed(policy);
    guard.emit(&ClientNotification::Closed {
        reconnect_in: delay,
    });
    delay
}

async fn supervise(
    url: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    shared: Arc<Mutex<Shared>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        info!(%url, "connecting live channel");
        let connected = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                mark_closed(&shared, &policy);
                return;
            }
            connected = connector.connect(&url) => connected,
        };

        match connected {
            Ok(mut source) => {
                {
                    let mut guard = lock(&shared);
                    guard.machine.opened();
                    guard.emit(&ClientNotification::Opened);
                }
                info!(%url, "live channel open");
                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => {
                            if let Err(e) = source.close().await {
                                debug!("close during disconnect: {e}");
                            }
                            mark_closed(&shared, &policy);
                            return;
                        }
                        next = source.next_payload() => match next {
                            Some(Ok(raw)) => dispatch(&shared, &raw),
                            Some(Err(e)) => {
                                warn!("live transport error: {e}");
                                lock(&shared).emit(&ClientNotification::Diagnostic(e.to_string()));
                            }
                            None => break,
                        }
                    }
                }
            }
            Err(e) => {
                warn!(%url, "live channel connect failed: {e}");
                lock(&shared).emit(&ClientNotification::Diagnostic(format!(
                    "connect failed: {e}"
                )));
            }
        }

        let Some(delay) = mark_closed(&shared, &policy) else {
            return;
        };
        warn!("live channel closed, reconnecting in {}s", delay.as_secs_f32());

        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                lock(&shared).machine.stop();
                return;
            }
            () = tokio::time::sleep(delay) => {}
        }

        if !lock(&shared).machine.fire_reconnect() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::{CountError, Result};
    use crate::live::transport::EventSource;

    /// One scripted connection.
    enum Script {
        Refuse,
        Serve {
            payloads: Vec<Result<String>>,
            hold_open: bool,
        },
    }

    struct ScriptedSource {
        payloads: VecDeque<Result<String>>,
        hold_open: bool,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn next_payload(&mut self) -> Option<Result<String>> {
            if let Some(next) = self.payloads.pop_front() {
                return Some(next);
            }
            if self.hold_open {
                std::future::pending::<()>().await;
            }
            None
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedConnector {
        scripts: Mutex<VecDeque<Script>>,
        connects: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                ..Default::default()
            })
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn EventSource>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                Some(Script::Serve {
                    payloads,
                    hold_open,
                }) => Ok(Box::new(ScriptedSource {
                    payloads: payloads.into(),
                    hold_open,
                    closed: Arc::clone(&self.closes),
                })),
                Some(Script::Refuse) | None => Err(CountError::TransportClosed),
            }
        }
    }

    fn client(connector: &Arc<ScriptedConnector>) -> LiveEventClient {
        LiveEventClient::new(
            "ws://test/ws/video-count",
            Arc::clone(connector) as Arc<dyn Connector>,
            ReconnectPolicy::default(),
        )
    }

    fn counted(n: u64) -> Result<String> {
        Ok(format!(r#"{{"event":"object_counted","total_count":{n},"detail":{{"n":{n}}}}}"#))
    }

    // -- ConnectionMachine (no I/O) --

    #[test]
    fn machine_schedules_one_reconnect_per_close() {
        let policy = ReconnectPolicy::default();
        let mut m = ConnectionMachine::new();
        assert!(m.begin_connect());
        assert!(m.opened());
        assert_eq!(m.closed(&policy), Some(DEFAULT_RECONNECT_BACKOFF));
        // Error and close arriving together: second signal schedules nothing.
        assert_eq!(m.closed(&policy), None);
        assert!(m.reconnect_pending());
        // The timer owns the next attempt.
        assert!(!m.begin_connect());
        assert!(m.fire_reconnect());
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.attempts(), 2);
    }

    #[test]
    fn machine_refuses_second_transport() {
        let mut m = ConnectionMachine::new();
        assert!(m.begin_connect());
        assert!(!m.begin_connect());
        m.opened();
        assert!(!m.begin_connect());
        assert_eq!(m.attempts(), 1);
    }

    #[test]
    fn machine_stop_cancels_pending_reconnect() {
        let policy = ReconnectPolicy::default();
        let mut m = ConnectionMachine::new();
        m.begin_connect();
        m.opened();
        m.closed(&policy);
        m.stop();
        assert!(!m.reconnect_pending());
        assert!(!m.fire_reconnect());
        // Explicit connect works again.
        assert!(m.begin_connect());
    }

    #[test]
    fn machine_close_after_stop_schedules_nothing() {
        let mut m = ConnectionMachine::new();
        m.begin_connect();
        m.opened();
        m.stop();
        assert_eq!(m.closed(&ReconnectPolicy::default()), None);
        assert_eq!(m.state(), ConnectionState::Closed);
    }

    // -- LiveEventClient with a scripted transport --

    #[tokio::test(start_paused = true)]
    async fn delivers_events_in_order_and_drops_malformed() {
        let connector = ScriptedConnector::new(vec![Script::Serve {
            payloads: vec![
                Ok("{broken".to_string()),
                Ok(r#"{"event":"processed_video_saved","total_count":0}"#.to_string()),
                counted(1),
                counted(2),
            ],
            hold_open: true,
        }]);
        let mut client = client(&connector);
        let mut rx = client.subscribe();
        client.connect();
        assert_eq!(client.state(), ConnectionState::Connecting);

        assert_eq!(rx.recv().await, Some(ClientNotification::Opened));
        assert!(matches!(rx.recv().await, Some(ClientNotification::Diagnostic(_))));
        for n in 1..=2 {
            match rx.recv().await {
                Some(ClientNotification::Event(event)) => assert_eq!(event.total_count(), n),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(client.state(), ConnectionState::Open);

        client.disconnect().await;
        assert_eq!(
            rx.recv().await,
            Some(ClientNotification::Closed { reconnect_in: None })
        );
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn close_schedules_exactly_one_reconnect_after_backoff() {
        let connector = ScriptedConnector::new(vec![
            Script::Serve {
                payloads: vec![],
                hold_open: false,
            },
            Script::Serve {
                payloads: vec![],
                hold_open: true,
            },
        ]);
        let mut client = client(&connector);
        let mut rx = client.subscribe();
        client.connect();

        assert_eq!(rx.recv().await, Some(ClientNotification::Opened));
        assert_eq!(
            rx.recv().await,
            Some(ClientNotification::Closed {
                reconnect_in: Some(DEFAULT_RECONNECT_BACKOFF)
            })
        );
        assert!(client.reconnect_pending());

        // A connect() while the timer is pending does not open a second transport.
        client.connect();
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(connector.connects(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(connector.connects(), 2);
        assert_eq!(rx.recv().await, Some(ClientNotification::Opened));
        assert_eq!(client.attempts(), 2);

        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_before_timer_prevents_reconnect() {
        let connector = ScriptedConnector::new(vec![Script::Serve {
            payloads: vec![],
            hold_open: false,
        }]);
        let mut client = client(&connector);
        let mut rx = client.subscribe();
        client.connect();

        assert_eq!(rx.recv().await, Some(ClientNotification::Opened));
        assert!(matches!(
            rx.recv().await,
            Some(ClientNotification::Closed { reconnect_in: Some(_) })
        ));

        client.disconnect().await;
        assert!(!client.reconnect_pending());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.connects(), 1);
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_again_after_disconnect() {
        let connector = ScriptedConnector::new(vec![
            Script::Serve {
                payloads: vec![],
                hold_open: true,
            },
            Script::Serve {
                payloads: vec![counted(5)],
                hold_open: true,
            },
        ]);
        let mut client = client(&connector);
        let mut rx = client.subscribe();
        client.connect();
        assert_eq!(rx.recv().await, Some(ClientNotification::Opened));
        client.disconnect().await;
        assert!(matches!(rx.recv().await, Some(ClientNotification::Closed { .. })));

        client.connect();
        assert_eq!(rx.recv().await, Some(ClientNotification::Opened));
        assert!(matches!(rx.recv().await, Some(ClientNotification::Event(_))));
        assert_eq!(connector.connects(), 2);
        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_reports_and_retries() {
        let connector = ScriptedConnector::new(vec![
            Script::Refuse,
            Script::Serve {
                payloads: vec![],
                hold_open: true,
            },
        ]);
        let mut client = client(&connector);
        let mut rx = client.subscribe();
        client.connect();

        assert!(matches!(rx.recv().await, Some(ClientNotification::Diagnostic(_))));
        assert_eq!(
            rx.recv().await,
            Some(ClientNotification::Closed {
                reconnect_in: Some(DEFAULT_RECONNECT_BACKOFF)
            })
        );
        assert_eq!(rx.recv().await, Some(ClientNotification::Opened));
        assert_eq!(connector.connects(), 2);
        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_then_close_schedules_once() {
        let connector = ScriptedConnector::new(vec![Script::Serve {
            payloads: vec![Err(CountError::TransportClosed)],
            hold_open: false,
        }]);
        let mut client = client(&connector);
        let mut rx = client.subscribe();
        client.connect();

        assert_eq!(rx.recv().await, Some(ClientNotification::Opened));
        assert!(matches!(rx.recv().await, Some(ClientNotification::Diagnostic(_))));
        assert!(matches!(
            rx.recv().await,
            Some(ClientNotification::Closed { reconnect_in: Some(_) })
        ));
        client.disconnect().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_connect_keeps_one_transport() {
        let connector = ScriptedConnector::new(vec![Script::Serve {
            payloads: vec![],
            hold_open: true,
        }]);
        let mut client = client(&connector);
        let mut rx = client.subscribe();
        client.connect();
        client.connect();
        assert_eq!(rx.recv().await, Some(ClientNotification::Opened));
        client.connect();
        tokio::task::yield_now().await;
        assert_eq!(connector.connects(), 1);
        client.disconnect().await;
    }
}
