//! Connection to the lobby server.
//!
//! [`Connection`] is a thin handle that talks to a background loop owning the
//! [`Transport`]. Commands are queued on an unbounded channel; every command
//! written to the wire is answered by the server with exactly one `OK` or
//! `ERR` line, in order, so replies are correlated FIFO with the commands that
//! caused them. Every other server line is parsed and forwarded as an
//! [`Event`] on the bounded channel returned from [`Connection::start`].
//!
//! The session only depends on the [`ConnectionPort`] trait, which lets tests
//! substitute a recording double.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = TcpTransport::connect("127.0.0.1:7789").await?;
//! let (connection, mut events) = Connection::start(transport, &LobbyConfig::default());
//!
//! let reply = connection.request(Command::Login("Alice".into())).await?;
//! assert!(reply.success);
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         Event::RosterSnapshot { usernames } => { /* … */ }
//!         Event::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::LobbyConfig;
use crate::error::{LobbyError, Result};
use crate::protocol::{self, Command, Event};
use crate::transport::Transport;

/// The server's `OK` / `ERR <message>` answer to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub success: bool,
    /// Empty for `OK`; the server's text for `ERR`.
    pub message: String,
}

/// What the session needs from a connection.
#[async_trait]
pub trait ConnectionPort: Send + Sync + 'static {
    /// Queue a command without waiting for its reply.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyError::NotConnected`] once the connection has closed.
    fn send(&self, command: Command) -> Result<()>;

    /// Send a command and wait for the reply correlated with it.
    ///
    /// # Errors
    ///
    /// - [`LobbyError::NotConnected`] if the connection has already closed.
    /// - [`LobbyError::Timeout`] if no reply arrives within the request timeout.
    /// - [`LobbyError::TransportClosed`] if the connection closes first.
    async fn request(&self, command: Command) -> Result<Reply>;

    /// Whether the connection is up and the server accepted the last command.
    fn is_session_valid(&self) -> bool;

    /// Text of the most recent `OK`/`ERR` reply.
    async fn last_response_message(&self) -> Option<String>;
}

/// A command on its way to the connection loop.
struct Outgoing {
    command: Command,
    reply_tx: Option<oneshot::Sender<Reply>>,
}

/// Shared state updated by the connection loop.
struct ConnectionState {
    connected: AtomicBool,
    last_reply_ok: AtomicBool,
    last_response: Mutex<Option<String>>,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            last_reply_ok: AtomicBool::new(true),
            last_response: Mutex::new(None),
        }
    }
}

/// Handle to a running connection loop.
pub struct Connection {
    cmd_tx: mpsc::UnboundedSender<Outgoing>,
    state: Arc<ConnectionState>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    request_timeout: Duration,
    shutdown_timeout: Duration,
}

impl Connection {
    /// Spawn the connection loop over `transport`.
    ///
    /// The returned receiver yields [`Event`]s until the transport closes; the
    /// last event is always [`Event::Disconnected`].
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(transport: impl Transport, config: &LobbyConfig) -> (Self, mpsc::Receiver<Event>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (event_tx, event_rx) = mpsc::channel::<Event>(config.event_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = Arc::new(ConnectionState::new());
        let task = tokio::spawn(connection_loop(
            transport,
            cmd_rx,
            event_tx,
            Arc::clone(&state),
            shutdown_rx,
        ));

        let connection = Self {
            cmd_tx,
            state,
            task: Mutex::new(Some(task)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            request_timeout: config.request_timeout,
            shutdown_timeout: config.shutdown_timeout,
        };
        (connection, event_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// Close the transport and stop the connection loop.
    ///
    /// Outstanding requests fail with [`LobbyError::TransportClosed`]. Calling
    /// this more than once is harmless.
    pub async fn shutdown(&self) {
        debug!("connection: shutdown requested");

        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }

        let task = self.task.lock().await.take();
        if let Some(mut task) = task {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.connected.store(false, Ordering::Release);
    }

    fn enqueue(&self, command: Command, reply_tx: Option<oneshot::Sender<Reply>>) -> Result<()> {
        if !self.is_connected() {
            return Err(LobbyError::NotConnected);
        }
        self.cmd_tx
            .send(Outgoing { command, reply_tx })
            .map_err(|_| LobbyError::NotConnected)
    }
}

#[async_trait]
impl ConnectionPort for Connection {
    fn send(&self, command: Command) -> Result<()> {
        self.enqueue(command, None)
    }

    async fn request(&self, command: Command) -> Result<Reply> {
        let name = command.name();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(command, Some(reply_tx))?;

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(LobbyError::TransportClosed),
            Err(_) => {
                warn!(command = name, "no reply within {:?}", self.request_timeout);
                Err(LobbyError::Timeout)
            }
        }
    }

    fn is_session_valid(&self) -> bool {
        self.is_connected() && self.state.last_reply_ok.load(Ordering::Acquire)
    }

    async fn last_response_message(&self) -> Option<String> {
        self.state.last_response.lock().await.clone()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // No executor is available here to close the transport gracefully.
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

// ── Connection loop ─────────────────────────────────────────────────

/// Background loop that multiplexes commands and server lines via
/// `tokio::select!`.
///
/// Exits when:
/// - The command channel closes (handle dropped)
/// - The shutdown signal fires
/// - The transport returns `None` (server closed the connection)
/// - A transport error occurs
async fn connection_loop(
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<Outgoing>,
    event_tx: mpsc::Sender<Event>,
    state: Arc<ConnectionState>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("connection loop started");

    // Reply senders of commands already on the wire, oldest first. `None`
    // marks a command nobody is waiting on.
    let mut pending: VecDeque<Option<oneshot::Sender<Reply>>> = VecDeque::new();

    loop {
        tokio::select! {
            outgoing = cmd_rx.recv() => {
                match outgoing {
                    Some(Outgoing { command, reply_tx }) => {
                        debug!(command = command.name(), "sending command");
                        if let Err(e) = transport.send(command.to_line()).await {
                            error!("transport send error: {e}");
                            emit_disconnected(&event_tx, &state, Some(e.to_string())).await;
                            break;
                        }
                        pending.push_back(reply_tx);
                    }
                    None => {
                        debug!("command channel closed, shutting down connection loop");
                        let _ = transport.close().await;
                        emit_disconnected(&event_tx, &state, Some("client shut down".into())).await;
                        break;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                emit_disconnected(&event_tx, &state, Some("client shut down".into())).await;
                break;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(line)) => handle_line(&line, &mut pending, &event_tx, &state).await,
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        emit_disconnected(&event_tx, &state, Some(e.to_string())).await;
                        break;
                    }
                    None => {
                        debug!("transport closed by server");
                        emit_disconnected(&event_tx, &state, None).await;
                        break;
                    }
                }
            }
        }
    }

    debug!(outstanding = pending.len(), "connection loop exited");
}

async fn handle_line(
    line: &str,
    pending: &mut VecDeque<Option<oneshot::Sender<Reply>>>,
    event_tx: &mpsc::Sender<Event>,
    state: &ConnectionState,
) {
    match protocol::parse(line) {
        Event::Reply { success, message } => {
            state.last_reply_ok.store(success, Ordering::Release);
            *state.last_response.lock().await = Some(message.clone());

            let reply = Reply { success, message };
            match pending.pop_front() {
                Some(Some(reply_tx)) => {
                    if let Err(reply) = reply_tx.send(reply) {
                        debug!(success = reply.success, "requester gone, reply discarded");
                    }
                }
                Some(None) => {
                    forward(event_tx, Event::Reply {
                        success: reply.success,
                        message: reply.message,
                    })
                    .await;
                }
                None => {
                    warn!(line, "reply without an outstanding command");
                    forward(event_tx, Event::Reply {
                        success: reply.success,
                        message: reply.message,
                    })
                    .await;
                }
            }
        }
        event @ (Event::RosterSnapshot { .. } | Event::GameListSnapshot { .. }) => {
            emit_event(event_tx, event);
        }
        event => forward(event_tx, event).await,
    }
}

/// Emit a snapshot event. Snapshots are superseded by the next refresh, so
/// when the channel is full the event is dropped with a warning instead of
/// blocking the loop.
fn emit_event(event_tx: &mpsc::Sender<Event>, event: Event) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit an event that must not be lost (challenges, match traffic).
async fn forward(event_tx: &mpsc::Sender<Event>, event: Event) {
    if event_tx.send(event).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
}

/// Mark the connection closed and emit the final
/// [`Disconnected`](Event::Disconnected) event.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<Event>,
    state: &ConnectionState,
    reason: Option<String>,
) {
    state.connected.store(false, Ordering::Release);
    forward(event_tx, Event::Disconnected { reason }).await;
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::ChallengeId;

    /// Transport driven by the test through channels.
    struct ChannelTransport {
        incoming: mpsc::UnboundedReceiver<Option<Result<String>>>,
        sent: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn send(&mut self, line: String) -> Result<()> {
            self.sent
                .send(line)
                .map_err(|e| LobbyError::TransportSend(e.to_string()))
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            match self.incoming.recv().await {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        server: mpsc::UnboundedSender<Option<Result<String>>>,
        sent: mpsc::UnboundedReceiver<String>,
    }

    impl Harness {
        fn say(&self, line: &str) {
            self.server.send(Some(Ok(line.to_string()))).unwrap();
        }
    }

    fn start(config: &LobbyConfig) -> (Connection, mpsc::Receiver<Event>, Harness) {
        let (server, incoming) = mpsc::unbounded_channel();
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let transport = ChannelTransport {
            incoming,
            sent: sent_tx,
        };
        let (connection, events) = Connection::start(transport, config);
        (connection, events, Harness { server, sent })
    }

    #[tokio::test]
    async fn replies_are_correlated_in_order() {
        let (connection, _events, mut harness) = start(&LobbyConfig::default());
        let connection = Arc::new(connection);

        let first = tokio::spawn({
            let connection = Arc::clone(&connection);
            async move { connection.request(Command::Login("Alice".into())).await }
        });
        assert_eq!(harness.sent.recv().await.unwrap(), "login Alice");

        let second = tokio::spawn({
            let connection = Arc::clone(&connection);
            async move {
                connection
                    .request(Command::AcceptChallenge(ChallengeId::new(4)))
                    .await
            }
        });
        assert_eq!(harness.sent.recv().await.unwrap(), "challenge accept 4");

        harness.say("OK");
        harness.say("ERR Challenge does not exist");

        assert!(first.await.unwrap().unwrap().success);
        let rejected = second.await.unwrap().unwrap();
        assert!(!rejected.success);
        assert_eq!(rejected.message, "Challenge does not exist");
        assert!(!connection.is_session_valid());
        assert_eq!(
            connection.last_response_message().await.as_deref(),
            Some("Challenge does not exist")
        );
    }

    #[tokio::test]
    async fn reply_to_plain_send_is_forwarded() {
        let (connection, mut events, mut harness) = start(&LobbyConfig::default());
        connection.send(Command::Subscribe("Reversi".into())).unwrap();
        assert_eq!(harness.sent.recv().await.unwrap(), "subscribe Reversi");

        harness.say("ERR Unknown game");
        assert_eq!(
            events.recv().await.unwrap(),
            Event::Reply {
                success: false,
                message: "Unknown game".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out() {
        let config = LobbyConfig::default().with_request_timeout(Duration::from_secs(10));
        let (connection, _events, _harness) = start(&config);

        let result = connection.request(Command::Login("Alice".into())).await;
        assert!(matches!(result, Err(LobbyError::Timeout)));
    }

    #[tokio::test]
    async fn late_reply_after_timeout_does_not_shift_correlation() {
        let config = LobbyConfig::default().with_request_timeout(Duration::from_millis(20));
        let (connection, _events, mut harness) = start(&config);

        let timed_out = connection.request(Command::Login("Alice".into())).await;
        assert!(matches!(timed_out, Err(LobbyError::Timeout)));
        harness.sent.recv().await.unwrap();

        let connection = Arc::new(connection);
        let next = tokio::spawn({
            let connection = Arc::clone(&connection);
            async move { connection.request(Command::Logout).await }
        });
        harness.sent.recv().await.unwrap();

        harness.say("ERR late");
        harness.say("OK");
        assert!(next.await.unwrap().unwrap().success);
    }

    #[tokio::test]
    async fn server_lines_become_events() {
        let (_connection, mut events, harness) = start(&LobbyConfig::default());
        harness.say(r#"SVR PLAYERLIST ["Alice", "Bob"]"#);
        harness.say("garbage");

        assert_eq!(
            events.recv().await.unwrap(),
            Event::RosterSnapshot {
                usernames: vec!["Alice".into(), "Bob".into()]
            }
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::ParseError { raw, .. } if raw == "garbage"
        ));
    }

    #[tokio::test]
    async fn server_close_emits_disconnected_and_fails_requests() {
        let (connection, mut events, harness) = start(&LobbyConfig::default());
        harness.server.send(None).unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            Event::Disconnected { reason: None }
        );
        assert!(!connection.is_connected());
        assert!(matches!(
            connection.send(Command::GetPlayerList),
            Err(LobbyError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn shutdown_fails_outstanding_request() {
        let (connection, mut events, mut harness) = start(&LobbyConfig::default());
        let connection = Arc::new(connection);

        let request = tokio::spawn({
            let connection = Arc::clone(&connection);
            async move { connection.request(Command::Login("Alice".into())).await }
        });
        harness.sent.recv().await.unwrap();

        connection.shutdown().await;
        assert!(matches!(
            request.await.unwrap(),
            Err(LobbyError::TransportClosed)
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            Event::Disconnected {
                reason: Some("client shut down".into())
            }
        );
        // Idempotent.
        connection.shutdown().await;
    }
}

/// In-memory [`ConnectionPort`] that records commands and answers requests
/// from a script.
#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod recording {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    use async_trait::async_trait;
    use tokio::sync::oneshot;

    use super::{ConnectionPort, Reply};
    use crate::error::{LobbyError, Result};
    use crate::protocol::Command;

    enum Scripted {
        Now(Result<Reply>),
        Later(oneshot::Receiver<Reply>),
    }

    #[derive(Default)]
    pub(crate) struct RecordingPort {
        sent: StdMutex<Vec<Command>>,
        script: StdMutex<VecDeque<Scripted>>,
        disconnected: AtomicBool,
    }

    impl RecordingPort {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Answer the next request with `reply`. Unscripted requests get `OK`.
        pub(crate) fn script(&self, reply: Result<Reply>) {
            self.script.lock().unwrap().push_back(Scripted::Now(reply));
        }

        pub(crate) fn script_err(&self, message: &str) {
            self.script(Ok(Reply {
                success: false,
                message: message.to_string(),
            }));
        }

        /// Hold the next request until the returned sender answers it.
        pub(crate) fn script_later(&self) -> oneshot::Sender<Reply> {
            let (tx, rx) = oneshot::channel();
            self.script.lock().unwrap().push_back(Scripted::Later(rx));
            tx
        }

        pub(crate) fn lines(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(Command::to_line).collect()
        }

        pub(crate) fn count(&self, command: &Command) -> usize {
            self.sent.lock().unwrap().iter().filter(|c| *c == command).count()
        }

        pub(crate) fn clear(&self) {
            self.sent.lock().unwrap().clear();
        }

        pub(crate) fn disconnect(&self) {
            self.disconnected.store(true, Ordering::Release);
        }
    }

    #[async_trait]
    impl ConnectionPort for RecordingPort {
        fn send(&self, command: Command) -> Result<()> {
            if self.disconnected.load(Ordering::Acquire) {
                return Err(LobbyError::NotConnected);
            }
            self.sent.lock().unwrap().push(command);
            Ok(())
        }

        async fn request(&self, command: Command) -> Result<Reply> {
            self.send(command)?;
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Scripted::Now(reply)) => reply,
                Some(Scripted::Later(rx)) => rx.await.map_err(|_| LobbyError::TransportClosed),
                None => Ok(Reply {
                    success: true,
                    message: String::new(),
                }),
            }
        }

        fn is_session_valid(&self) -> bool {
            !self.disconnected.load(Ordering::Acquire)
        }

        async fn last_response_message(&self) -> Option<String> {
            None
        }
    }
}
