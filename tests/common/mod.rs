#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for lobby session client integration tests.
//!
//! Provides two transports: [`MockTransport`] replays a fixed script, and
//! [`ServerTransport`] lets the test play the server one line at a time.
//! Also provides a recording game module and raw server line builders.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use lobby_session_client::{
    Event, GameModule, LobbyError, ModuleDispatcher, ModuleHandle, ModuleKind, PlayerHandle, Seat,
    Transport,
};
use tokio::sync::mpsc;

// ── MockTransport ───────────────────────────────────────────────────

/// A scripted mock transport.
///
/// Scripted server lines are consumed in order by `recv()`. All lines sent
/// by the client are recorded in `sent`.
pub struct MockTransport {
    incoming: VecDeque<Option<Result<String, LobbyError>>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new(
        incoming: Vec<Option<Result<String, LobbyError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, line: String) -> Result<(), LobbyError> {
        self.sent.lock().unwrap().push(line);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, LobbyError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            // No more scripted lines: hang so the connection loop stays
            // alive until shutdown.
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), LobbyError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── ServerTransport ─────────────────────────────────────────────────

/// Transport whose server side is driven by a [`FakeServer`].
pub struct ServerTransport {
    incoming: mpsc::UnboundedReceiver<Option<String>>,
    sent: mpsc::UnboundedSender<String>,
}

/// The test's end of a [`ServerTransport`].
pub struct FakeServer {
    lines: mpsc::UnboundedSender<Option<String>>,
    received: mpsc::UnboundedReceiver<String>,
}

pub fn fake_server() -> (ServerTransport, FakeServer) {
    let (lines, incoming) = mpsc::unbounded_channel();
    let (sent, received) = mpsc::unbounded_channel();
    (
        ServerTransport { incoming, sent },
        FakeServer { lines, received },
    )
}

impl FakeServer {
    /// Push one server line to the client.
    pub fn say(&self, line: impl Into<String>) {
        self.lines.send(Some(line.into())).unwrap();
    }

    /// Close the connection from the server side.
    pub fn hang_up(&self) {
        self.lines.send(None).unwrap();
    }

    /// Next command line the client sent.
    pub async fn expect_line(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(2), self.received.recv())
            .await
            .expect("client sent nothing")
            .expect("client transport dropped")
    }

    /// Next command line, answered with `OK`.
    pub async fn expect_and_ok(&mut self, expected: &str) {
        assert_eq!(self.expect_line().await, expected);
        self.say("OK");
    }

    /// Command lines sent so far and not yet consumed.
    pub fn drain_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.received.try_recv() {
            lines.push(line);
        }
        lines
    }
}

#[async_trait]
impl Transport for ServerTransport {
    async fn send(&mut self, line: String) -> Result<(), LobbyError> {
        self.sent
            .send(line)
            .map_err(|e| LobbyError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, LobbyError>> {
        match self.incoming.recv().await {
            Some(Some(line)) => Some(Ok(line)),
            Some(None) => None,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), LobbyError> {
        Ok(())
    }
}

// ── Game module ─────────────────────────────────────────────────────

/// A game module that records what the session does to it.
#[derive(Debug, Default)]
pub struct RecordingModule {
    pub started: AtomicUsize,
    pub starting_player: StdMutex<Option<String>>,
    pub local_seat: StdMutex<Option<Seat>>,
    pub events: StdMutex<Vec<Event>>,
}

impl GameModule for RecordingModule {
    fn start_game(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn set_starting_player(&self, player: &PlayerHandle) {
        *self.starting_player.lock().unwrap() = Some(player.username());
    }

    fn handle_server_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// A dispatcher that builds a fresh [`RecordingModule`] for both games and
/// keeps every module it built.
pub fn recording_dispatcher() -> (ModuleDispatcher, Arc<StdMutex<Vec<Arc<RecordingModule>>>>) {
    let built: Arc<StdMutex<Vec<Arc<RecordingModule>>>> = Arc::default();
    let factory = {
        let built = Arc::clone(&built);
        move |local: Seat, _opponent: PlayerHandle| -> ModuleHandle {
            let module = Arc::new(RecordingModule::default());
            *module.local_seat.lock().unwrap() = Some(local);
            built.lock().unwrap().push(Arc::clone(&module));
            module
        }
    };
    let dispatcher = ModuleDispatcher::new()
        .with_module(ModuleKind::TicTacToe, factory.clone())
        .with_module(ModuleKind::Reversi, factory);
    (dispatcher, built)
}

// ── Server line builders ────────────────────────────────────────────

pub fn player_list(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("\"{n}\"")).collect();
    format!("SVR PLAYERLIST [{}]", quoted.join(", "))
}

pub fn game_list(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("\"{n}\"")).collect();
    format!("SVR GAMELIST [{}]", quoted.join(", "))
}

pub fn challenge(challenger: &str, id: u32, game_type: &str) -> String {
    format!(
        "SVR GAME CHALLENGE {{CHALLENGER: \"{challenger}\", CHALLENGENUMBER: \"{id}\", GAMETYPE: \"{game_type}\"}}"
    )
}

pub fn match_started(player_to_move: &str, game_type: &str, opponent: &str) -> String {
    format!(
        "SVR GAME MATCH {{PLAYERTOMOVE: \"{player_to_move}\", GAMETYPE: \"{game_type}\", OPPONENT: \"{opponent}\"}}"
    )
}

/// Route library logs to the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Let spawned tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
