//! Session state machine.
//!
//! A [`Session`] owns the local player, the roster, the game list and the
//! running match, and moves between three phases:
//!
//! ```text
//!             login OK              match start
//! LoggedOut ───────────▶ InLobby ───────────────▶ InMatch
//!     ▲                    ▲                         │
//!     │ disconnect/logout  └─────── return to lobby ─┘
//! ```
//!
//! All mutable state sits behind one async mutex. It is held for the whole of
//! each event-handling operation and never across a
//! [`ConnectionPort::request`]; [`Action`]s are collected under the lock and
//! handed to the [`ActionDispatcher`] after it is released.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::action::{Action, ActionDispatcher, ChallengeDecision, ChallengePrompt, LobbySnapshot};
use crate::config::LobbyConfig;
use crate::connection::{ConnectionPort, Reply};
use crate::dispatch::{MatchPlan, ModuleDispatcher, ModuleHandle, ModuleKind, Resolution, Seat, Side};
use crate::error::{LobbyError, Result};
use crate::player::{Color, Difficulty, Player, PlayerHandle, PlayerKind};
use crate::poller::RosterPoller;
use crate::protocol::{Challenge, Command, Event, MatchOutcome, MatchStart};
use crate::roster::RosterStore;

/// Alert title used for every failed login.
const LOGIN_FAILED_TITLE: &str = "Unable to login";

/// Coarse session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    LoggedOut,
    InLobby,
    InMatch,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged out"),
            Self::InLobby => f.write_str("in the lobby"),
            Self::InMatch => f.write_str("in a match"),
        }
    }
}

/// Login screen input.
///
/// # Example
///
/// ```
/// use lobby_session_client::player::{Difficulty, PlayerKind};
/// use lobby_session_client::session::LoginRequest;
///
/// let request = LoginRequest::new("Alice", "AI", true, Some(Difficulty::Easy));
/// assert_eq!(request.kind, PlayerKind::AiEasy);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    /// Free-form mode label chosen on the login screen, echoed in the lobby.
    pub mode: String,
    pub kind: PlayerKind,
}

impl LoginRequest {
    pub fn new(
        username: impl Into<String>,
        mode: impl Into<String>,
        is_ai: bool,
        difficulty: Option<Difficulty>,
    ) -> Self {
        Self {
            username: username.into(),
            mode: mode.into(),
            kind: PlayerKind::from_login(is_ai, difficulty),
        }
    }

    /// A human player in `Player` mode.
    pub fn human(username: impl Into<String>) -> Self {
        Self::new(username, "Player", false, None)
    }

    /// A computer player in `AI` mode.
    pub fn ai(username: impl Into<String>, difficulty: Difficulty) -> Self {
        Self::new(username, "AI", true, Some(difficulty))
    }
}

/// The match currently being played.
#[derive(Debug, Clone)]
pub struct ActiveMatch {
    pub kind: ModuleKind,
    pub game_type: String,
    pub module: ModuleHandle,
    pub local: Seat,
    pub opponent: PlayerHandle,
    pub starting_side: Side,
}

impl ActiveMatch {
    fn new(plan: MatchPlan, module: ModuleHandle) -> Self {
        Self {
            kind: plan.kind,
            game_type: plan.game_type,
            module,
            local: plan.local,
            opponent: plan.opponent,
            starting_side: plan.starting_side,
        }
    }
}

#[derive(Debug, Clone)]
struct LocalPlayer {
    handle: PlayerHandle,
    mode: String,
}

#[derive(Debug)]
enum Phase {
    LoggedOut { pending: Option<LocalPlayer> },
    InLobby { local: LocalPlayer },
    InMatch { local: LocalPlayer, active: ActiveMatch },
}

impl Phase {
    fn public(&self) -> SessionPhase {
        match self {
            Self::LoggedOut { .. } => SessionPhase::LoggedOut,
            Self::InLobby { .. } => SessionPhase::InLobby,
            Self::InMatch { .. } => SessionPhase::InMatch,
        }
    }

    fn local(&self) -> Option<&LocalPlayer> {
        match self {
            Self::LoggedOut { .. } => None,
            Self::InLobby { local } | Self::InMatch { local, .. } => Some(local),
        }
    }
}

struct SessionState {
    phase: Phase,
    roster: RosterStore,
    games: Vec<String>,
    /// Module of a forfeited match, kept until its result arrives.
    forfeited: Option<ModuleHandle>,
}

impl SessionState {
    fn lobby_snapshot(&self, local: &LocalPlayer) -> LobbySnapshot {
        LobbySnapshot {
            username: local.handle.username(),
            mode: local.mode.clone(),
            roster: self.roster.snapshot(),
            games: self.games.clone(),
        }
    }

    fn require(&self, expected: SessionPhase, operation: &'static str) -> Result<()> {
        let phase = self.phase.public();
        if phase == expected {
            Ok(())
        } else {
            Err(LobbyError::InvalidPhase { operation, phase })
        }
    }
}

struct SessionInner {
    id: Uuid,
    port: Arc<dyn ConnectionPort>,
    state: Mutex<SessionState>,
    poller: RosterPoller,
    modules: ModuleDispatcher,
    actions: ActionDispatcher,
}

/// Handle to one lobby session. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a logged-out session. Must be called from within a tokio
    /// runtime; the roster poller is spawned here, paused.
    pub fn new(
        port: Arc<dyn ConnectionPort>,
        modules: ModuleDispatcher,
        actions: ActionDispatcher,
        config: &LobbyConfig,
    ) -> Self {
        let poller = RosterPoller::spawn(Arc::clone(&port), config.roster_refresh_interval);
        let id = Uuid::new_v4();
        debug!(session = %id, "session created");
        Self {
            inner: Arc::new(SessionInner {
                id,
                port,
                state: Mutex::new(SessionState {
                    phase: Phase::LoggedOut { pending: None },
                    roster: RosterStore::new(),
                    games: Vec::new(),
                    forfeited: None,
                }),
                poller,
                modules,
                actions,
            }),
        }
    }

    // ── Login ───────────────────────────────────────────────────────

    /// Log in as `request.username`.
    ///
    /// # Errors
    ///
    /// - [`LobbyError::InvalidUsername`] for a blank username; nothing is sent.
    /// - [`LobbyError::LoginInProgress`] while another login is pending.
    /// - [`LobbyError::AlreadyLoggedIn`] outside [`SessionPhase::LoggedOut`].
    /// - [`LobbyError::LoginRejected`] when the server answers `ERR`.
    /// - Connection errors ([`LobbyError::Timeout`] and friends) from the
    ///   login round trip.
    ///
    /// Every failure after the request went out is also shown as an alert.
    pub async fn login(&self, request: LoginRequest) -> Result<()> {
        let username = request.username.trim();
        if username.is_empty() {
            return Err(LobbyError::InvalidUsername);
        }

        let local = LocalPlayer {
            handle: PlayerHandle::new(
                Player::new(username)
                    .with_color(Color::NEUTRAL)
                    .with_kind(request.kind),
            ),
            mode: request.mode.clone(),
        };
        {
            let mut state = self.inner.state.lock().await;
            match &mut state.phase {
                Phase::LoggedOut { pending: Some(_) } => return Err(LobbyError::LoginInProgress),
                Phase::LoggedOut { pending } => *pending = Some(local),
                _ => return Err(LobbyError::AlreadyLoggedIn),
            }
        }

        if let Some(difficulty) = request.kind.difficulty() {
            self.inner
                .actions
                .dispatch(Action::status(format!("{difficulty} AI selected")));
        }

        info!(session = %self.inner.id, username, "logging in");
        match self.inner.port.request(Command::Login(username.to_string())).await {
            Ok(Reply { success, message }) => self.apply_login_result(success, message).await,
            Err(e) => {
                warn!(session = %self.inner.id, "login round trip failed: {e}");
                self.clear_pending_login().await;
                self.inner
                    .actions
                    .dispatch(Action::alert(LOGIN_FAILED_TITLE, e.to_string()));
                Err(e)
            }
        }
    }

    async fn apply_login_result(&self, success: bool, message: String) -> Result<()> {
        let mut actions = Vec::new();
        let result = {
            let mut state = self.inner.state.lock().await;
            let pending = match &mut state.phase {
                Phase::LoggedOut { pending } => pending.take(),
                _ => None,
            };
            match pending {
                None => {
                    debug!(session = %self.inner.id, success, "login result without a pending login");
                    Err(LobbyError::NotConnected)
                }
                Some(_) if !success => {
                    info!(session = %self.inner.id, %message, "login rejected");
                    actions.push(Action::alert(LOGIN_FAILED_TITLE, message.clone()));
                    Err(LobbyError::LoginRejected { message })
                }
                Some(local) => {
                    info!(session = %self.inner.id, username = %local.handle.username(), "logged in");
                    // The local player never appears in the roster.
                    let username = local.handle.username();
                    let others: Vec<String> = state
                        .roster
                        .players()
                        .iter()
                        .filter(|p| !p.has_username(&username))
                        .map(PlayerHandle::username)
                        .collect();
                    state.roster.reconcile(&others);

                    self.send_or_warn(Command::GetPlayerList);
                    self.send_or_warn(Command::GetGameList);
                    self.inner.poller.resume().await;

                    actions.push(Action::ShowLobby(state.lobby_snapshot(&local)));
                    state.phase = Phase::InLobby { local };
                    Ok(())
                }
            }
        };
        self.inner.actions.dispatch_all(actions);
        result
    }

    async fn clear_pending_login(&self) {
        let mut state = self.inner.state.lock().await;
        if let Phase::LoggedOut { pending } = &mut state.phase {
            *pending = None;
        }
    }

    /// Tell the server goodbye and drop back to [`SessionPhase::LoggedOut`].
    pub async fn logout(&self) -> Result<()> {
        match self.inner.port.send(Command::Logout) {
            Ok(()) | Err(LobbyError::NotConnected) => {}
            Err(e) => return Err(e),
        }
        self.teardown().await;
        Ok(())
    }

    // ── Lobby ───────────────────────────────────────────────────────

    /// Offer a received challenge to the user.
    ///
    /// Ignored unless the session is in the lobby. The prompt's decision is
    /// awaited in the background: accepting sends exactly one
    /// `challenge accept`, rejecting or dropping the prompt sends nothing.
    pub async fn handle_challenge(&self, challenge: Challenge) {
        {
            let state = self.inner.state.lock().await;
            if state.phase.public() != SessionPhase::InLobby {
                debug!(
                    session = %self.inner.id,
                    phase = %state.phase.public(),
                    challenger = %challenge.challenger,
                    "ignoring challenge"
                );
                return;
            }
        }

        let (prompt, decision) = ChallengePrompt::new(challenge.clone());
        self.inner.actions.dispatch(Action::ShowChallengePrompt(prompt));

        let session = self.clone();
        tokio::spawn(async move {
            match decision.await {
                Ok(ChallengeDecision::Accept) => {
                    if let Err(e) = session.accept_challenge(&challenge).await {
                        warn!(challenge_id = %challenge.challenge_id, "accepting challenge failed: {e}");
                    }
                }
                Ok(ChallengeDecision::Reject) => {
                    debug!(challenge_id = %challenge.challenge_id, "challenge rejected");
                }
                Err(_) => {
                    debug!(challenge_id = %challenge.challenge_id, "challenge prompt dismissed");
                }
            }
        });
    }

    /// Accept `challenge` without prompting.
    ///
    /// # Errors
    ///
    /// [`LobbyError::InvalidPhase`] outside the lobby, or the connection error
    /// of the accept round trip. A server `ERR` is returned as a
    /// non-successful [`Reply`] and shown as a status message.
    pub async fn accept_challenge(&self, challenge: &Challenge) -> Result<Reply> {
        self.inner
            .state
            .lock()
            .await
            .require(SessionPhase::InLobby, "accept a challenge")?;

        self.inner.actions.dispatch(Action::status(format!(
            "Accepting challenge from {}",
            challenge.challenger
        )));

        let command = Command::AcceptChallenge(challenge.challenge_id);
        match self.inner.port.request(command).await {
            Ok(reply) => {
                if !reply.success {
                    self.inner.actions.dispatch(Action::status(format!(
                        "Challenge from {} is no longer available: {}",
                        challenge.challenger, reply.message
                    )));
                }
                Ok(reply)
            }
            Err(e) => {
                self.inner.actions.dispatch(Action::status(format!(
                    "Could not accept challenge from {}: {e}",
                    challenge.challenger
                )));
                Err(e)
            }
        }
    }

    /// Subscribe to matchmaking for `game_type`.
    pub async fn subscribe(&self, game_type: &str) -> Result<()> {
        self.inner
            .state
            .lock()
            .await
            .require(SessionPhase::InLobby, "subscribe")?;
        self.inner.port.send(Command::Subscribe(game_type.to_string()))
    }

    /// Challenge `opponent` to a game of `game_type`.
    pub async fn challenge(&self, opponent: &str, game_type: &str) -> Result<()> {
        self.inner
            .state
            .lock()
            .await
            .require(SessionPhase::InLobby, "challenge a player")?;
        self.inner.port.send(Command::Challenge {
            opponent: opponent.to_string(),
            game_type: game_type.to_string(),
        })
    }

    // ── Match ───────────────────────────────────────────────────────

    /// Launch the game module for a match announced by the server.
    ///
    /// Ignored unless the session is in the lobby. An unsupported game type
    /// leaves the session in the lobby and shows a status message.
    pub async fn handle_match_started(&self, start: MatchStart) {
        let mut actions = Vec::new();
        let launched = {
            let mut state = self.inner.state.lock().await;
            let local = match &state.phase {
                Phase::InLobby { local } => local.clone(),
                other => {
                    debug!(session = %self.inner.id, phase = %other.public(), "ignoring match start");
                    return;
                }
            };

            let resolution = self.inner.modules.resolve(
                &start.game_type,
                &local.handle,
                &start.opponent,
                &start.starting_player,
            );
            match resolution {
                Resolution::Unsupported { game_type } => {
                    info!(session = %self.inner.id, %game_type, "no module for game type");
                    actions.push(Action::status(format!("Unsupported game module {game_type}")));
                    None
                }
                Resolution::Launch(plan) => match self.inner.modules.launch(&plan) {
                    Err(e) => {
                        actions.push(Action::status(e.to_string()));
                        None
                    }
                    Ok(module) => {
                        info!(
                            session = %self.inner.id,
                            game_type = %plan.game_type,
                            opponent = %start.opponent,
                            starting_side = ?plan.starting_side,
                            "match started"
                        );
                        self.inner.poller.pause().await;
                        state.forfeited = None;
                        actions.push(Action::persistent_status(format!(
                            "Loading game module {}",
                            plan.game_type
                        )));
                        actions.push(Action::LaunchModule(Arc::clone(&module)));
                        state.phase = Phase::InMatch {
                            local,
                            active: ActiveMatch::new(plan, Arc::clone(&module)),
                        };
                        Some(module)
                    }
                },
            }
        };

        self.inner.actions.dispatch_all(actions);
        if let Some(module) = launched {
            module.start_game();
        }
    }

    /// Leave the running match and show the lobby again.
    ///
    /// The end of a match does not do this by itself: after `SVR GAME WIN`,
    /// `LOSS` or `DRAW` the module stays active so the result can be shown,
    /// and the view or module calls this (or [`forfeit`](Self::forfeit))
    /// when the player is done with it.
    ///
    /// # Errors
    ///
    /// [`LobbyError::InvalidPhase`] unless the session is in a match.
    pub async fn return_to_lobby(&self) -> Result<()> {
        self.leave_match(false).await
    }

    async fn leave_match(&self, forfeited: bool) -> Result<()> {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            let phase = std::mem::replace(&mut state.phase, Phase::LoggedOut { pending: None });
            match phase {
                Phase::InMatch { local, active } => {
                    debug!(session = %self.inner.id, game_type = %active.game_type, forfeited, "returning to lobby");
                    state.forfeited = forfeited.then(|| Arc::clone(&active.module));
                    drop(active);
                    self.inner.poller.resume().await;
                    self.send_or_warn(Command::GetPlayerList);
                    let snapshot = state.lobby_snapshot(&local);
                    state.phase = Phase::InLobby { local };
                    snapshot
                }
                other => {
                    let phase = other.public();
                    state.phase = other;
                    return Err(LobbyError::InvalidPhase {
                        operation: "return to lobby",
                        phase,
                    });
                }
            }
        };
        self.inner.actions.dispatch(Action::ShowLobby(snapshot));
        Ok(())
    }

    /// Send a move in the running match.
    pub async fn send_move(&self, mv: &str) -> Result<()> {
        self.inner
            .state
            .lock()
            .await
            .require(SessionPhase::InMatch, "send a move")?;
        self.inner.port.send(Command::Move(mv.to_string()))
    }

    /// Give up the running match and return to the lobby.
    ///
    /// The server answers a forfeit with `SVR GAME LOSS`, which usually
    /// arrives after the session is back in the lobby. That one result is
    /// still shown and handed to the forfeited module.
    pub async fn forfeit(&self) -> Result<()> {
        self.inner
            .state
            .lock()
            .await
            .require(SessionPhase::InMatch, "forfeit")?;
        self.inner.port.send(Command::Forfeit)?;
        self.leave_match(true).await
    }

    // ── Events ──────────────────────────────────────────────────────

    /// Apply one server event.
    ///
    /// Match traffic goes to the active module. A match result leaves the
    /// session in the match; see [`return_to_lobby`](Self::return_to_lobby).
    pub async fn handle_event(&self, event: Event) {
        match event {
            Event::RosterSnapshot { usernames } => self.update_roster(&usernames).await,
            Event::GameListSnapshot { names } => self.update_game_list(names).await,
            Event::ChallengeReceived(challenge) => self.handle_challenge(challenge).await,
            Event::ChallengeCancelled { challenge_id } => {
                let in_lobby = self.phase().await == SessionPhase::InLobby;
                if in_lobby {
                    self.inner
                        .actions
                        .dispatch(Action::DismissChallenge(challenge_id));
                }
            }
            Event::MatchStarted(start) => self.handle_match_started(start).await,
            event @ (Event::YourTurn { .. } | Event::MoveMade { .. } | Event::MatchEnded { .. }) => {
                self.forward_to_module(event).await;
            }
            Event::LoginResult { success, message } => {
                if let Err(e) = self.apply_login_result(success, message).await {
                    debug!(session = %self.inner.id, "login result: {e}");
                }
            }
            Event::Reply { success: true, .. } => {
                debug!(session = %self.inner.id, "command acknowledged");
            }
            Event::Reply {
                success: false,
                message,
            } => {
                warn!(session = %self.inner.id, %message, "server rejected command");
            }
            Event::ParseError { raw, reason } => {
                if reason.is_malformed() {
                    warn!(session = %self.inner.id, %raw, "malformed server message: {reason}");
                    self.inner
                        .actions
                        .dispatch(Action::status(format!("Ignored malformed server message: {reason}")));
                } else {
                    debug!(session = %self.inner.id, %raw, "unrecognized server line: {reason}");
                }
            }
            Event::Disconnected { reason } => {
                info!(session = %self.inner.id, ?reason, "disconnected");
                self.teardown().await;
                self.inner.actions.dispatch(Action::alert(
                    "Connection lost",
                    reason.unwrap_or_else(|| "The server closed the connection.".to_string()),
                ));
            }
        }
    }

    /// Feed every event from `events` into [`handle_event`](Self::handle_event)
    /// until the channel closes.
    pub async fn run(&self, mut events: mpsc::Receiver<Event>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!(session = %self.inner.id, "event stream ended");
    }

    async fn update_roster(&self, usernames: &[String]) {
        let mut state = self.inner.state.lock().await;
        let local = state.phase.local().map(|local| local.handle.clone());
        let others: Vec<&String> = usernames
            .iter()
            .filter(|name| !local.as_ref().is_some_and(|local| local.has_username(name)))
            .collect();
        state.roster.reconcile(&others);

        if state.phase.public() == SessionPhase::InLobby {
            let roster = state.roster.snapshot();
            drop(state);
            self.inner.actions.dispatch(Action::UpdateRoster(roster));
        }
    }

    async fn update_game_list(&self, names: Vec<String>) {
        let mut state = self.inner.state.lock().await;
        state.games = names;

        if state.phase.public() == SessionPhase::InLobby {
            let games = state.games.clone();
            drop(state);
            self.inner.actions.dispatch(Action::UpdateGameList(games));
        }
    }

    async fn forward_to_module(&self, event: Event) {
        let module = {
            let mut state = self.inner.state.lock().await;
            if let Phase::InMatch { active, .. } = &state.phase {
                Some(Arc::clone(&active.module))
            } else if matches!(event, Event::MatchEnded { .. })
                && state.phase.public() == SessionPhase::InLobby
            {
                state.forfeited.take()
            } else {
                None
            }
        };
        let Some(module) = module else {
            debug!(session = %self.inner.id, "match traffic outside a match");
            return;
        };

        if let Event::MatchEnded {
            outcome,
            player_one_score,
            player_two_score,
            ..
        } = &event
        {
            let verdict = match outcome {
                MatchOutcome::Win => "You won",
                MatchOutcome::Loss => "You lost",
                MatchOutcome::Draw => "Draw",
            };
            self.inner.actions.dispatch(Action::persistent_status(format!(
                "{verdict} ({player_one_score} - {player_two_score})"
            )));
        }
        module.handle_server_event(&event);
    }

    /// Drop everything tied to the logged-in user.
    async fn teardown(&self) {
        let mut state = self.inner.state.lock().await;
        state.phase = Phase::LoggedOut { pending: None };
        state.roster.clear();
        state.games.clear();
        state.forfeited = None;
        self.inner.poller.pause().await;
    }

    fn send_or_warn(&self, command: Command) {
        let name = command.name();
        if let Err(e) = self.inner.port.send(command) {
            warn!(session = %self.inner.id, command = name, "send failed: {e}");
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// Identifier used to correlate this session's log lines.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub async fn phase(&self) -> SessionPhase {
        self.inner.state.lock().await.phase.public()
    }

    pub async fn local_player(&self) -> Option<PlayerHandle> {
        self.inner
            .state
            .lock()
            .await
            .phase
            .local()
            .map(|local| local.handle.clone())
    }

    /// Online players other than the local one, in server order.
    pub async fn roster(&self) -> Vec<PlayerHandle> {
        self.inner.state.lock().await.roster.players().to_vec()
    }

    pub async fn game_list(&self) -> Vec<String> {
        self.inner.state.lock().await.games.clone()
    }

    pub async fn active_match(&self) -> Option<ActiveMatch> {
        match &self.inner.state.lock().await.phase {
            Phase::InMatch { active, .. } => Some(active.clone()),
            _ => None,
        }
    }

    pub async fn active_module(&self) -> Option<ModuleHandle> {
        self.active_match().await.map(|active| active.module)
    }

    /// Stop background work owned by the session.
    pub async fn shutdown(&self) {
        self.inner.poller.shutdown().await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
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
    use crate::connection::recording::RecordingPort;
    use crate::dispatch::GameModule;
    use crate::protocol::ChallengeId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    #[derive(Debug, Default)]
    struct TestModule {
        started: AtomicUsize,
        events: StdMutex<Vec<Event>>,
    }

    impl GameModule for TestModule {
        fn start_game(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn handle_server_event(&self, event: &Event) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    struct Fixture {
        session: Session,
        port: Arc<RecordingPort>,
        actions: UnboundedReceiver<Action>,
        module: Arc<TestModule>,
    }

    impl Fixture {
        fn new() -> Self {
            let port = RecordingPort::new();
            let module = Arc::new(TestModule::default());
            let shared = Arc::clone(&module);
            let factory = move |_: Seat, _: PlayerHandle| -> ModuleHandle { shared.clone() };
            let modules = ModuleDispatcher::new()
                .with_module(ModuleKind::TicTacToe, factory.clone())
                .with_module(ModuleKind::Reversi, factory);
            let (dispatcher, actions) = ActionDispatcher::channel();
            let session = Session::new(port.clone(), modules, dispatcher, &LobbyConfig::default());
            Self {
                session,
                port,
                actions,
                module,
            }
        }

        async fn logged_in(username: &str) -> Self {
            let mut fixture = Self::new();
            fixture
                .session
                .login(LoginRequest::human(username))
                .await
                .unwrap();
            fixture.drain();
            fixture.port.clear();
            fixture
        }

        async fn in_match() -> Self {
            let mut fixture = Self::logged_in("Alice").await;
            fixture.session.handle_match_started(reversi_vs_bob()).await;
            fixture.drain();
            fixture.port.clear();
            fixture
        }

        fn drain(&mut self) -> Vec<Action> {
            let mut actions = Vec::new();
            while let Ok(action) = self.actions.try_recv() {
                actions.push(action);
            }
            actions
        }
    }

    fn reversi_vs_bob() -> MatchStart {
        MatchStart {
            starting_player: "Bob".into(),
            game_type: "Reversi".into(),
            opponent: "Bob".into(),
        }
    }

    fn challenge_42() -> Challenge {
        Challenge {
            challenger: "Carol".into(),
            challenge_id: ChallengeId::new(42),
            game_type: "Reversi".into(),
        }
    }

    fn statuses(actions: &[Action]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::StatusMessage { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn login_success_enters_lobby() {
        let mut f = Fixture::new();
        f.session.login(LoginRequest::human("Alice")).await.unwrap();

        assert_eq!(f.session.phase().await, SessionPhase::InLobby);
        assert_eq!(
            f.port.lines(),
            vec!["login Alice", "get playerlist", "get gamelist"]
        );
        let actions = f.drain();
        assert!(matches!(
            actions.last(),
            Some(Action::ShowLobby(snapshot)) if snapshot.username == "Alice" && snapshot.mode == "Player"
        ));
        let local = f.session.local_player().await.unwrap();
        assert_eq!(local.snapshot().color(), Some(Color::NEUTRAL));
    }

    #[tokio::test]
    async fn rejected_login_alerts_and_allows_retry() {
        let mut f = Fixture::new();
        f.port.script_err("Duplicate name exists");

        let err = f.session.login(LoginRequest::human("Alice")).await.unwrap_err();
        assert!(matches!(err, LobbyError::LoginRejected { ref message } if message == "Duplicate name exists"));
        assert_eq!(f.session.phase().await, SessionPhase::LoggedOut);
        assert!(matches!(
            f.drain().as_slice(),
            [Action::ShowAlert { title, message }] if title == "Unable to login" && message == "Duplicate name exists"
        ));

        f.session.login(LoginRequest::human("Alice")).await.unwrap();
        assert_eq!(f.session.phase().await, SessionPhase::InLobby);
    }

    #[tokio::test]
    async fn login_timeout_alerts() {
        let mut f = Fixture::new();
        f.port.script(Err(LobbyError::Timeout));

        assert!(matches!(
            f.session.login(LoginRequest::human("Alice")).await,
            Err(LobbyError::Timeout)
        ));
        assert!(matches!(f.drain().as_slice(), [Action::ShowAlert { .. }]));
        assert_eq!(f.session.phase().await, SessionPhase::LoggedOut);
    }

    #[tokio::test]
    async fn second_login_while_pending_is_rejected() {
        let f = Fixture::new();
        let answer = f.port.script_later();

        let first = tokio::spawn({
            let session = f.session.clone();
            async move { session.login(LoginRequest::human("Alice")).await }
        });
        while f.port.lines().is_empty() {
            tokio::task::yield_now().await;
        }

        let second = f.session.login(LoginRequest::human("Mallory")).await;
        assert!(matches!(second, Err(LobbyError::LoginInProgress)));
        assert_eq!(f.port.lines(), vec!["login Alice"]);

        answer
            .send(Reply {
                success: true,
                message: String::new(),
            })
            .unwrap();
        first.await.unwrap().unwrap();
        assert_eq!(
            f.session.local_player().await.unwrap().username(),
            "Alice"
        );
    }

    #[tokio::test]
    async fn login_while_in_lobby_is_rejected() {
        let f = Fixture::logged_in("Alice").await;
        assert!(matches!(
            f.session.login(LoginRequest::human("Alice")).await,
            Err(LobbyError::AlreadyLoggedIn)
        ));
        assert!(f.port.lines().is_empty());
    }

    #[tokio::test]
    async fn blank_username_sends_nothing() {
        let f = Fixture::new();
        assert!(matches!(
            f.session.login(LoginRequest::human("  ")).await,
            Err(LobbyError::InvalidUsername)
        ));
        assert!(f.port.lines().is_empty());
    }

    #[tokio::test]
    async fn ai_login_reports_difficulty() {
        let mut f = Fixture::new();
        f.session
            .login(LoginRequest::ai("Bot", Difficulty::Easy))
            .await
            .unwrap();

        assert_eq!(statuses(&f.drain()), vec!["Easy AI selected"]);
        let local = f.session.local_player().await.unwrap();
        assert_eq!(local.kind(), PlayerKind::AiEasy);
    }

    #[tokio::test]
    async fn roster_excludes_local_player() {
        let mut f = Fixture::logged_in("Alice").await;
        f.session
            .handle_event(Event::RosterSnapshot {
                usernames: vec!["Bob".into(), "Alice".into(), "Carol".into()],
            })
            .await;

        let names: Vec<String> = f.session.roster().await.iter().map(PlayerHandle::username).collect();
        assert_eq!(names, vec!["Bob", "Carol"]);
        assert!(matches!(
            f.drain().as_slice(),
            [Action::UpdateRoster(players)] if players.len() == 2
        ));
    }

    #[tokio::test]
    async fn accepted_challenge_sends_one_accept() {
        let mut f = Fixture::logged_in("Alice").await;
        f.session.handle_challenge(challenge_42()).await;

        let prompt = match f.actions.recv().await.unwrap() {
            Action::ShowChallengePrompt(prompt) => prompt,
            other => panic!("unexpected action {other:?}"),
        };
        assert_eq!(prompt.challenger(), "Carol");
        prompt.accept();

        let status = f.actions.recv().await.unwrap();
        assert!(matches!(
            status,
            Action::StatusMessage { text, .. } if text == "Accepting challenge from Carol"
        ));
        assert_eq!(f.port.lines(), vec!["challenge accept 42"]);
    }

    #[tokio::test]
    async fn rejected_challenge_sends_nothing() {
        let mut f = Fixture::logged_in("Alice").await;
        f.session.handle_challenge(challenge_42()).await;

        match f.actions.recv().await.unwrap() {
            Action::ShowChallengePrompt(prompt) => prompt.reject(),
            other => panic!("unexpected action {other:?}"),
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(f.port.lines().is_empty());
    }

    #[tokio::test]
    async fn challenge_during_match_is_ignored() {
        let mut f = Fixture::in_match().await;
        f.session.handle_challenge(challenge_42()).await;

        assert!(f.drain().is_empty());
        assert_eq!(f.session.phase().await, SessionPhase::InMatch);
    }

    #[tokio::test]
    async fn match_start_launches_module() {
        let mut f = Fixture::logged_in("Alice").await;
        f.session.handle_match_started(reversi_vs_bob()).await;

        assert_eq!(f.session.phase().await, SessionPhase::InMatch);
        assert_eq!(f.module.started.load(Ordering::SeqCst), 1);
        let active = f.session.active_match().await.unwrap();
        assert_eq!(active.starting_side, Side::Opponent);
        assert_eq!(active.opponent.username(), "Bob");

        let actions = f.drain();
        assert!(matches!(
            actions.as_slice(),
            [
                Action::StatusMessage { text, persistent: true },
                Action::LaunchModule(_)
            ] if text == "Loading game module Reversi"
        ));
    }

    #[tokio::test]
    async fn unsupported_game_stays_in_lobby() {
        let mut f = Fixture::logged_in("Alice").await;
        f.session
            .handle_match_started(MatchStart {
                starting_player: "Bob".into(),
                game_type: "chess".into(),
                opponent: "Bob".into(),
            })
            .await;

        assert_eq!(f.session.phase().await, SessionPhase::InLobby);
        assert_eq!(statuses(&f.drain()), vec!["Unsupported game module chess"]);
        assert_eq!(f.module.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn match_start_outside_lobby_is_ignored() {
        let f = Fixture::new();
        f.session.handle_match_started(reversi_vs_bob()).await;
        assert_eq!(f.session.phase().await, SessionPhase::LoggedOut);
    }

    #[tokio::test]
    async fn match_traffic_reaches_module() {
        let mut f = Fixture::in_match().await;
        f.session
            .handle_event(Event::YourTurn {
                message: "Your move".into(),
            })
            .await;
        f.session
            .handle_event(Event::MatchEnded {
                outcome: MatchOutcome::Win,
                player_one_score: 1,
                player_two_score: 0,
                comment: String::new(),
            })
            .await;

        assert_eq!(f.module.events.lock().unwrap().len(), 2);
        assert_eq!(statuses(&f.drain()), vec!["You won (1 - 0)"]);
    }

    #[tokio::test]
    async fn return_to_lobby_refreshes_roster() {
        let mut f = Fixture::in_match().await;
        f.session.return_to_lobby().await.unwrap();

        assert_eq!(f.session.phase().await, SessionPhase::InLobby);
        assert!(f.session.active_module().await.is_none());
        assert_eq!(f.port.lines(), vec!["get playerlist"]);
        assert!(matches!(f.drain().as_slice(), [Action::ShowLobby(_)]));
        assert!(f.session.local_player().await.is_some());
    }

    #[tokio::test]
    async fn return_to_lobby_outside_match_fails() {
        let f = Fixture::logged_in("Alice").await;
        assert!(matches!(
            f.session.return_to_lobby().await,
            Err(LobbyError::InvalidPhase {
                phase: SessionPhase::InLobby,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn forfeit_sends_and_returns() {
        let f = Fixture::in_match().await;
        f.session.forfeit().await.unwrap();

        assert_eq!(f.port.lines(), vec!["forfeit", "get playerlist"]);
        assert_eq!(f.session.phase().await, SessionPhase::InLobby);
    }

    fn lost_zero_one() -> Event {
        Event::MatchEnded {
            outcome: MatchOutcome::Loss,
            player_one_score: 0,
            player_two_score: 1,
            comment: "Forfeit".into(),
        }
    }

    #[tokio::test]
    async fn match_end_keeps_module_until_return() {
        let mut f = Fixture::in_match().await;
        f.session.handle_event(lost_zero_one()).await;

        assert_eq!(f.session.phase().await, SessionPhase::InMatch);
        assert!(f.session.active_module().await.is_some());
        let actions = f.drain();
        assert!(!actions.iter().any(|a| matches!(a, Action::ShowLobby(_))));
        assert_eq!(statuses(&actions), vec!["You lost (0 - 1)"]);
    }

    #[tokio::test]
    async fn forfeit_result_after_returning_is_shown() {
        let mut f = Fixture::in_match().await;
        f.session.forfeit().await.unwrap();
        f.drain();

        f.session.handle_event(lost_zero_one()).await;
        f.session.handle_event(lost_zero_one()).await;

        assert_eq!(f.session.phase().await, SessionPhase::InLobby);
        assert!(matches!(
            f.drain().as_slice(),
            [Action::StatusMessage { text, persistent: true }] if text == "You lost (0 - 1)"
        ));
        assert_eq!(f.module.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn result_after_plain_return_is_dropped() {
        let mut f = Fixture::in_match().await;
        f.session.return_to_lobby().await.unwrap();
        f.drain();

        f.session.handle_event(lost_zero_one()).await;

        assert!(f.drain().is_empty());
        assert!(f.module.events.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn roster_refresh_pauses_for_match_and_resumes_in_lobby() {
        let f = Fixture::logged_in("Alice").await;
        let refreshes = || f.port.count(&Command::GetPlayerList);

        // Ticks at 5 and 10 s.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(refreshes(), 2);

        f.session.handle_match_started(reversi_vs_bob()).await;
        f.port.clear();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(refreshes(), 0);

        // One immediate request, then ticks at 45 and 50 s.
        f.session.return_to_lobby().await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(refreshes(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn roster_refresh_continues_after_accepting_challenge() {
        let mut f = Fixture::logged_in("Alice").await;
        f.session.handle_challenge(challenge_42()).await;
        match f.actions.recv().await.unwrap() {
            Action::ShowChallengePrompt(prompt) => prompt.accept(),
            other => panic!("unexpected action {other:?}"),
        }
        while f.port.lines().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(f.port.lines(), vec!["challenge accept 42"]);
        assert_eq!(f.session.phase().await, SessionPhase::InLobby);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(f.port.count(&Command::GetPlayerList) >= 2);
    }

    #[tokio::test]
    async fn disconnect_tears_down() {
        let mut f = Fixture::in_match().await;
        f.session
            .handle_event(Event::Disconnected { reason: None })
            .await;

        assert_eq!(f.session.phase().await, SessionPhase::LoggedOut);
        assert!(f.session.local_player().await.is_none());
        assert!(f.session.roster().await.is_empty());
        assert!(matches!(
            f.drain().as_slice(),
            [Action::ShowAlert { title, .. }] if title == "Connection lost"
        ));
    }

    #[tokio::test]
    async fn malformed_message_becomes_status() {
        let mut f = Fixture::logged_in("Alice").await;
        f.session
            .handle_event(crate::protocol::parse(
                r#"SVR GAME CHALLENGE {CHALLENGER: "Bob", CHALLENGENUMBER: "x", GAMETYPE: "Reversi"}"#,
            ))
            .await;
        f.session.handle_event(crate::protocol::parse("hello")).await;

        let actions = f.drain();
        assert_eq!(actions.len(), 1);
        assert!(!actions.iter().any(|a| matches!(a, Action::ShowChallengePrompt(_))));
    }
}
