//! # Terminal Lobby Example
//!
//! Demonstrates a complete lobby session lifecycle without a GUI:
//!
//! 1. Connect to a lobby server over TCP
//! 2. Log in
//! 3. Print roster and game list updates
//! 4. Answer challenge prompts (accept with `LOBBY_ACCEPT=1`)
//! 5. Hand matches to a logging game module and return to the lobby when
//!    they end
//! 6. Shut down gracefully on Ctrl+C or disconnect
//!
//! ## Running
//!
//! ```sh
//! # Start a lobby server on localhost:7789, then:
//! cargo run --example terminal_lobby
//!
//! # Override the server address and username:
//! LOBBY_ADDR=10.0.0.5:7789 LOBBY_USER=Alice cargo run --example terminal_lobby
//! ```

use std::sync::Arc;

use lobby_session_client::{
    Action, ActionDispatcher, Event, GameModule, LobbyClient, LobbyConfig, LoginRequest,
    ModuleDispatcher, ModuleHandle, ModuleKind, PlayerHandle, Seat,
};
use tokio::sync::mpsc;

/// Default server address when `LOBBY_ADDR` is not set.
const DEFAULT_ADDR: &str = "127.0.0.1:7789";

/// A game module that only logs what happens in the match.
#[derive(Debug)]
struct LoggingModule {
    kind: ModuleKind,
    local: Seat,
    opponent: PlayerHandle,
    ended: mpsc::UnboundedSender<()>,
}

impl GameModule for LoggingModule {
    fn start_game(&self) {
        tracing::info!(
            "{} started: {} vs {}",
            self.kind,
            self.local.player.username(),
            self.opponent.username()
        );
    }

    fn set_starting_player(&self, player: &PlayerHandle) {
        tracing::info!("{} moves first", player.username());
    }

    fn handle_server_event(&self, event: &Event) {
        match event {
            Event::YourTurn { message } => tracing::info!("Your turn: {message}"),
            Event::MoveMade { player, mv, .. } => tracing::info!("{player} played {mv}"),
            Event::MatchEnded { comment, .. } => {
                tracing::info!("Match over. {comment}");
                let _ = self.ended.send(());
            }
            other => tracing::debug!("Module event: {other:?}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let address = std::env::var("LOBBY_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let username = std::env::var("LOBBY_USER").unwrap_or_else(|_| "RustPlayer".to_string());
    let accept_challenges = std::env::var("LOBBY_ACCEPT").is_ok_and(|v| v == "1");

    // ── Game modules ────────────────────────────────────────────────
    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    let mut modules = ModuleDispatcher::new();
    for kind in [ModuleKind::TicTacToe, ModuleKind::Reversi] {
        let ended = ended_tx.clone();
        modules.register(kind, move |local: Seat, opponent: PlayerHandle| -> ModuleHandle {
            Arc::new(LoggingModule {
                kind,
                local,
                opponent,
                ended: ended.clone(),
            })
        });
    }

    // ── Connect and log in ──────────────────────────────────────────
    tracing::info!("Connecting to {address}");
    let (actions, mut action_rx) = ActionDispatcher::channel();
    let client = LobbyClient::connect(&address, modules, actions, LobbyConfig::default()).await?;
    client.session().login(LoginRequest::human(username)).await?;

    // ── Action loop ─────────────────────────────────────────────────
    loop {
        tokio::select! {
            action = action_rx.recv() => {
                let Some(action) = action else {
                    tracing::info!("Action channel closed, exiting");
                    break;
                };

                match action {
                    Action::ShowLobby(lobby) => {
                        tracing::info!(
                            "In the lobby as {} ({}), {} other player(s) online",
                            lobby.username,
                            lobby.mode,
                            lobby.roster.len()
                        );
                    }
                    Action::UpdateRoster(players) => {
                        let names: Vec<&str> = players.iter().map(|p| p.username()).collect();
                        tracing::info!("Online: {}", names.join(", "));
                    }
                    Action::UpdateGameList(games) => {
                        tracing::info!("Games: {}", games.join(", "));
                    }
                    Action::ShowChallengePrompt(prompt) => {
                        tracing::info!("{}", prompt.message());
                        if accept_challenges {
                            prompt.accept();
                        } else {
                            tracing::info!("Declining (set LOBBY_ACCEPT=1 to accept)");
                            prompt.reject();
                        }
                    }
                    Action::DismissChallenge(id) => {
                        tracing::info!("Challenge #{id} withdrawn");
                    }
                    Action::LaunchModule(module) => {
                        tracing::info!("Launching {module:?}");
                    }
                    Action::StatusMessage { text, .. } => {
                        tracing::info!("{text}");
                    }
                    Action::ShowAlert { title, message } => {
                        tracing::warn!("{title}: {message}");
                        if title == "Connection lost" {
                            break;
                        }
                    }
                }
            }

            Some(()) = ended_rx.recv() => {
                if let Err(e) = client.session().return_to_lobby().await {
                    tracing::warn!("Could not return to the lobby: {e}");
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    if let Err(e) = client.session().logout().await {
        tracing::debug!("Logout failed: {e}");
    }
    client.shutdown().await;
    tracing::info!("Client shut down. Goodbye!");
    Ok(())
}
