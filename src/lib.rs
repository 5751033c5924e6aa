//! # Lobby Session Client
//!
//! Session and match-dispatch core for a multiplayer game lobby that speaks a
//! line-based text protocol.
//!
//! The crate keeps a session with the game server, tracks the online roster
//! and the available games, negotiates challenges and, once a match starts,
//! hands control to the right game module. It renders nothing itself: every
//! user-visible effect is an [`Action`] delivered to a caller-supplied
//! [`ActionDispatcher`].
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement the [`Transport`] trait for any line channel
//! - **TCP built-in**: the default `transport-tcp` feature provides `TcpTransport`
//! - **Explicit state machine**: [`SessionPhase`] is always exactly one phase
//! - **Pluggable games**: register a [`ModuleFactory`] per [`ModuleKind`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lobby_session_client::{ActionDispatcher, LobbyClient, LobbyConfig, LoginRequest, ModuleDispatcher};
//!
//! # async fn example() -> Result<(), lobby_session_client::LobbyError> {
//! let (actions, mut action_rx) = ActionDispatcher::channel();
//! let client = LobbyClient::connect(
//!     "127.0.0.1:7789",
//!     ModuleDispatcher::new(),
//!     actions,
//!     LobbyConfig::default(),
//! )
//! .await?;
//!
//! client.session().login(LoginRequest::human("Alice")).await?;
//! while let Some(action) = action_rx.recv().await {
//!     println!("{}", action.name());
//! }
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod player;
pub mod poller;
pub mod protocol;
pub mod roster;
pub mod session;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use action::{Action, ActionDispatcher, ChallengeDecision, ChallengePrompt, LobbySnapshot};
pub use client::LobbyClient;
pub use config::LobbyConfig;
pub use connection::{Connection, ConnectionPort, Reply};
pub use dispatch::{
    Controller, GameModule, ModuleDispatcher, ModuleFactory, ModuleHandle, ModuleKind, Seat, Side,
};
pub use error::{LobbyError, Result};
pub use player::{Difficulty, Player, PlayerHandle, PlayerKind};
pub use protocol::{parse, Command, Event};
pub use session::{LoginRequest, Session, SessionPhase};
pub use transport::Transport;

#[cfg(feature = "transport-tcp")]
pub use transports::TcpTransport;
