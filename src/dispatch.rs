//! Game module dispatch.
//!
//! When the server announces a match, [`ModuleDispatcher::resolve`] maps the
//! server's game type string to a [`ModuleKind`], specialises the local
//! player's [`PlayerKind`] into a per-module [`Controller`], and decides which
//! side moves first. [`ModuleDispatcher::launch`] then builds the module from
//! the factory registered for that kind.
//!
//! The dispatcher never looks inside a module beyond the [`GameModule`]
//! trait.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LobbyError, Result};
use crate::player::{Difficulty, Player, PlayerHandle, PlayerKind};
use crate::protocol::Event;

/// Game modules the client knows how to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleKind {
    TicTacToe,
    Reversi,
}

impl ModuleKind {
    /// Map a server game type to a module. Matching is case-sensitive.
    pub fn from_game_type(game_type: &str) -> Option<Self> {
        match game_type {
            "Tic-tac-toe" | "Tictactoe" => Some(Self::TicTacToe),
            "Reversi" => Some(Self::Reversi),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TicTacToe => f.write_str("Tic-tac-toe"),
            Self::Reversi => f.write_str("Reversi"),
        }
    }
}

/// An AI specialised for one game module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiStrategy {
    pub module: ModuleKind,
    pub difficulty: Difficulty,
}

/// What drives a seat during a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Controller {
    Human,
    Ai(AiStrategy),
}

impl Controller {
    /// Specialise a generic player kind for `module`.
    pub fn specialize(kind: PlayerKind, module: ModuleKind) -> Self {
        match kind.difficulty() {
            None => Self::Human,
            Some(difficulty) => Self::Ai(AiStrategy { module, difficulty }),
        }
    }
}

/// A player taking part in a match together with its controller.
#[derive(Debug, Clone)]
pub struct Seat {
    pub player: PlayerHandle,
    pub controller: Controller,
}

/// Which side of a match moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Local,
    Opponent,
}

/// A running game implementation.
///
/// Modules are shared between the session and the view layer, so every
/// method takes `&self`; implementations use interior mutability for their
/// board state.
pub trait GameModule: Send + Sync + fmt::Debug {
    /// Begin play. Called once, after the module has been handed to the view.
    fn start_game(&self);

    /// Tell the module who moves first.
    fn set_starting_player(&self, _player: &PlayerHandle) {}

    /// In-match server traffic (turn prompts, moves, results).
    fn handle_server_event(&self, _event: &Event) {}
}

/// Shared handle to a running game module.
pub type ModuleHandle = Arc<dyn GameModule>;

/// Constructor for one kind of game module.
pub trait ModuleFactory: Send + Sync {
    fn create(&self, local: Seat, opponent: PlayerHandle) -> ModuleHandle;
}

impl<F> ModuleFactory for F
where
    F: Fn(Seat, PlayerHandle) -> ModuleHandle + Send + Sync,
{
    fn create(&self, local: Seat, opponent: PlayerHandle) -> ModuleHandle {
        self(local, opponent)
    }
}

/// Everything needed to launch a resolved match.
#[derive(Debug, Clone)]
pub struct MatchPlan {
    pub kind: ModuleKind,
    /// Game type exactly as the server sent it.
    pub game_type: String,
    pub local: Seat,
    pub opponent: PlayerHandle,
    pub starting_side: Side,
}

impl MatchPlan {
    pub fn starting_player(&self) -> &PlayerHandle {
        match self.starting_side {
            Side::Local => &self.local.player,
            Side::Opponent => &self.opponent,
        }
    }
}

/// Outcome of [`ModuleDispatcher::resolve`].
#[derive(Debug, Clone)]
pub enum Resolution {
    Launch(MatchPlan),
    Unsupported { game_type: String },
}

/// Dispatch table from [`ModuleKind`] to module constructor.
#[derive(Default)]
pub struct ModuleDispatcher {
    factories: HashMap<ModuleKind, Box<dyn ModuleFactory>>,
}

impl ModuleDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `kind`, replacing any previous one.
    #[must_use]
    pub fn with_module(mut self, kind: ModuleKind, factory: impl ModuleFactory + 'static) -> Self {
        self.register(kind, factory);
        self
    }

    pub fn register(&mut self, kind: ModuleKind, factory: impl ModuleFactory + 'static) {
        self.factories.insert(kind, Box::new(factory));
    }

    /// Resolve a server match announcement against the local player.
    ///
    /// The opponent is an identity-only player. `starting_player` is compared
    /// by exact username: the opponent starts only if it names the opponent,
    /// otherwise the local player starts.
    pub fn resolve(
        &self,
        game_type: &str,
        local: &PlayerHandle,
        opponent_name: &str,
        starting_player: &str,
    ) -> Resolution {
        let Some(kind) = ModuleKind::from_game_type(game_type)
            .filter(|kind| self.factories.contains_key(kind))
        else {
            return Resolution::Unsupported {
                game_type: game_type.to_string(),
            };
        };

        let starting_side = if starting_player == opponent_name {
            Side::Opponent
        } else {
            if !local.has_username(starting_player) {
                warn!(
                    starting_player,
                    opponent = opponent_name,
                    "starting player matches neither side; local player starts"
                );
            }
            Side::Local
        };

        let controller = Controller::specialize(local.kind(), kind);
        debug!(%kind, ?controller, ?starting_side, "resolved match");

        Resolution::Launch(MatchPlan {
            kind,
            game_type: game_type.to_string(),
            local: Seat {
                player: local.clone(),
                controller,
            },
            opponent: PlayerHandle::new(Player::new(opponent_name)),
            starting_side,
        })
    }

    /// Construct the module for `plan` and tell it who starts.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyError::UnsupportedGameType`] if no factory is registered
    /// for the plan's kind.
    pub fn launch(&self, plan: &MatchPlan) -> Result<ModuleHandle> {
        let factory = self
            .factories
            .get(&plan.kind)
            .ok_or_else(|| LobbyError::UnsupportedGameType(plan.game_type.clone()))?;
        let module = factory.create(plan.local.clone(), plan.opponent.clone());
        module.set_starting_player(plan.starting_player());
        Ok(module)
    }
}

impl fmt::Debug for ModuleDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDispatcher")
            .field("modules", &self.factories.keys().collect::<Vec<_>>())
            .finish()
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
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingModule {
        starting: Mutex<Option<String>>,
    }

    impl GameModule for RecordingModule {
        fn start_game(&self) {}

        fn set_starting_player(&self, player: &PlayerHandle) {
            *self.starting.lock().unwrap() = Some(player.username());
        }
    }

    fn dispatcher() -> ModuleDispatcher {
        let factory = |_: Seat, _: PlayerHandle| -> ModuleHandle { Arc::new(RecordingModule::default()) };
        ModuleDispatcher::new()
            .with_module(ModuleKind::TicTacToe, factory)
            .with_module(ModuleKind::Reversi, factory)
    }

    fn alice(kind: PlayerKind) -> PlayerHandle {
        PlayerHandle::new(Player::new("Alice").with_kind(kind))
    }

    fn plan(resolution: Resolution) -> MatchPlan {
        match resolution {
            Resolution::Launch(plan) => plan,
            Resolution::Unsupported { game_type } => panic!("unsupported {game_type}"),
        }
    }

    #[test]
    fn tic_tac_toe_aliases_resolve_to_same_module() {
        let local = alice(PlayerKind::Human);
        let d = dispatcher();
        let a = plan(d.resolve("Tictactoe", &local, "Bob", "Bob"));
        let b = plan(d.resolve("Tic-tac-toe", &local, "Bob", "Bob"));
        assert_eq!(a.kind, ModuleKind::TicTacToe);
        assert_eq!(a.kind, b.kind);
    }

    #[test]
    fn game_type_matching_is_case_sensitive() {
        assert_eq!(ModuleKind::from_game_type("reversi"), None);
        assert_eq!(ModuleKind::from_game_type("Reversi"), Some(ModuleKind::Reversi));
    }

    #[test]
    fn unknown_game_is_unsupported() {
        let local = alice(PlayerKind::Human);
        assert!(matches!(
            dispatcher().resolve("chess", &local, "Bob", "Bob"),
            Resolution::Unsupported { game_type } if game_type == "chess"
        ));
    }

    #[test]
    fn unregistered_module_is_unsupported() {
        let factory = |_: Seat, _: PlayerHandle| -> ModuleHandle { Arc::new(RecordingModule::default()) };
        let d = ModuleDispatcher::new().with_module(ModuleKind::TicTacToe, factory);
        let local = alice(PlayerKind::Human);

        assert!(matches!(
            d.resolve("Reversi", &local, "Bob", "Bob"),
            Resolution::Unsupported { .. }
        ));
    }

    #[test]
    fn ai_is_specialised_for_the_module() {
        let local = alice(PlayerKind::AiHard);
        let p = plan(dispatcher().resolve("Tic-tac-toe", &local, "Bob", "Alice"));

        assert_eq!(
            p.local.controller,
            Controller::Ai(AiStrategy {
                module: ModuleKind::TicTacToe,
                difficulty: Difficulty::Hard,
            })
        );
        assert!(PlayerHandle::ptr_eq(&p.local.player, &local));
    }

    #[test]
    fn human_stays_human() {
        let local = alice(PlayerKind::Human);
        let p = plan(dispatcher().resolve("Reversi", &local, "Bob", "Alice"));
        assert_eq!(p.local.controller, Controller::Human);
    }

    #[test]
    fn opponent_starts_when_named() {
        let local = alice(PlayerKind::Human);
        let p = plan(dispatcher().resolve("Reversi", &local, "Bob", "Bob"));
        assert_eq!(p.starting_side, Side::Opponent);
        assert_eq!(p.starting_player().username(), "Bob");
    }

    #[test]
    fn local_starts_when_named() {
        let local = alice(PlayerKind::Human);
        let p = plan(dispatcher().resolve("Reversi", &local, "Bob", "Alice"));
        assert_eq!(p.starting_side, Side::Local);
    }

    #[test]
    fn unmatched_starting_player_defaults_to_local() {
        let local = alice(PlayerKind::Human);
        let p = plan(dispatcher().resolve("Reversi", &local, "Bob", "bob"));
        assert_eq!(p.starting_side, Side::Local);
    }

    #[test]
    fn launch_sets_starting_player() {
        let recorded = Arc::new(RecordingModule::default());
        let module = Arc::clone(&recorded);
        let d = ModuleDispatcher::new().with_module(
            ModuleKind::Reversi,
            move |_: Seat, _: PlayerHandle| -> ModuleHandle { module.clone() },
        );
        let local = alice(PlayerKind::Human);
        let p = plan(d.resolve("Reversi", &local, "Bob", "Bob"));

        d.launch(&p).unwrap();
        assert_eq!(recorded.starting.lock().unwrap().as_deref(), Some("Bob"));
    }
}
