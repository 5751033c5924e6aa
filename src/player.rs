//! Players known to a session.
//!
//! [`Player`] is a plain value. [`PlayerHandle`] shares one player between
//! the roster, the session and a running game module; clones of a handle
//! observe the same score and display attributes, and
//! [`PlayerHandle::ptr_eq`] tells whether two handles are the same player.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

/// Display colour. Opaque to the session; carried for the view layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    /// Neutral grey assigned to the local player at login.
    pub const NEUTRAL: Color = Color::rgba(0.5, 0.5, 0.5, 0.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

/// Strength of a computer-controlled player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Easy => f.write_str("Easy"),
            Self::Hard => f.write_str("Hard"),
        }
    }
}

/// Who controls a player: a human at the keyboard or a generic AI.
///
/// Generic AI kinds are specialised per game module when a match starts (see
/// [`Controller`](crate::dispatch::Controller)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlayerKind {
    #[default]
    Human,
    AiEasy,
    AiHard,
}

impl PlayerKind {
    /// Kind selected on the login screen. An AI without an explicit
    /// difficulty plays hard.
    pub fn from_login(is_ai: bool, difficulty: Option<Difficulty>) -> Self {
        match (is_ai, difficulty) {
            (false, _) => Self::Human,
            (true, Some(Difficulty::Easy)) => Self::AiEasy,
            (true, Some(Difficulty::Hard) | None) => Self::AiHard,
        }
    }

    pub fn is_ai(self) -> bool {
        !matches!(self, Self::Human)
    }

    /// Difficulty of an AI kind; `None` for humans.
    pub fn difficulty(self) -> Option<Difficulty> {
        match self {
            Self::Human => None,
            Self::AiEasy => Some(Difficulty::Easy),
            Self::AiHard => Some(Difficulty::Hard),
        }
    }
}

/// A player as seen by the lobby.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    username: String,
    score: u32,
    color: Option<Color>,
    character: Option<char>,
    kind: PlayerKind,
}

impl Player {
    /// A bare human player with score 0 and no display attributes.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            score: 0,
            color: None,
            character: None,
            kind: PlayerKind::Human,
        }
    }

    #[must_use]
    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: PlayerKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn color(&self) -> Option<Color> {
        self.color
    }

    pub fn character(&self) -> Option<char> {
        self.character
    }

    pub fn kind(&self) -> PlayerKind {
        self.kind
    }

    pub fn is_ai(&self) -> bool {
        self.kind.is_ai()
    }

    pub fn set_score(&mut self, score: u32) {
        self.score = score;
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = Some(color);
    }

    pub fn set_character(&mut self, character: char) {
        self.character = Some(character);
    }
}

/// Shared, mutable reference to a [`Player`].
#[derive(Clone)]
pub struct PlayerHandle {
    inner: Arc<RwLock<Player>>,
}

impl PlayerHandle {
    pub fn new(player: Player) -> Self {
        Self {
            inner: Arc::new(RwLock::new(player)),
        }
    }

    /// Whether both handles refer to the same player.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn username(&self) -> String {
        self.read().username.clone()
    }

    /// Compare the username without cloning it.
    pub fn has_username(&self, username: &str) -> bool {
        self.read().username == username
    }

    pub fn score(&self) -> u32 {
        self.read().score
    }

    pub fn kind(&self) -> PlayerKind {
        self.read().kind
    }

    pub fn set_score(&self, score: u32) {
        self.write().set_score(score);
    }

    pub fn set_color(&self, color: Color) {
        self.write().set_color(color);
    }

    pub fn set_character(&self, character: char) {
        self.write().set_character(character);
    }

    /// Copy of the player's current state.
    pub fn snapshot(&self) -> Player {
        self.read().clone()
    }

    // A panic while holding the lock cannot leave a `Player` half-written,
    // so poisoned guards are used as-is.
    fn read(&self) -> RwLockReadGuard<'_, Player> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Player> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<Player> for PlayerHandle {
    fn from(player: Player) -> Self {
        Self::new(player)
    }
}

impl fmt::Debug for PlayerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PlayerHandle").field(&*self.read()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn login_selection_maps_to_kind() {
        assert_eq!(PlayerKind::from_login(false, Some(Difficulty::Hard)), PlayerKind::Human);
        assert_eq!(PlayerKind::from_login(true, Some(Difficulty::Easy)), PlayerKind::AiEasy);
        assert_eq!(PlayerKind::from_login(true, None), PlayerKind::AiHard);
        assert_eq!(PlayerKind::AiEasy.difficulty(), Some(Difficulty::Easy));
        assert!(PlayerKind::Human.difficulty().is_none());
    }

    #[test]
    fn handle_clones_share_state() {
        let a = PlayerHandle::new(Player::new("Alice"));
        let b = a.clone();
        b.set_score(7);
        b.set_character('X');

        assert_eq!(a.score(), 7);
        assert_eq!(a.snapshot().character(), Some('X'));
        assert!(PlayerHandle::ptr_eq(&a, &b));
    }

    #[test]
    fn equal_players_are_distinct_handles() {
        let a = PlayerHandle::new(Player::new("Alice"));
        let b = PlayerHandle::new(Player::new("Alice"));
        assert_eq!(a.snapshot(), b.snapshot());
        assert!(!PlayerHandle::ptr_eq(&a, &b));
    }

    #[test]
    fn new_player_is_bare() {
        let player = Player::new("Bob");
        assert_eq!(player.score(), 0);
        assert!(player.color().is_none());
        assert!(!player.is_ai());
    }
}
