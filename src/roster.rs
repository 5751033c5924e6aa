//! Online player roster.

use std::collections::{HashMap, HashSet};

use crate::player::{Player, PlayerHandle};

/// Players currently online, as last reported by the server.
///
/// Each [`reconcile`](RosterStore::reconcile) keeps the handle of every
/// player that is still online, so scores and display attributes assigned to
/// them survive roster refreshes.
#[derive(Debug, Default)]
pub struct RosterStore {
    players: Vec<PlayerHandle>,
}

impl RosterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roster with `snapshot`.
    ///
    /// Known usernames keep their existing handle, new usernames get a bare
    /// player, and usernames missing from the snapshot are dropped. The result
    /// follows snapshot order; a username listed twice keeps its first
    /// position.
    pub fn reconcile<S: AsRef<str>>(&mut self, snapshot: &[S]) -> Vec<PlayerHandle> {
        let mut known: HashMap<String, PlayerHandle> = self
            .players
            .drain(..)
            .map(|handle| (handle.username(), handle))
            .collect();

        let mut seen: HashSet<&str> = HashSet::with_capacity(snapshot.len());
        let players: Vec<PlayerHandle> = snapshot
            .iter()
            .map(|username| username.as_ref())
            .filter(|username| seen.insert(*username))
            .map(|username| {
                known
                    .remove(username)
                    .unwrap_or_else(|| PlayerHandle::new(Player::new(username)))
            })
            .collect();

        self.players = players.clone();
        players
    }

    /// Current roster in server order.
    pub fn players(&self) -> &[PlayerHandle] {
        &self.players
    }

    /// Value snapshots of the current roster, for the view layer.
    pub fn snapshot(&self) -> Vec<Player> {
        self.players.iter().map(PlayerHandle::snapshot).collect()
    }

    pub fn get(&self, username: &str) -> Option<&PlayerHandle> {
        self.players.iter().find(|p| p.has_username(username))
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn clear(&mut self) {
        self.players.clear();
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

    fn names(players: &[PlayerHandle]) -> Vec<String> {
        players.iter().map(PlayerHandle::username).collect()
    }

    #[test]
    fn reconcile_twice_keeps_identity() {
        let mut roster = RosterStore::new();
        let first = roster.reconcile(&["Alice", "Bob"]);
        let second = roster.reconcile(&["Alice", "Bob"]);

        assert_eq!(first.len(), 2);
        for (a, b) in first.iter().zip(&second) {
            assert!(PlayerHandle::ptr_eq(a, b));
        }
    }

    #[test]
    fn reconcile_preserves_score_of_known_players() {
        let mut roster = RosterStore::new();
        roster.reconcile(&["Alice"]);
        roster.get("Alice").unwrap().set_score(12);

        let players = roster.reconcile(&["Carol", "Alice"]);
        assert_eq!(names(&players), vec!["Carol", "Alice"]);
        assert_eq!(players[1].score(), 12);
        assert_eq!(players[0].score(), 0);
    }

    #[test]
    fn reconcile_drops_missing_players() {
        let mut roster = RosterStore::new();
        roster.reconcile(&["Alice", "Bob", "Carol"]);
        let players = roster.reconcile(&["Carol", "Alice"]);

        assert_eq!(names(&players), vec!["Carol", "Alice"]);
        assert!(roster.get("Bob").is_none());
    }

    #[test]
    fn dropped_player_comes_back_bare() {
        let mut roster = RosterStore::new();
        roster.reconcile(&["Bob"]);
        roster.get("Bob").unwrap().set_score(3);
        roster.reconcile::<&str>(&[]);
        let players = roster.reconcile(&["Bob"]);

        assert_eq!(players[0].score(), 0);
    }

    #[test]
    fn duplicate_usernames_keep_first_position() {
        let mut roster = RosterStore::new();
        let players = roster.reconcile(&["Bob", "Alice", "Bob"]);

        assert_eq!(names(&players), vec!["Bob", "Alice"]);
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn clear_empties_roster() {
        let mut roster = RosterStore::new();
        roster.reconcile(&["Alice"]);
        roster.clear();
        assert!(roster.is_empty());
    }
}
