//! Actions produced for the view layer.
//!
//! The session never touches presentation state directly. Everything a view
//! should render is described by an [`Action`] and handed to the
//! caller-supplied [`ActionDispatcher`], which is responsible for moving it
//! onto whatever thread or context the view requires.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::dispatch::ModuleHandle;
use crate::player::Player;
use crate::protocol::{Challenge, ChallengeId};

/// Everything the lobby screen shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbySnapshot {
    pub username: String,
    /// Mode chosen on the login screen, shown alongside the username.
    pub mode: String,
    pub roster: Vec<Player>,
    pub games: Vec<String>,
}

/// The user's answer to a challenge prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeDecision {
    Accept,
    Reject,
}

/// A pending challenge waiting for the user's decision.
///
/// Dropping the prompt without answering counts as a rejection.
#[derive(Debug)]
pub struct ChallengePrompt {
    pub challenge: Challenge,
    decision: oneshot::Sender<ChallengeDecision>,
}

impl ChallengePrompt {
    pub(crate) fn new(challenge: Challenge) -> (Self, oneshot::Receiver<ChallengeDecision>) {
        let (decision, rx) = oneshot::channel();
        (
            Self {
                challenge,
                decision,
            },
            rx,
        )
    }

    pub fn challenger(&self) -> &str {
        &self.challenge.challenger
    }

    pub fn game_type(&self) -> &str {
        &self.challenge.game_type
    }

    pub fn challenge_id(&self) -> ChallengeId {
        self.challenge.challenge_id
    }

    /// Text for a confirmation dialog.
    pub fn message(&self) -> String {
        format!(
            "Player {} has invited you to a game of {}. Do you accept?",
            self.challenge.challenger, self.challenge.game_type
        )
    }

    pub fn decide(self, decision: ChallengeDecision) {
        // The session may have been torn down in the meantime.
        if self.decision.send(decision).is_err() {
            debug!(challenge_id = %self.challenge.challenge_id, "challenge decision discarded");
        }
    }

    pub fn accept(self) {
        self.decide(ChallengeDecision::Accept);
    }

    pub fn reject(self) {
        self.decide(ChallengeDecision::Reject);
    }
}

/// Instructions for the view layer.
#[derive(Debug)]
pub enum Action {
    /// Show (or re-show) the lobby screen.
    ShowLobby(LobbySnapshot),
    /// Replace the displayed roster.
    UpdateRoster(Vec<Player>),
    /// Replace the displayed game list.
    UpdateGameList(Vec<String>),
    /// Blocking notification.
    ShowAlert { title: String, message: String },
    /// Ask the user whether to accept a challenge.
    ShowChallengePrompt(ChallengePrompt),
    /// The server withdrew a challenge; close its prompt if still open.
    DismissChallenge(ChallengeId),
    /// Hand a freshly created game module to the view.
    LaunchModule(ModuleHandle),
    /// Status bar text. Persistent messages stay until replaced.
    StatusMessage { text: String, persistent: bool },
}

impl Action {
    pub(crate) fn alert(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ShowAlert {
            title: title.into(),
            message: message.into(),
        }
    }

    pub(crate) fn status(text: impl Into<String>) -> Self {
        Self::StatusMessage {
            text: text.into(),
            persistent: false,
        }
    }

    pub(crate) fn persistent_status(text: impl Into<String>) -> Self {
        Self::StatusMessage {
            text: text.into(),
            persistent: true,
        }
    }

    /// Short name of the action, used in log output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ShowLobby(_) => "show-lobby",
            Self::UpdateRoster(_) => "update-roster",
            Self::UpdateGameList(_) => "update-game-list",
            Self::ShowAlert { .. } => "show-alert",
            Self::ShowChallengePrompt(_) => "show-challenge-prompt",
            Self::DismissChallenge(_) => "dismiss-challenge",
            Self::LaunchModule(_) => "launch-module",
            Self::StatusMessage { .. } => "status-message",
        }
    }
}

/// Caller-supplied sink for [`Action`]s.
///
/// # Example
///
/// ```
/// use lobby_session_client::action::{Action, ActionDispatcher};
///
/// // Forward everything to a channel drained by the UI thread.
/// let (dispatcher, mut actions) = ActionDispatcher::channel();
/// # drop(dispatcher);
/// # assert!(actions.try_recv().is_err());
/// ```
#[derive(Clone)]
pub struct ActionDispatcher {
    dispatch: Arc<dyn Fn(Action) + Send + Sync>,
}

impl ActionDispatcher {
    /// Dispatch through `f`. It is called from background tasks and must
    /// marshal onto the view's own context if the view requires one.
    pub fn new(f: impl Fn(Action) + Send + Sync + 'static) -> Self {
        Self {
            dispatch: Arc::new(f),
        }
    }

    /// Dispatch onto an unbounded channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Action>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self::new(move |action: Action| {
            if let Err(mpsc::error::SendError(action)) = tx.send(action) {
                debug!(action = action.name(), "action receiver dropped");
            }
        });
        (dispatcher, rx)
    }

    pub fn dispatch(&self, action: Action) {
        debug!(action = action.name(), "dispatching action");
        (self.dispatch)(action);
    }

    pub(crate) fn dispatch_all(&self, actions: impl IntoIterator<Item = Action>) {
        for action in actions {
            self.dispatch(action);
        }
    }
}

impl fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn challenge() -> Challenge {
        Challenge {
            challenger: "Alice".into(),
            challenge_id: ChallengeId::new(42),
            game_type: "Reversi".into(),
        }
    }

    #[tokio::test]
    async fn prompt_delivers_decision() {
        let (prompt, rx) = ChallengePrompt::new(challenge());
        assert_eq!(prompt.challenge_id(), ChallengeId::new(42));
        prompt.accept();
        assert_eq!(rx.await.unwrap(), ChallengeDecision::Accept);
    }

    #[tokio::test]
    async fn dropped_prompt_closes_channel() {
        let (prompt, rx) = ChallengePrompt::new(challenge());
        drop(prompt);
        assert!(rx.await.is_err());
    }

    #[test]
    fn prompt_message_names_challenger_and_game() {
        let (prompt, _rx) = ChallengePrompt::new(challenge());
        assert_eq!(
            prompt.message(),
            "Player Alice has invited you to a game of Reversi. Do you accept?"
        );
    }

    #[test]
    fn channel_dispatcher_forwards_in_order() {
        let (dispatcher, mut rx) = ActionDispatcher::channel();
        dispatcher.dispatch_all([Action::status("one"), Action::persistent_status("two")]);

        assert!(matches!(
            rx.try_recv().unwrap(),
            Action::StatusMessage { text, persistent: false } if text == "one"
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Action::StatusMessage { text, persistent: true } if text == "two"
        ));
    }

    #[test]
    fn dispatch_after_receiver_dropped_is_silent() {
        let (dispatcher, rx) = ActionDispatcher::channel();
        drop(rx);
        dispatcher.dispatch(Action::alert("title", "message"));
    }
}
