//! Wire protocol for the lobby server: outgoing [`Command`]s and the
//! response [`parse`]r that turns every incoming line into an [`Event`].
//!
//! Server messages are single text lines. A message kind is recognised by its
//! literal prefix; the payload that follows is read one of two ways:
//!
//! - **Positional** (`CHALLENGE`, `MATCH`, challenge notices): every character
//!   outside `[A-Za-z0-9 -]` is stripped, the rest is split on whitespace and
//!   fields are read by fixed token position. These positions are the
//!   compatibility boundary with the server.
//! - **Keyed** (`YOURTURN`, `MOVE`, `WIN`/`LOSS`/`DRAW`): the payload is a
//!   `{KEY: "value", ...}` map whose free-text values may contain spaces.
//!
//! | Kind                | Raw shape                                                                 | Fields                              |
//! |---------------------|---------------------------------------------------------------------------|-------------------------------------|
//! | reply               | `OK` / `ERR <message>`                                                    | message verbatim                    |
//! | roster              | `SVR PLAYERLIST ["a", "b"]`                                               | collection                          |
//! | game list           | `SVR GAMELIST ["Reversi"]`                                                | collection                          |
//! | challenge cancelled | `SVR GAME CHALLENGE CANCELLED {CHALLENGENUMBER: "7"}`                     | 1 = id                              |
//! | challenge           | `SVR GAME CHALLENGE {CHALLENGER: "A", CHALLENGENUMBER: "4", GAMETYPE: "R"}` | 1 = challenger, 3 = id, 5 = game    |
//! | challenge notice    | `Challenge from A #4 for R`                                               | 2 = challenger, 3 = id, 5 = game    |
//! | match               | `SVR GAME MATCH {PLAYERTOMOVE: "B", GAMETYPE: "R", OPPONENT: "B"}`        | 1 = to move, 3 = game, 5 = opponent |
//! | your turn           | `SVR GAME YOURTURN {TURNMESSAGE: "..."}`                                  | keyed                               |
//! | move                | `SVR GAME MOVE {PLAYER: "B", DETAILS: "...", MOVE: "19"}`                 | keyed                               |
//! | match end           | `SVR GAME WIN {PLAYERONESCORE: "1", PLAYERTWOSCORE: "0", COMMENT: "..."}` | keyed                               |
//!
//! Any change to a positional shape requires bumping [`PROTOCOL_VERSION`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version of the positional message contract implemented by [`parse`].
pub const PROTOCOL_VERSION: u32 = 1;

// ── Identifiers ─────────────────────────────────────────────────────

/// Server-issued correlation token for a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChallengeId(u32);

impl ChallengeId {
    /// Wrap a raw challenge number.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw challenge number.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChallengeId {
    type Err = ParseErrorReason;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .map(Self)
            .map_err(|_| ParseErrorReason::MalformedChallengeId(s.to_string()))
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// Commands sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Log in under the given username.
    Login(String),
    /// End the session.
    Logout,
    /// Request a `SVR PLAYERLIST` roster snapshot.
    GetPlayerList,
    /// Request a `SVR GAMELIST` snapshot.
    GetGameList,
    /// Subscribe to automatic matchmaking for a game.
    Subscribe(String),
    /// Challenge another player to a game.
    Challenge { opponent: String, game_type: String },
    /// Accept a received challenge.
    AcceptChallenge(ChallengeId),
    /// Play a move in the running match.
    Move(String),
    /// Give up the running match.
    Forfeit,
}

impl Command {
    /// Render the command as a single wire line (without terminator).
    pub fn to_line(&self) -> String {
        match self {
            Self::Login(username) => format!("login {username}"),
            Self::Logout => "logout".to_string(),
            Self::GetPlayerList => "get playerlist".to_string(),
            Self::GetGameList => "get gamelist".to_string(),
            Self::Subscribe(game) => format!("subscribe {game}"),
            Self::Challenge {
                opponent,
                game_type,
            } => format!("challenge \"{opponent}\" \"{game_type}\""),
            Self::AcceptChallenge(id) => format!("challenge accept {id}"),
            Self::Move(mv) => format!("move {mv}"),
            Self::Forfeit => "forfeit".to_string(),
        }
    }

    /// Short name of the command, used in log output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login(_) => "login",
            Self::Logout => "logout",
            Self::GetPlayerList => "get-playerlist",
            Self::GetGameList => "get-gamelist",
            Self::Subscribe(_) => "subscribe",
            Self::Challenge { .. } => "challenge",
            Self::AcceptChallenge(_) => "challenge-accept",
            Self::Move(_) => "move",
            Self::Forfeit => "forfeit",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

// ── Events ──────────────────────────────────────────────────────────

/// A challenge invitation received from another player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub challenger: String,
    pub challenge_id: ChallengeId,
    pub game_type: String,
}

/// Announcement that a match involving the local player has started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStart {
    /// Username the server declared as moving first.
    pub starting_player: String,
    pub game_type: String,
    pub opponent: String,
}

/// Result of a finished match from the local player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOutcome {
    Win,
    Loss,
    Draw,
}

/// Why a server line could not be turned into a typed event.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ParseErrorReason {
    #[error("empty line")]
    Empty,
    #[error("unrecognized message")]
    UnknownMessage,
    #[error("missing field {field} at position {position}")]
    MissingField { field: String, position: usize },
    #[error("missing field {0}")]
    MissingKey(String),
    #[error("challenge number `{0}` is not a non-negative integer")]
    MalformedChallengeId(String),
    #[error("score `{0}` is not a non-negative integer")]
    MalformedScore(String),
    #[error("malformed list payload")]
    MalformedCollection,
    #[error("malformed field map payload")]
    MalformedFields,
}

impl ParseErrorReason {
    /// Whether the line was a recognised message kind with a bad payload, as
    /// opposed to a line of unknown shape.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::Empty | Self::UnknownMessage)
    }
}

/// Typed view of a single server line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// `OK` or `ERR <message>` acknowledgement of the oldest outstanding command.
    Reply { success: bool, message: String },
    /// Outcome of a login round trip. Produced by the session from the
    /// [`Reply`](Event::Reply) correlated with its `login` command.
    LoginResult { success: bool, message: String },
    /// Usernames currently online, in server order.
    RosterSnapshot { usernames: Vec<String> },
    /// Game types the server offers, in server order.
    GameListSnapshot { names: Vec<String> },
    ChallengeReceived(Challenge),
    ChallengeCancelled { challenge_id: ChallengeId },
    MatchStarted(MatchStart),
    YourTurn { message: String },
    MoveMade {
        player: String,
        mv: String,
        details: String,
    },
    MatchEnded {
        outcome: MatchOutcome,
        player_one_score: u32,
        player_two_score: u32,
        comment: String,
    },
    /// Synthetic: the transport closed or failed.
    Disconnected { reason: Option<String> },
    /// The line could not be parsed; carries the original text.
    ParseError {
        raw: String,
        reason: ParseErrorReason,
    },
}

// ── Parser ──────────────────────────────────────────────────────────

/// Parse one raw server line into an [`Event`].
///
/// Never panics: anything unrecognised or malformed becomes
/// [`Event::ParseError`] carrying the original text.
pub fn parse(raw: &str) -> Event {
    match parse_line(raw.trim_end_matches(['\r', '\n'])) {
        Ok(event) => event,
        Err(reason) => Event::ParseError {
            raw: raw.to_string(),
            reason,
        },
    }
}

fn parse_line(line: &str) -> Result<Event, ParseErrorReason> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseErrorReason::Empty);
    }
    if line == "OK" {
        return Ok(Event::Reply {
            success: true,
            message: String::new(),
        });
    }
    if let Some(message) = keyword(line, "ERR") {
        return Ok(Event::Reply {
            success: false,
            message: message.to_string(),
        });
    }
    if let Some(rest) = keyword(line, "SVR") {
        return parse_server(rest);
    }
    if line.starts_with("Challenge from ") {
        return parse_challenge_notice(line);
    }
    Err(ParseErrorReason::UnknownMessage)
}

fn parse_server(rest: &str) -> Result<Event, ParseErrorReason> {
    if let Some(payload) = keyword(rest, "PLAYERLIST") {
        return collection(payload).map(|usernames| Event::RosterSnapshot { usernames });
    }
    if let Some(payload) = keyword(rest, "GAMELIST") {
        return collection(payload).map(|names| Event::GameListSnapshot { names });
    }
    if let Some(game) = keyword(rest, "GAME") {
        return parse_game(game);
    }
    Err(ParseErrorReason::UnknownMessage)
}

fn parse_game(rest: &str) -> Result<Event, ParseErrorReason> {
    if let Some(challenge) = keyword(rest, "CHALLENGE") {
        if let Some(payload) = keyword(challenge, "CANCELLED") {
            let tokens = Tokens::of(payload);
            let challenge_id: ChallengeId = tokens.at(1, "CHALLENGENUMBER")?.parse()?;
            return Ok(Event::ChallengeCancelled { challenge_id });
        }
        let tokens = Tokens::of(challenge);
        return Ok(Event::ChallengeReceived(Challenge {
            challenger: tokens.at(1, "CHALLENGER")?.to_string(),
            challenge_id: tokens.at(3, "CHALLENGENUMBER")?.parse()?,
            game_type: tokens.at(5, "GAMETYPE")?.to_string(),
        }));
    }
    if let Some(payload) = keyword(rest, "MATCH") {
        let tokens = Tokens::of(payload);
        return Ok(Event::MatchStarted(MatchStart {
            starting_player: tokens.at(1, "PLAYERTOMOVE")?.to_string(),
            game_type: tokens.at(3, "GAMETYPE")?.to_string(),
            opponent: tokens.at(5, "OPPONENT")?.to_string(),
        }));
    }
    if let Some(payload) = keyword(rest, "YOURTURN") {
        let fields = Fields::of(payload)?;
        return Ok(Event::YourTurn {
            message: fields.get_or_default("TURNMESSAGE"),
        });
    }
    if let Some(payload) = keyword(rest, "MOVE") {
        let fields = Fields::of(payload)?;
        return Ok(Event::MoveMade {
            player: fields.require("PLAYER")?.to_string(),
            mv: fields.require("MOVE")?.to_string(),
            details: fields.get_or_default("DETAILS"),
        });
    }
    for (kind, outcome) in [
        ("WIN", MatchOutcome::Win),
        ("LOSS", MatchOutcome::Loss),
        ("DRAW", MatchOutcome::Draw),
    ] {
        if let Some(payload) = keyword(rest, kind) {
            let fields = Fields::of(payload)?;
            return Ok(Event::MatchEnded {
                outcome,
                player_one_score: score(fields.require("PLAYERONESCORE")?)?,
                player_two_score: score(fields.require("PLAYERTWOSCORE")?)?,
                comment: fields.get_or_default("COMMENT"),
            });
        }
    }
    Err(ParseErrorReason::UnknownMessage)
}

fn parse_challenge_notice(line: &str) -> Result<Event, ParseErrorReason> {
    let tokens = Tokens::of(line);
    Ok(Event::ChallengeReceived(Challenge {
        challenger: tokens.at(2, "challenger")?.to_string(),
        challenge_id: tokens.at(3, "challenge number")?.parse()?,
        game_type: tokens.at(5, "game type")?.to_string(),
    }))
}

/// Strip a leading keyword that is followed by a space or ends the line.
fn keyword<'a>(line: &'a str, word: &str) -> Option<&'a str> {
    line.strip_prefix(word)
        .filter(|rest| rest.is_empty() || rest.starts_with(' '))
        .map(str::trim_start)
}

fn score(raw: &str) -> Result<u32, ParseErrorReason> {
    raw.trim()
        .parse()
        .map_err(|_| ParseErrorReason::MalformedScore(raw.to_string()))
}

/// Parse a `["a", "b"]` list payload.
fn collection(payload: &str) -> Result<Vec<String>, ParseErrorReason> {
    let start = payload.find('[').ok_or(ParseErrorReason::MalformedCollection)?;
    let end = payload.rfind(']').ok_or(ParseErrorReason::MalformedCollection)?;
    let inner = payload
        .get(start + 1..end)
        .ok_or(ParseErrorReason::MalformedCollection)?;
    Ok(inner
        .split(',')
        .map(|entry| entry.trim().trim_matches('"').trim())
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect())
}

/// Sanitized whitespace-separated tokens read by fixed position.
struct Tokens {
    tokens: Vec<String>,
}

impl Tokens {
    fn of(payload: &str) -> Self {
        let sanitized: String = payload
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || *c == '-')
            .collect();
        Self {
            tokens: sanitized.split_whitespace().map(str::to_string).collect(),
        }
    }

    fn at(&self, position: usize, field: &str) -> Result<&str, ParseErrorReason> {
        self.tokens
            .get(position)
            .map(String::as_str)
            .ok_or_else(|| ParseErrorReason::MissingField {
                field: field.to_string(),
                position,
            })
    }
}

/// `{KEY: "value", ...}` payload.
struct Fields {
    entries: Vec<(String, String)>,
}

impl Fields {
    fn of(payload: &str) -> Result<Self, ParseErrorReason> {
        let inner = payload
            .trim()
            .strip_prefix('{')
            .and_then(|p| p.strip_suffix('}'))
            .ok_or(ParseErrorReason::MalformedFields)?;

        let mut entries = Vec::new();
        let mut rest = inner.trim_start();
        while !rest.is_empty() {
            let (key, after_key) = rest
                .split_once(':')
                .ok_or(ParseErrorReason::MalformedFields)?;
            let quoted = after_key
                .trim_start()
                .strip_prefix('"')
                .ok_or(ParseErrorReason::MalformedFields)?;
            let (value, after_value) = quoted
                .split_once('"')
                .ok_or(ParseErrorReason::MalformedFields)?;
            entries.push((key.trim().to_string(), value.to_string()));

            let after_value = after_value.trim_start();
            rest = after_value
                .strip_prefix(',')
                .unwrap_or(after_value)
                .trim_start();
        }
        Ok(Self { entries })
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, key: &str) -> Result<&str, ParseErrorReason> {
        self.get(key)
            .ok_or_else(|| ParseErrorReason::MissingKey(key.to_string()))
    }

    fn get_or_default(&self, key: &str) -> String {
        self.get(key).unwrap_or_default().to_string()
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

    #[test]
    fn keyword_requires_word_boundary() {
        assert_eq!(keyword("ERR oops", "ERR"), Some("oops"));
        assert_eq!(keyword("ERR", "ERR"), Some(""));
        assert_eq!(keyword("ERROR oops", "ERR"), None);
    }

    #[test]
    fn tokens_strip_punctuation_and_keep_hyphens() {
        let tokens = Tokens::of(r##"{GAMETYPE: "Tic-tac-toe", ID: "#9"}"##);
        assert_eq!(tokens.tokens, vec!["GAMETYPE", "Tic-tac-toe", "ID", "9"]);
    }

    #[test]
    fn fields_allow_empty_and_spaced_values() {
        let fields =
            Fields::of(r#"{PLAYER: "Bob", DETAILS: "", MOVE: "19", NOTE: "two words"}"#).unwrap();
        assert_eq!(fields.get("PLAYER"), Some("Bob"));
        assert_eq!(fields.get("DETAILS"), Some(""));
        assert_eq!(fields.get("NOTE"), Some("two words"));
        assert!(fields.get("MISSING").is_none());
    }

    #[test]
    fn fields_reject_unbraced_payload() {
        assert!(matches!(
            Fields::of(r#"PLAYER: "Bob""#),
            Err(ParseErrorReason::MalformedFields)
        ));
    }

    #[test]
    fn collection_handles_empty_list() {
        assert_eq!(collection("[]").unwrap(), Vec::<String>::new());
        assert!(collection("no brackets").is_err());
        assert!(collection("] reversed [").is_err());
    }

    #[test]
    fn negative_challenge_id_is_malformed() {
        let err = "-3".parse::<ChallengeId>().unwrap_err();
        assert_eq!(err, ParseErrorReason::MalformedChallengeId("-3".into()));
    }

    #[test]
    fn commands_render_wire_lines() {
        assert_eq!(Command::Login("Alice".into()).to_line(), "login Alice");
        assert_eq!(Command::GetPlayerList.to_line(), "get playerlist");
        assert_eq!(
            Command::AcceptChallenge(ChallengeId::new(42)).to_line(),
            "challenge accept 42"
        );
        assert_eq!(
            Command::Challenge {
                opponent: "Bob".into(),
                game_type: "Reversi".into()
            }
            .to_line(),
            "challenge \"Bob\" \"Reversi\""
        );
    }

    #[test]
    fn malformed_classification() {
        assert!(!ParseErrorReason::UnknownMessage.is_malformed());
        assert!(ParseErrorReason::MalformedChallengeId("x".into()).is_malformed());
    }
}
