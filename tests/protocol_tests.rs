#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Parser tests: one per server message kind, plus malformed and hostile
//! input.

use lobby_session_client::protocol::{
    parse, Challenge, ChallengeId, Event, MatchOutcome, MatchStart, ParseErrorReason,
};

fn parse_error(raw: &str) -> ParseErrorReason {
    match parse(raw) {
        Event::ParseError { raw: kept, reason } => {
            assert_eq!(kept, raw, "ParseError must carry the original text");
            reason
        }
        other => panic!("expected ParseError for {raw:?}, got {other:?}"),
    }
}

// ════════════════════════════════════════════════════════════════════
// Replies
// ════════════════════════════════════════════════════════════════════

#[test]
fn ok_reply() {
    assert_eq!(
        parse("OK"),
        Event::Reply {
            success: true,
            message: String::new()
        }
    );
}

#[test]
fn err_reply_keeps_message_verbatim() {
    assert_eq!(
        parse("ERR Duplicate name exists"),
        Event::Reply {
            success: false,
            message: "Duplicate name exists".into()
        }
    );
}

#[test]
fn crlf_terminated_line() {
    assert_eq!(
        parse("OK\r\n"),
        Event::Reply {
            success: true,
            message: String::new()
        }
    );
}

// ════════════════════════════════════════════════════════════════════
// Collections
// ════════════════════════════════════════════════════════════════════

#[test]
fn player_list() {
    assert_eq!(
        parse(r#"SVR PLAYERLIST ["Alice", "Bob", "Mary-Jane"]"#),
        Event::RosterSnapshot {
            usernames: vec!["Alice".into(), "Bob".into(), "Mary-Jane".into()]
        }
    );
}

#[test]
fn empty_player_list() {
    assert_eq!(
        parse("SVR PLAYERLIST []"),
        Event::RosterSnapshot { usernames: vec![] }
    );
}

#[test]
fn game_list() {
    assert_eq!(
        parse(r#"SVR GAMELIST ["Reversi", "Tic-tac-toe"]"#),
        Event::GameListSnapshot {
            names: vec!["Reversi".into(), "Tic-tac-toe".into()]
        }
    );
}

#[test]
fn player_list_without_brackets_is_malformed() {
    assert_eq!(
        parse_error(r#"SVR PLAYERLIST "Alice""#),
        ParseErrorReason::MalformedCollection
    );
}

// ════════════════════════════════════════════════════════════════════
// Challenges
// ════════════════════════════════════════════════════════════════════

#[test]
fn server_challenge() {
    assert_eq!(
        parse(r#"SVR GAME CHALLENGE {CHALLENGER: "Sjors", CHALLENGENUMBER: "2", GAMETYPE: "Tic-tac-toe"}"#),
        Event::ChallengeReceived(Challenge {
            challenger: "Sjors".into(),
            challenge_id: ChallengeId::new(2),
            game_type: "Tic-tac-toe".into(),
        })
    );
}

#[test]
fn challenge_notice() {
    assert_eq!(
        parse("Challenge from Alice #42 for Reversi"),
        Event::ChallengeReceived(Challenge {
            challenger: "Alice".into(),
            challenge_id: ChallengeId::new(42),
            game_type: "Reversi".into(),
        })
    );
}

#[test]
fn challenge_cancelled() {
    assert_eq!(
        parse(r#"SVR GAME CHALLENGE CANCELLED {CHALLENGENUMBER: "7"}"#),
        Event::ChallengeCancelled {
            challenge_id: ChallengeId::new(7)
        }
    );
}

#[test]
fn non_numeric_challenge_id_rejects_whole_message() {
    assert_eq!(
        parse_error(r#"SVR GAME CHALLENGE {CHALLENGER: "Bob", CHALLENGENUMBER: "abc", GAMETYPE: "Reversi"}"#),
        ParseErrorReason::MalformedChallengeId("abc".into())
    );
}

#[test]
fn truncated_challenge_reports_missing_position() {
    assert_eq!(
        parse_error(r#"SVR GAME CHALLENGE {CHALLENGER: "Bob"}"#),
        ParseErrorReason::MissingField {
            field: "CHALLENGENUMBER".into(),
            position: 3
        }
    );
}

// ════════════════════════════════════════════════════════════════════
// Match traffic
// ════════════════════════════════════════════════════════════════════

#[test]
fn match_started() {
    assert_eq!(
        parse(r#"SVR GAME MATCH {PLAYERTOMOVE: "Bob", GAMETYPE: "Reversi", OPPONENT: "Bob"}"#),
        Event::MatchStarted(MatchStart {
            starting_player: "Bob".into(),
            game_type: "Reversi".into(),
            opponent: "Bob".into(),
        })
    );
}

#[test]
fn your_turn() {
    assert_eq!(
        parse(r#"SVR GAME YOURTURN {TURNMESSAGE: "Make your move, quickly"}"#),
        Event::YourTurn {
            message: "Make your move, quickly".into()
        }
    );
}

#[test]
fn move_made() {
    assert_eq!(
        parse(r#"SVR GAME MOVE {PLAYER: "Bob", DETAILS: "", MOVE: "19"}"#),
        Event::MoveMade {
            player: "Bob".into(),
            mv: "19".into(),
            details: String::new(),
        }
    );
}

#[test]
fn match_results() {
    let cases = [
        ("WIN", MatchOutcome::Win),
        ("LOSS", MatchOutcome::Loss),
        ("DRAW", MatchOutcome::Draw),
    ];
    for (kind, outcome) in cases {
        let line = format!(
            r#"SVR GAME {kind} {{PLAYERONESCORE: "3", PLAYERTWOSCORE: "1", COMMENT: "Player forfeited match"}}"#
        );
        assert_eq!(
            parse(&line),
            Event::MatchEnded {
                outcome,
                player_one_score: 3,
                player_two_score: 1,
                comment: "Player forfeited match".into(),
            }
        );
    }
}

#[test]
fn negative_score_is_malformed() {
    assert_eq!(
        parse_error(r#"SVR GAME WIN {PLAYERONESCORE: "-1", PLAYERTWOSCORE: "0", COMMENT: ""}"#),
        ParseErrorReason::MalformedScore("-1".into())
    );
}

#[test]
fn move_without_player_is_missing_key() {
    assert_eq!(
        parse_error(r#"SVR GAME MOVE {MOVE: "19"}"#),
        ParseErrorReason::MissingKey("PLAYER".into())
    );
}

// ════════════════════════════════════════════════════════════════════
// Unknown and hostile input
// ════════════════════════════════════════════════════════════════════

#[test]
fn unknown_lines_are_parse_errors() {
    for raw in [
        "Strategic Game Server Fixed [Version 1.1.0]",
        "SVR HELP something",
        "SVR GAME UNKNOWN {}",
        "OKAY",
        "SVRPLAYERLIST []",
    ] {
        assert_eq!(parse_error(raw), ParseErrorReason::UnknownMessage, "{raw}");
    }
}

#[test]
fn blank_line_is_empty() {
    assert_eq!(parse_error("   "), ParseErrorReason::Empty);
}

#[test]
fn hostile_input_never_panics() {
    let inputs = [
        "SVR",
        "SVR GAME",
        "SVR GAME CHALLENGE",
        "SVR GAME MATCH {",
        "SVR GAME MOVE {PLAYER: \"unterminated}",
        "SVR PLAYERLIST ]",
        "SVR GAMELIST [\"a\", , \"\"]",
        "Challenge from",
        "Challenge from 🦀 #🦀 for 🦀",
        "SVR GAME CHALLENGE {CHALLENGER: \"x\", CHALLENGENUMBER: \"99999999999999999999\", GAMETYPE: \"y\"}",
        "\u{0}\u{1}\u{2}",
    ];
    for raw in inputs {
        // Any Event is acceptable; reaching the next line is the assertion.
        let _ = parse(raw);
    }
}

#[test]
fn events_round_trip_through_json() {
    let event = parse("Challenge from Alice #42 for Reversi");
    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"type\":\"ChallengeReceived\""));
    let back: Event = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}
