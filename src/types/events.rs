//! Typed event stream payloads.
//!
//! Every event a game emits is a named kind plus one JSON object; the
//! broadcaster writes them as SSE frames (`event: <kind>\ndata: <json>`).
//! Field names are camelCase on the wire.

use serde::Serialize;

use super::chess::{Color, Piece, PieceType};

/// Board snapshot rows: row 0 is rank 8, row 7 is rank 1, columns a..h.
pub type BoardRows = Vec<Vec<Option<Piece>>>;

/// Captured piece types per side, in capture order.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedPieces {
    /// Types White has captured.
    pub by_white: Vec<PieceType>,
    /// Types Black has captured.
    pub by_black: Vec<PieceType>,
}

/// The squares of the most recent move.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMove {
    /// Source square in algebraic form (`"e2"`).
    pub from: String,
    /// Destination square in algebraic form (`"e4"`).
    pub to: String,
}

/// Model labels per side; `None` for a human-controlled side.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelLabels {
    /// White's model label.
    pub white: Option<String>,
    /// Black's model label.
    pub black: Option<String>,
}

/// `status` payload: a human-readable phase announcement.
#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    /// The announcement text.
    pub message: String,
}

/// `board` payload: full board snapshot after a change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardPayload {
    /// Snapshot rows, rank 8 first.
    pub squares: BoardRows,
    /// Side to move.
    pub turn: Color,
    /// Squares of the move that produced this position, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_move: Option<LastMove>,
    /// Captured pieces so far.
    pub captured: CapturedPieces,
}

/// `clock` payload: millisecond remainders. Omitted entirely for unlimited
/// games.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockPayload {
    /// White's remaining milliseconds.
    pub white_time: i64,
    /// Black's remaining milliseconds.
    pub black_time: i64,
}

/// `thinking` payload: incremental reasoning text from a model.
#[derive(Debug, Clone, Serialize)]
pub struct ThinkingPayload {
    /// Side that is thinking.
    pub color: Color,
    /// Model label.
    pub model: String,
    /// The new text fragment.
    pub text: String,
    /// All reasoning text accumulated this attempt.
    pub accumulated: String,
}

/// `chat` payload: one per LLM attempt, before its consequences.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    /// Side that was asked to move.
    pub color: Color,
    /// Model label.
    pub model: String,
    /// Raw response content.
    pub raw: String,
    /// The move parsed out of the response.
    #[serde(rename = "move")]
    pub parsed_move: String,
    /// Free-form dialogue, when the JSON schema supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<String>,
    /// Reasoning text, when the model emitted any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Full move number being played.
    pub move_number: usize,
}

/// `move` payload: an accepted move.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePayload {
    /// Side that moved.
    pub color: Color,
    /// Model label, or `"human"` for a human move.
    pub model: String,
    /// Canonical SAN of the move.
    pub notation: String,
    /// Source square in algebraic form.
    pub from: String,
    /// Destination square in algebraic form.
    pub to: String,
    /// Full move number of this ply.
    pub move_number: usize,
    /// Dialogue carried along from the chat response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<String>,
}

/// `error` payload: a transient turn failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Side whose attempt failed.
    pub color: Color,
    /// Model label.
    pub model: String,
    /// What went wrong.
    pub message: String,
    /// 1-based attempt number that failed.
    pub attempt: u32,
    /// The retry budget.
    pub max_retries: u32,
}

/// `gameOver` payload: terminal, always the last event of a game.
#[derive(Debug, Clone, Serialize)]
pub struct GameOverPayload {
    /// Result string, e.g. `"Black wins by checkmate!"`.
    pub result: String,
    /// PGN move text of the whole game.
    pub pgn: String,
}

/// `state` payload: full snapshot sent to a subscriber on connect, and
/// returned by the state endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePayload {
    /// Snapshot rows, rank 8 first.
    pub board: BoardRows,
    /// Side to move.
    pub turn: Color,
    /// PGN move text so far.
    pub pgn: String,
    /// Number of plies played.
    pub move_count: usize,
    /// Terminal result, if the game has ended.
    pub result: Option<String>,
    /// Model labels per side.
    pub models: ModelLabels,
    /// Captured pieces so far.
    pub captured: CapturedPieces,
    /// Clock remainders; `None` for unlimited games.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock: Option<ClockPayload>,
    /// Which side a human controls, if any.
    pub human_side: Option<Color>,
}

/// One event emitted by a game: a kind tag plus its payload.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ArenaEvent {
    /// Phase announcement.
    Status(StatusPayload),
    /// Board snapshot.
    Board(BoardPayload),
    /// Clock remainders.
    Clock(ClockPayload),
    /// Incremental reasoning text.
    Thinking(ThinkingPayload),
    /// One LLM attempt.
    Chat(ChatPayload),
    /// Accepted move.
    Move(MovePayload),
    /// Transient turn failure.
    Error(ErrorPayload),
    /// Terminal result.
    GameOver(GameOverPayload),
    /// Full snapshot for a new subscriber.
    State(StatePayload),
}

impl ArenaEvent {
    /// The SSE event name for this payload.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Board(_) => "board",
            Self::Clock(_) => "clock",
            Self::Thinking(_) => "thinking",
            Self::Chat(_) => "chat",
            Self::Move(_) => "move",
            Self::Error(_) => "error",
            Self::GameOver(_) => "gameOver",
            Self::State(_) => "state",
        }
    }

    /// Convenience constructor for `status`.
    #[must_use]
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status(StatusPayload {
            message: message.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_wire_names() {
        assert_eq!(ArenaEvent::status("x").kind(), "status");
        assert_eq!(
            ArenaEvent::GameOver(GameOverPayload {
                result: "Draw by stalemate".into(),
                pgn: String::new(),
            })
            .kind(),
            "gameOver"
        );
    }

    #[test]
    fn payloads_serialize_untagged_and_camel_case() {
        let event = ArenaEvent::Clock(ClockPayload {
            white_time: 1500,
            black_time: 3000,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["whiteTime"], 1500);
        assert_eq!(json["blackTime"], 3000);
        assert!(json.get("Clock").is_none(), "no enum tag on the wire");
    }

    #[test]
    fn chat_move_field_is_named_move() {
        let event = ArenaEvent::Chat(ChatPayload {
            color: Color::White,
            model: "test-model".into(),
            raw: "e4".into(),
            parsed_move: "e4".into(),
            dialogue: None,
            thinking: None,
            attempt: 1,
            move_number: 1,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["move"], "e4");
        assert_eq!(json["moveNumber"], 1);
        assert!(json.get("dialogue").is_none());
    }
}
