//! Chess rules engine.
//!
//! Pure board state and move validation: SAN parsing, legality, castling,
//! en passant, promotion, terminal detection and PGN move text. No I/O.

pub mod board;
pub mod history;
pub mod san;

pub use board::{Board, CastlingRights, MoveRecord};
pub use history::MoveHistory;
pub use san::{CastleSide, ParsedSan};

use thiserror::Error;

/// Errors produced by the rules engine. Every variant means "not a legal
/// move" to the caller; the distinctions exist for diagnostics and tests.
#[derive(Debug, Clone, Error)]
pub enum ChessError {
    /// The text does not parse as SAN.
    #[error("cannot parse move: {0}")]
    UnparsableSan(String),

    /// No piece of the named type can reach the destination.
    #[error("not a legal move: {0}")]
    IllegalMove(String),

    /// More than one piece matches; a file or rank hint is required.
    #[error("ambiguous move: {0}")]
    AmbiguousMove(String),

    /// The move would leave the mover's own king in check.
    #[error("not a legal move: {0} leaves the king in check")]
    SelfCheck(String),
}
