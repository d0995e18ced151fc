//! Standard Algebraic Notation parsing.
//!
//! Accepts `(piece)? (disambig)? ('x')? dest ('=' promo)? ('+'|'#'|'!'|'?')*`
//! plus the castling literals in both `O` and `0` spellings. Suffixes are
//! stripped before processing; the capture marker is informational only.

use crate::types::{PieceType, Square};

use super::ChessError;

/// Which side a castling move goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastleSide {
    /// Short castle (`O-O`).
    KingSide,
    /// Long castle (`O-O-O`).
    QueenSide,
}

/// A SAN string decomposed into its components, before source resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedSan {
    /// A castling move for the side to move.
    Castle(CastleSide),
    /// An ordinary piece or pawn move.
    Normal {
        /// Moving piece type; pawn when no leading letter was given.
        piece_type: PieceType,
        /// File disambiguation hint, if any.
        file_hint: Option<u8>,
        /// Rank disambiguation hint, if any.
        rank_hint: Option<u8>,
        /// Whether an `x` capture marker was present (informational).
        capture_marker: bool,
        /// Destination square.
        dest: Square,
        /// Explicit promotion piece, if any.
        promotion: Option<PieceType>,
    },
}

/// Strip trailing check/checkmate/annotation characters.
#[must_use]
pub fn strip_suffixes(san: &str) -> &str {
    san.trim_end_matches(['+', '#', '!', '?'])
}

/// Parse a SAN string. Does not consult the board; source resolution and
/// legality live in [`super::Board`].
pub fn parse(input: &str) -> Result<ParsedSan, ChessError> {
    let san = strip_suffixes(input.trim());
    if san.is_empty() {
        return Err(ChessError::UnparsableSan(input.to_string()));
    }

    match san {
        "O-O" | "0-0" => return Ok(ParsedSan::Castle(CastleSide::KingSide)),
        "O-O-O" | "0-0-0" => return Ok(ParsedSan::Castle(CastleSide::QueenSide)),
        _ => {}
    }

    // Split off an explicit promotion: everything after '='.
    let (body, promotion) = match san.split_once('=') {
        Some((body, promo)) => {
            let mut chars = promo.chars();
            let letter = chars
                .next()
                .ok_or_else(|| ChessError::UnparsableSan(input.to_string()))?;
            if chars.next().is_some() {
                return Err(ChessError::UnparsableSan(input.to_string()));
            }
            let piece = PieceType::from_san_letter(letter)
                .filter(|p| *p != PieceType::King)
                .ok_or_else(|| ChessError::UnparsableSan(input.to_string()))?;
            (body, Some(piece))
        }
        None => (san, None),
    };

    let chars: Vec<char> = body.chars().collect();
    if chars.len() < 2 {
        return Err(ChessError::UnparsableSan(input.to_string()));
    }

    // Destination is always the trailing file+rank pair.
    let rank_ch = chars[chars.len() - 1];
    let file_ch = chars[chars.len() - 2];
    if !('a'..='h').contains(&file_ch) || !('1'..='8').contains(&rank_ch) {
        return Err(ChessError::UnparsableSan(input.to_string()));
    }
    let dest = Square {
        file: file_ch as u8 - b'a',
        rank: rank_ch as u8 - b'1',
    };

    let mut rest = &chars[..chars.len() - 2];

    let piece_type = match rest.first().copied().and_then(PieceType::from_san_letter) {
        Some(piece) => {
            rest = &rest[1..];
            piece
        }
        None => PieceType::Pawn,
    };

    let mut capture_marker = false;
    if rest.last() == Some(&'x') {
        capture_marker = true;
        rest = &rest[..rest.len() - 1];
    }

    // Up to one file hint and one rank hint.
    let mut file_hint = None;
    let mut rank_hint = None;
    for &c in rest {
        match c {
            'a'..='h' if file_hint.is_none() => file_hint = Some(c as u8 - b'a'),
            '1'..='8' if rank_hint.is_none() => rank_hint = Some(c as u8 - b'1'),
            _ => return Err(ChessError::UnparsableSan(input.to_string())),
        }
    }

    Ok(ParsedSan::Normal {
        piece_type,
        file_hint,
        rank_hint,
        capture_marker,
        dest,
        promotion,
    })
}
