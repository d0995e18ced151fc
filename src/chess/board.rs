//! Board state and move legality.
//!
//! The board owns an 8x8 grid of optional pieces plus castling rights, the
//! en-passant target, the half-move clock and the two captured-piece lists.
//! Applying SAN mutates the board; every legality probe runs on a copy, so
//! a rejected move never disturbs state.

use serde::Serialize;

use crate::types::{Color, Piece, PieceType, Square};

use super::san::{self, CastleSide, ParsedSan};
use super::ChessError;

/// The four castling-right booleans. Monotonically non-increasing: once a
/// right is cleared it stays cleared for the life of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CastlingRights {
    /// White may still castle king-side.
    pub white_kingside: bool,
    /// White may still castle queen-side.
    pub white_queenside: bool,
    /// Black may still castle king-side.
    pub black_kingside: bool,
    /// Black may still castle queen-side.
    pub black_queenside: bool,
}

impl CastlingRights {
    const ALL: Self = Self {
        white_kingside: true,
        white_queenside: true,
        black_kingside: true,
        black_queenside: true,
    };

    /// Look up the right for one side of the board.
    #[must_use]
    pub const fn has(self, color: Color, side: CastleSide) -> bool {
        match (color, side) {
            (Color::White, CastleSide::KingSide) => self.white_kingside,
            (Color::White, CastleSide::QueenSide) => self.white_queenside,
            (Color::Black, CastleSide::KingSide) => self.black_kingside,
            (Color::Black, CastleSide::QueenSide) => self.black_queenside,
        }
    }

    fn clear(&mut self, color: Color, side: CastleSide) {
        match (color, side) {
            (Color::White, CastleSide::KingSide) => self.white_kingside = false,
            (Color::White, CastleSide::QueenSide) => self.white_queenside = false,
            (Color::Black, CastleSide::KingSide) => self.black_kingside = false,
            (Color::Black, CastleSide::QueenSide) => self.black_queenside = false,
        }
    }

    fn clear_both(&mut self, color: Color) {
        self.clear(color, CastleSide::KingSide);
        self.clear(color, CastleSide::QueenSide);
    }
}

/// The record of one executed (or validated) move.
///
/// Castling records `piece_type = King` with the king's squares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRecord {
    /// Source square of the moving piece.
    pub from: Square,
    /// Destination square of the moving piece.
    pub to: Square,
    /// Type of the moving piece.
    pub piece_type: PieceType,
    /// Piece the pawn became, if the move promotes.
    pub promotion: Option<PieceType>,
    /// Whether a piece was (or would be) captured, en passant included.
    pub capture: bool,
    /// King-side castle.
    pub castle_kingside: bool,
    /// Queen-side castle.
    pub castle_queenside: bool,
    /// Canonical SAN emitted by the engine for this move.
    pub notation: String,
}

/// Full board state. Cloning yields an independent copy suitable for
/// exploratory execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    /// Grid indexed `[rank][file]`.
    squares: [[Option<Piece>; 8]; 8],
    castling: CastlingRights,
    en_passant_target: Option<Square>,
    halfmove_clock: u32,
    captured_by_white: Vec<PieceType>,
    captured_by_black: Vec<PieceType>,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    /// Standard starting position.
    #[must_use]
    pub fn new() -> Self {
        let mut board = Self::empty();
        const BACK_RANK: [PieceType; 8] = [
            PieceType::Rook,
            PieceType::Knight,
            PieceType::Bishop,
            PieceType::Queen,
            PieceType::King,
            PieceType::Bishop,
            PieceType::Knight,
            PieceType::Rook,
        ];
        for (file, &piece_type) in BACK_RANK.iter().enumerate() {
            let file = file as u8;
            board.squares[0][file as usize] = Some(Piece::new(piece_type, Color::White));
            board.squares[1][file as usize] = Some(Piece::new(PieceType::Pawn, Color::White));
            board.squares[6][file as usize] = Some(Piece::new(PieceType::Pawn, Color::Black));
            board.squares[7][file as usize] = Some(Piece::new(piece_type, Color::Black));
        }
        board
    }

    /// An empty board with all castling rights held. Intended for setting up
    /// custom positions.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            squares: [[None; 8]; 8],
            castling: CastlingRights::ALL,
            en_passant_target: None,
            halfmove_clock: 0,
            captured_by_white: Vec::new(),
            captured_by_black: Vec::new(),
        }
    }

    /// Piece on a square, if any.
    #[must_use]
    pub fn piece_at(&self, sq: Square) -> Option<Piece> {
        self.squares[sq.rank as usize][sq.file as usize]
    }

    /// Place or clear a square. Custom-position setup only; performs no
    /// bookkeeping.
    pub fn set_piece(&mut self, sq: Square, piece: Option<Piece>) {
        self.squares[sq.rank as usize][sq.file as usize] = piece;
    }

    /// Current castling rights.
    #[must_use]
    pub const fn castling_rights(&self) -> CastlingRights {
        self.castling
    }

    /// Current en-passant target square, if the previous ply was a pawn
    /// double step.
    #[must_use]
    pub const fn en_passant_target(&self) -> Option<Square> {
        self.en_passant_target
    }

    /// Plies since the last pawn move or capture.
    #[must_use]
    pub const fn halfmove_clock(&self) -> u32 {
        self.halfmove_clock
    }

    /// Types captured by the given color, in capture order.
    #[must_use]
    pub fn captured_by(&self, color: Color) -> &[PieceType] {
        match color {
            Color::White => &self.captured_by_white,
            Color::Black => &self.captured_by_black,
        }
    }

    /// Number of pieces on the board.
    #[must_use]
    pub fn piece_count(&self) -> usize {
        self.squares
            .iter()
            .flatten()
            .filter(|cell| cell.is_some())
            .count()
    }

    /// The square the given color's king stands on.
    #[must_use]
    pub fn king_square(&self, color: Color) -> Option<Square> {
        self.occupied_squares(color)
            .find(|&sq| self.piece_at(sq).map(|p| p.piece_type) == Some(PieceType::King))
    }

    /// Row-major snapshot: row 0 is rank 8, row 7 is rank 1, columns are
    /// files a..h.
    #[must_use]
    pub fn to_rows(&self) -> [[Option<Piece>; 8]; 8] {
        let mut rows = [[None; 8]; 8];
        for (row, rank) in (0u8..8).rev().enumerate() {
            rows[row] = self.squares[rank as usize];
        }
        rows
    }

    // ------------------------------------------------------------------
    // SAN application
    // ------------------------------------------------------------------

    /// Validate `san` for `color` and, if legal, execute it. On failure the
    /// board is untouched.
    pub fn apply_san(&mut self, input: &str, color: Color) -> Result<MoveRecord, ChessError> {
        let record = self.resolve_san(input, color)?;
        self.execute(&record, color);
        Ok(record)
    }

    /// Validate `san` for `color` on a copy, leaving this board untouched.
    pub fn check_san(&self, input: &str, color: Color) -> Result<MoveRecord, ChessError> {
        self.clone().apply_san(input, color)
    }

    /// Resolve SAN to a unique, king-safe move without executing it.
    fn resolve_san(&self, input: &str, color: Color) -> Result<MoveRecord, ChessError> {
        match san::parse(input)? {
            ParsedSan::Castle(side) => {
                if !self.castle_available(color, side) {
                    return Err(ChessError::IllegalMove(input.to_string()));
                }
                Ok(self.castle_record(color, side))
            }
            ParsedSan::Normal {
                piece_type,
                file_hint,
                rank_hint,
                capture_marker: _,
                dest,
                promotion,
            } => {
                // Candidate set is geometric reach filtered by hints. The
                // ambiguity check runs on this set, before any check-safety
                // filtering: two hint-matching candidates reject the SAN
                // even when one of them is pinned.
                let candidates: Vec<Square> = self
                    .occupied_squares(color)
                    .filter(|&sq| {
                        let piece = self.piece_at(sq).expect("occupied");
                        piece.piece_type == piece_type
                            && file_hint.map_or(true, |f| sq.file == f)
                            && rank_hint.map_or(true, |r| sq.rank == r)
                            && self.can_reach(sq, dest)
                    })
                    .collect();

                let from = match candidates.as_slice() {
                    [] => return Err(ChessError::IllegalMove(input.to_string())),
                    [only] => *only,
                    _ => return Err(ChessError::AmbiguousMove(input.to_string())),
                };

                let promotes = piece_type == PieceType::Pawn && dest.rank == color.promotion_rank();
                if promotion.is_some() && !promotes {
                    return Err(ChessError::IllegalMove(input.to_string()));
                }
                let promotion = if promotes {
                    Some(promotion.unwrap_or(PieceType::Queen))
                } else {
                    None
                };

                let record = MoveRecord {
                    from,
                    to: dest,
                    piece_type,
                    promotion,
                    capture: self.is_capture(from, dest),
                    castle_kingside: false,
                    castle_queenside: false,
                    notation: self.notation_for(from, dest, promotion),
                };

                let mut probe = self.clone();
                probe.execute(&record, color);
                if probe.is_in_check(color) {
                    return Err(ChessError::SelfCheck(input.to_string()));
                }
                Ok(record)
            }
        }
    }

    /// Legal destination squares from `from`, for UI highlighting. Castling
    /// destinations are included when the piece is the king.
    #[must_use]
    pub fn legal_destinations(&self, from: Square) -> Vec<Square> {
        let Some(piece) = self.piece_at(from) else {
            return Vec::new();
        };
        let color = piece.color;
        let mut dests: Vec<Square> = self
            .all_squares()
            .filter(|&to| self.can_reach(from, to) && self.keeps_king_safe(from, to, color))
            .collect();
        if piece.piece_type == PieceType::King {
            for side in [CastleSide::KingSide, CastleSide::QueenSide] {
                if self.castle_available(color, side) {
                    dests.push(self.castle_record(color, side).to);
                }
            }
        }
        dests
    }

    /// Canonical SAN for a from/to pair in this position. Promotion defaults
    /// to queen when a pawn reaches the last rank without an explicit choice.
    pub fn san_for_move(
        &self,
        from: Square,
        to: Square,
        promotion: Option<PieceType>,
    ) -> Result<String, ChessError> {
        let piece = self
            .piece_at(from)
            .ok_or_else(|| ChessError::IllegalMove(format!("{from}{to}")))?;
        if piece.piece_type == PieceType::King
            && from.file == 4
            && from.rank == piece.color.back_rank()
            && to.rank == from.rank
        {
            if to.file == 6 {
                return Ok("O-O".to_string());
            }
            if to.file == 2 {
                return Ok("O-O-O".to_string());
            }
        }
        if !self.can_reach(from, to) {
            return Err(ChessError::IllegalMove(format!("{from}{to}")));
        }
        let promotion =
            if piece.piece_type == PieceType::Pawn && to.rank == piece.color.promotion_rank() {
                Some(promotion.unwrap_or(PieceType::Queen))
            } else {
                None
            };
        Ok(self.notation_for(from, to, promotion))
    }

    // ------------------------------------------------------------------
    // Terminal detection
    // ------------------------------------------------------------------

    /// Is the given color's king attacked?
    #[must_use]
    pub fn is_in_check(&self, color: Color) -> bool {
        self.king_square(color)
            .is_some_and(|sq| self.is_attacked(sq, color.opposite()))
    }

    /// Checkmate: in check with no legal move.
    #[must_use]
    pub fn is_checkmate(&self, color: Color) -> bool {
        self.is_in_check(color) && !self.has_any_legal_move(color)
    }

    /// Stalemate: not in check, but no legal move.
    #[must_use]
    pub fn is_stalemate(&self, color: Color) -> bool {
        !self.is_in_check(color) && !self.has_any_legal_move(color)
    }

    /// Fifty-move draw: 100 plies without a pawn move or capture.
    #[must_use]
    pub const fn is_fifty_move_draw(&self) -> bool {
        self.halfmove_clock >= 100
    }

    /// Does any legal move exist for `color`?
    #[must_use]
    pub fn has_any_legal_move(&self, color: Color) -> bool {
        let movable = self.occupied_squares(color).any(|from| {
            self.all_squares()
                .any(|to| self.can_reach(from, to) && self.keeps_king_safe(from, to, color))
        });
        movable
            || self.castle_available(color, CastleSide::KingSide)
            || self.castle_available(color, CastleSide::QueenSide)
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    fn all_squares(&self) -> impl Iterator<Item = Square> + '_ {
        (0u8..8).flat_map(|rank| (0u8..8).map(move |file| Square { file, rank }))
    }

    fn occupied_squares(&self, color: Color) -> impl Iterator<Item = Square> + '_ {
        self.all_squares()
            .filter(move |&sq| self.piece_at(sq).is_some_and(|p| p.color == color))
    }

    /// Geometric reachability for movement: piece at `from` can move to
    /// `to` under its movement rules with a clear path. Ignores king safety.
    fn can_reach(&self, from: Square, to: Square) -> bool {
        if from == to {
            return false;
        }
        let Some(piece) = self.piece_at(from) else {
            return false;
        };
        if self.piece_at(to).is_some_and(|p| p.color == piece.color) {
            return false;
        }
        let df = to.file as i8 - from.file as i8;
        let dr = to.rank as i8 - from.rank as i8;
        match piece.piece_type {
            PieceType::King => df.abs() <= 1 && dr.abs() <= 1,
            PieceType::Knight => {
                (df.abs() == 1 && dr.abs() == 2) || (df.abs() == 2 && dr.abs() == 1)
            }
            PieceType::Bishop => df.abs() == dr.abs() && self.path_clear(from, to),
            PieceType::Rook => (df == 0 || dr == 0) && self.path_clear(from, to),
            PieceType::Queen => {
                (df.abs() == dr.abs() || df == 0 || dr == 0) && self.path_clear(from, to)
            }
            PieceType::Pawn => {
                let forward = piece.color.forward();
                if df == 0 {
                    // Pushes require empty squares all the way.
                    if self.piece_at(to).is_some() {
                        return false;
                    }
                    if dr == forward {
                        return true;
                    }
                    dr == 2 * forward
                        && from.rank == piece.color.pawn_rank()
                        && from
                            .offset(0, forward)
                            .is_some_and(|mid| self.piece_at(mid).is_none())
                } else {
                    // Diagonal capture, onto an enemy piece or the
                    // en-passant target.
                    df.abs() == 1
                        && dr == forward
                        && (self.piece_at(to).is_some_and(|p| p.color != piece.color)
                            || self.en_passant_target == Some(to))
                }
            }
        }
    }

    /// Are all squares strictly between `from` and `to` empty? `from`/`to`
    /// must share a rank, file or diagonal.
    fn path_clear(&self, from: Square, to: Square) -> bool {
        let df = (to.file as i8 - from.file as i8).signum();
        let dr = (to.rank as i8 - from.rank as i8).signum();
        let mut current = from;
        loop {
            current = match current.offset(df, dr) {
                Some(sq) => sq,
                None => return false,
            };
            if current == to {
                return true;
            }
            if self.piece_at(current).is_some() {
                return false;
            }
        }
    }

    /// Is `sq` attacked by any piece of color `by`? Purely geometric:
    /// pawns attack diagonally only, everything else as in movement.
    #[must_use]
    pub fn is_attacked(&self, sq: Square, by: Color) -> bool {
        self.occupied_squares(by).any(|from| {
            let piece = self.piece_at(from).expect("occupied");
            let df = sq.file as i8 - from.file as i8;
            let dr = sq.rank as i8 - from.rank as i8;
            if df == 0 && dr == 0 {
                return false;
            }
            match piece.piece_type {
                PieceType::Pawn => df.abs() == 1 && dr == by.forward(),
                PieceType::King => df.abs() <= 1 && dr.abs() <= 1,
                PieceType::Knight => {
                    (df.abs() == 1 && dr.abs() == 2) || (df.abs() == 2 && dr.abs() == 1)
                }
                PieceType::Bishop => df.abs() == dr.abs() && self.path_clear(from, sq),
                PieceType::Rook => (df == 0 || dr == 0) && self.path_clear(from, sq),
                PieceType::Queen => {
                    (df.abs() == dr.abs() || df == 0 || dr == 0) && self.path_clear(from, sq)
                }
            }
        })
    }

    /// Would moving `from` -> `to` leave the mover's king safe? Runs the
    /// move on a copy.
    fn keeps_king_safe(&self, from: Square, to: Square, color: Color) -> bool {
        let Some(piece) = self.piece_at(from) else {
            return false;
        };
        let promotion =
            if piece.piece_type == PieceType::Pawn && to.rank == piece.color.promotion_rank() {
                Some(PieceType::Queen)
            } else {
                None
            };
        let record = MoveRecord {
            from,
            to,
            piece_type: piece.piece_type,
            promotion,
            capture: self.is_capture(from, to),
            castle_kingside: false,
            castle_queenside: false,
            notation: String::new(),
        };
        let mut probe = self.clone();
        probe.execute(&record, color);
        !probe.is_in_check(color)
    }

    fn is_capture(&self, from: Square, to: Square) -> bool {
        if self.piece_at(to).is_some() {
            return true;
        }
        // Diagonal pawn move to an empty square is en passant.
        self.piece_at(from)
            .is_some_and(|p| p.piece_type == PieceType::Pawn)
            && from.file != to.file
            && self.en_passant_target == Some(to)
    }

    // ------------------------------------------------------------------
    // Castling
    // ------------------------------------------------------------------

    /// All castling preconditions for `color` on `side`.
    #[must_use]
    pub fn castle_available(&self, color: Color, side: CastleSide) -> bool {
        if !self.castling.has(color, side) {
            return false;
        }
        let rank = color.back_rank();
        let king_from = Square { file: 4, rank };
        let rook_file: u8 = match side {
            CastleSide::KingSide => 7,
            CastleSide::QueenSide => 0,
        };
        let rook_from = Square {
            file: rook_file,
            rank,
        };
        if self.piece_at(king_from) != Some(Piece::new(PieceType::King, color))
            || self.piece_at(rook_from) != Some(Piece::new(PieceType::Rook, color))
        {
            return false;
        }
        let between: &[u8] = match side {
            CastleSide::KingSide => &[5, 6],
            CastleSide::QueenSide => &[1, 2, 3],
        };
        if between
            .iter()
            .any(|&file| self.piece_at(Square { file, rank }).is_some())
        {
            return false;
        }
        let enemy = color.opposite();
        if self.is_attacked(king_from, enemy) {
            return false;
        }
        // The square the king passes through and the square it lands on.
        let king_path: [u8; 2] = match side {
            CastleSide::KingSide => [5, 6],
            CastleSide::QueenSide => [3, 2],
        };
        !king_path
            .iter()
            .any(|&file| self.is_attacked(Square { file, rank }, enemy))
    }

    fn castle_record(&self, color: Color, side: CastleSide) -> MoveRecord {
        let rank = color.back_rank();
        let (to_file, notation) = match side {
            CastleSide::KingSide => (6, "O-O"),
            CastleSide::QueenSide => (2, "O-O-O"),
        };
        MoveRecord {
            from: Square { file: 4, rank },
            to: Square {
                file: to_file,
                rank,
            },
            piece_type: PieceType::King,
            promotion: None,
            capture: false,
            castle_kingside: side == CastleSide::KingSide,
            castle_queenside: side == CastleSide::QueenSide,
            notation: notation.to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Execute a resolved move. The record must have come from resolution
    /// against this exact position.
    fn execute(&mut self, record: &MoveRecord, color: Color) {
        if record.castle_kingside || record.castle_queenside {
            self.execute_castle(record, color);
            return;
        }

        let from = record.from;
        let to = record.to;
        let piece = self.piece_at(from).expect("resolved move has a mover");

        // En passant removes the pawn beside the target, not on it.
        let is_en_passant = piece.piece_type == PieceType::Pawn
            && from.file != to.file
            && self.piece_at(to).is_none()
            && self.en_passant_target == Some(to);

        let captured = if is_en_passant {
            let victim = Square {
                file: to.file,
                rank: from.rank,
            };
            self.set_piece(victim, None);
            Some(PieceType::Pawn)
        } else {
            self.piece_at(to).map(|p| p.piece_type)
        };

        self.set_piece(from, None);
        let placed = match record.promotion {
            Some(promo) => Piece::new(promo, color),
            None => piece,
        };
        self.set_piece(to, Some(placed));

        // En-passant target: set only on a pawn double step.
        self.en_passant_target = if piece.piece_type == PieceType::Pawn
            && (to.rank as i8 - from.rank as i8).abs() == 2
        {
            from.offset(0, color.forward())
        } else {
            None
        };

        // Half-move clock resets on pawn moves and captures.
        if piece.piece_type == PieceType::Pawn || captured.is_some() {
            self.halfmove_clock = 0;
        } else {
            self.halfmove_clock += 1;
        }

        // Castling rights: any king move clears both for the mover; a rook
        // leaving its corner clears that side; anything arriving on an
        // opposing rook's corner clears the opponent's side (rook captures).
        if piece.piece_type == PieceType::King {
            self.castling.clear_both(color);
        }
        if piece.piece_type == PieceType::Rook {
            if let Some(side) = rook_corner_side(from, color) {
                self.castling.clear(color, side);
            }
        }
        if let Some(side) = rook_corner_side(to, color.opposite()) {
            self.castling.clear(color.opposite(), side);
        }

        if let Some(captured) = captured {
            match color {
                Color::White => self.captured_by_white.push(captured),
                Color::Black => self.captured_by_black.push(captured),
            }
        }
    }

    fn execute_castle(&mut self, record: &MoveRecord, color: Color) {
        let rank = color.back_rank();
        let (rook_from, rook_to) = if record.castle_kingside {
            (Square { file: 7, rank }, Square { file: 5, rank })
        } else {
            (Square { file: 0, rank }, Square { file: 3, rank })
        };
        let king = self.piece_at(record.from).expect("king on start square");
        let rook = self.piece_at(rook_from).expect("rook on corner");
        self.set_piece(record.from, None);
        self.set_piece(rook_from, None);
        self.set_piece(record.to, Some(king));
        self.set_piece(rook_to, Some(rook));
        self.castling.clear_both(color);
        self.en_passant_target = None;
        self.halfmove_clock += 1;
    }

    // ------------------------------------------------------------------
    // Notation
    // ------------------------------------------------------------------

    /// Canonical SAN for a resolved non-castle move in this (pre-move)
    /// position: piece letter, minimal disambiguation computed against the
    /// same geometric candidate set the parser counts, capture marker,
    /// destination and promotion suffix.
    fn notation_for(&self, from: Square, to: Square, promotion: Option<PieceType>) -> String {
        let piece = self.piece_at(from).expect("mover present");
        let capture = self.is_capture(from, to);
        let mut out = String::new();

        if piece.piece_type == PieceType::Pawn {
            if capture {
                out.push(from.file_char());
                out.push('x');
            }
        } else {
            out.push(piece.piece_type.san_letter());
            let rivals: Vec<Square> = self
                .occupied_squares(piece.color)
                .filter(|&sq| {
                    sq != from
                        && self.piece_at(sq).expect("occupied").piece_type == piece.piece_type
                        && self.can_reach(sq, to)
                })
                .collect();
            if !rivals.is_empty() {
                if rivals.iter().all(|sq| sq.file != from.file) {
                    out.push(from.file_char());
                } else if rivals.iter().all(|sq| sq.rank != from.rank) {
                    out.push(from.rank_char());
                } else {
                    out.push(from.file_char());
                    out.push(from.rank_char());
                }
            }
            if capture {
                out.push('x');
            }
        }

        out.push(to.file_char());
        out.push(to.rank_char());
        if let Some(promo) = promotion {
            out.push('=');
            out.push(promo.san_letter());
        }
        out
    }
}

/// If `sq` is one of `color`'s rook starting corners, which castle side it
/// belongs to.
fn rook_corner_side(sq: Square, color: Color) -> Option<CastleSide> {
    if sq.rank != color.back_rank() {
        return None;
    }
    match sq.file {
        0 => Some(CastleSide::QueenSide),
        7 => Some(CastleSide::KingSide),
        _ => None,
    }
}
