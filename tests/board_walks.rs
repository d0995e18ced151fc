//! Randomized legal-move walks over the rules engine.
//!
//! A seeded LCG picks random legal moves for up to 200 plies per game and
//! checks the board invariants after every single move.

use chess_arena::chess::{Board, CastlingRights};
use chess_arena::types::{Color, PieceType, Square};

/// Simple LCG (Numerical Recipes constants) so walks are deterministic.
struct SimpleRng {
    state: u32,
}

impl SimpleRng {
    fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.state
    }

    fn next_range(&mut self, max: u32) -> u32 {
        self.next_u32() % max
    }
}

fn all_squares() -> impl Iterator<Item = Square> {
    (0u8..8).flat_map(|rank| (0u8..8).map(move |file| Square { file, rank }))
}

/// Every legal `(from, to)` pair for `color`.
fn legal_moves(board: &Board, color: Color) -> Vec<(Square, Square)> {
    all_squares()
        .filter(|&sq| board.piece_at(sq).is_some_and(|p| p.color == color))
        .flat_map(|from| {
            board
                .legal_destinations(from)
                .into_iter()
                .map(move |to| (from, to))
        })
        .collect()
}

fn captured_total(board: &Board) -> usize {
    board.captured_by(Color::White).len() + board.captured_by(Color::Black).len()
}

fn assert_rights_monotonic(before: CastlingRights, after: CastlingRights) {
    assert!(before.white_kingside || !after.white_kingside);
    assert!(before.white_queenside || !after.white_queenside);
    assert!(before.black_kingside || !after.black_kingside);
    assert!(before.black_queenside || !after.black_queenside);
}

fn assert_snapshot_orientation(board: &Board) {
    let rows = board.to_rows();
    for sq in all_squares() {
        assert_eq!(
            rows[7 - sq.rank as usize][sq.file as usize],
            board.piece_at(sq),
            "row 0 must be rank 8, columns must be files a..h"
        );
    }
}

#[test]
fn random_walks_hold_invariants() {
    for seed in 1..=10u32 {
        let mut rng = SimpleRng::new(seed);
        let mut board = Board::new();
        let mut color = Color::White;

        for ply in 0..200 {
            if board.is_fifty_move_draw() {
                break;
            }
            let moves = legal_moves(&board, color);
            if moves.is_empty() {
                // Mate or stalemate ends the walk.
                assert!(
                    board.is_checkmate(color) || board.is_stalemate(color),
                    "seed {seed} ply {ply}: no moves but not terminal"
                );
                break;
            }

            let (from, to) = moves[rng.next_range(moves.len() as u32) as usize];
            let san = board
                .san_for_move(from, to, None)
                .unwrap_or_else(|e| panic!("seed {seed} ply {ply}: builder failed: {e}"));

            let before = board.clone();
            let record = board.apply_san(&san, color).unwrap_or_else(|e| {
                panic!("seed {seed} ply {ply}: emitted SAN {san} rejected: {e}")
            });

            // Mover never ends in check.
            assert!(
                !board.is_in_check(color),
                "seed {seed} ply {ply}: {san} left the mover in check"
            );

            // Material conservation: board pieces + capture lists = 32.
            assert_eq!(
                board.piece_count() + captured_total(&board),
                32,
                "seed {seed} ply {ply}: material leaked on {san}"
            );

            // Half-move clock resets on pawn moves and captures, else +1.
            if record.piece_type == PieceType::Pawn || record.capture {
                assert_eq!(board.halfmove_clock(), 0, "seed {seed} ply {ply}: {san}");
            } else {
                assert_eq!(
                    board.halfmove_clock(),
                    before.halfmove_clock() + 1,
                    "seed {seed} ply {ply}: {san}"
                );
            }

            // Castling rights never come back.
            assert_rights_monotonic(before.castling_rights(), board.castling_rights());

            // En-passant target exists only right after a pawn double step.
            if let Some(target) = board.en_passant_target() {
                assert_eq!(record.piece_type, PieceType::Pawn);
                assert_eq!((record.to.rank as i8 - record.from.rank as i8).abs(), 2);
                assert_eq!(target.file, record.from.file);
                assert!(
                    board.piece_at(target).is_none(),
                    "seed {seed} ply {ply}: skipped square occupied"
                );
            }

            // Re-parsing the engine's own SAN reproduces the same board.
            let mut replay = before.clone();
            replay
                .apply_san(&record.notation, color)
                .unwrap_or_else(|e| {
                    panic!("seed {seed} ply {ply}: notation {} rejected: {e}", record.notation)
                });
            assert_eq!(replay, board, "seed {seed} ply {ply}: {san} not reproducible");

            if ply % 50 == 0 {
                assert_snapshot_orientation(&board);
            }
            color = color.opposite();
        }

        assert_snapshot_orientation(&board);
    }
}

#[test]
fn walks_preserve_exactly_one_king_each() {
    for seed in 20..=24u32 {
        let mut rng = SimpleRng::new(seed);
        let mut board = Board::new();
        let mut color = Color::White;
        for _ in 0..200 {
            if board.is_fifty_move_draw() {
                break;
            }
            let moves = legal_moves(&board, color);
            if moves.is_empty() {
                break;
            }
            let (from, to) = moves[rng.next_range(moves.len() as u32) as usize];
            let san = board.san_for_move(from, to, None).unwrap();
            board.apply_san(&san, color).unwrap();

            assert!(board.king_square(Color::White).is_some());
            assert!(board.king_square(Color::Black).is_some());
            color = color.opposite();
        }
    }
}
