//! Shared domain types.

pub mod chess;
pub mod events;

pub use chess::{Color, Piece, PieceType, Square};
