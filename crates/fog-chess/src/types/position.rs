//! Oracle-owned position snapshot.
//!
//! The core never interprets the FEN or the repetition keys; it only reads
//! the derived facts (side to move, occupancy, check) and hands the value
//! back to the oracle on the next move.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::chess::{Color, Move, Piece, PieceKind, Square};

/// Immutable snapshot of a chess position plus the facts the core reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    fen: String,
    turn: Color,
    board: BTreeMap<Square, Piece>,
    #[serde(default)]
    check: bool,
    #[serde(default)]
    last_move: Option<Move>,
    /// Keys of every position reached so far, this one last. Opaque to the
    /// core; the oracle uses them for repetition detection.
    #[serde(default)]
    history: Vec<String>,
}

impl Position {
    #[must_use]
    pub fn new(fen: impl Into<String>, turn: Color, board: BTreeMap<Square, Piece>) -> Self {
        Self {
            fen: fen.into(),
            turn,
            board,
            check: false,
            last_move: None,
            history: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    #[must_use]
    pub fn with_last_move(mut self, mv: Move) -> Self {
        self.last_move = Some(mv);
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn fen(&self) -> &str {
        &self.fen
    }

    /// Side to move.
    #[must_use]
    pub const fn turn(&self) -> Color {
        self.turn
    }

    /// Whether the side to move is in check.
    #[must_use]
    pub const fn is_check(&self) -> bool {
        self.check
    }

    #[must_use]
    pub const fn last_move(&self) -> Option<Move> {
        self.last_move
    }

    #[must_use]
    pub fn history(&self) -> &[String] {
        &self.history
    }

    #[must_use]
    pub fn piece_at(&self, square: Square) -> Option<Piece> {
        self.board.get(&square).copied()
    }

    #[must_use]
    pub fn is_occupied(&self, square: Square) -> bool {
        self.board.contains_key(&square)
    }

    /// Occupied squares and their pieces in ascending square order.
    pub fn pieces(&self) -> impl Iterator<Item = (Square, Piece)> + '_ {
        self.board.iter().map(|(sq, p)| (*sq, *p))
    }

    /// Squares occupied by `color`.
    pub fn occupied_by(&self, color: Color) -> impl Iterator<Item = Square> + '_ {
        self.pieces()
            .filter(move |(_, p)| p.color == color)
            .map(|(sq, _)| sq)
    }

    #[must_use]
    pub fn king_square(&self, color: Color) -> Option<Square> {
        self.pieces()
            .find(|(_, p)| p.color == color && p.kind == PieceKind::King)
            .map(|(sq, _)| sq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(entries: &[(&str, Color, PieceKind)]) -> BTreeMap<Square, Piece> {
        entries
            .iter()
            .map(|(s, color, kind)| {
                (
                    s.parse().unwrap(),
                    Piece {
                        color: *color,
                        kind: *kind,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_derived_facts() {
        let pos = Position::new(
            "4k3/8/8/8/8/8/8/4K3 w - - 0 1",
            Color::White,
            board(&[
                ("e1", Color::White, PieceKind::King),
                ("e8", Color::Black, PieceKind::King),
            ]),
        );
        assert_eq!(pos.turn(), Color::White);
        assert_eq!(pos.king_square(Color::Black), Some("e8".parse().unwrap()));
        assert!(pos.is_occupied("e1".parse().unwrap()));
        assert!(!pos.is_occupied("e2".parse().unwrap()));
        assert_eq!(pos.occupied_by(Color::White).count(), 1);
    }

    #[test]
    fn test_position_json_uses_square_labels() {
        let pos = Position::new(
            "8/8/8/8/8/8/8/4K3 w - - 0 1",
            Color::White,
            board(&[("e1", Color::White, PieceKind::King)]),
        );
        let json = serde_json::to_string(&pos).unwrap();
        assert!(json.contains("\"e1\""), "got: {json}");
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pos);
    }
}
