//! Chess Rules Oracle backed by shakmaty.
//!
//! Positions travel through the core as FEN plus derived facts; every call
//! rebuilds the shakmaty position from the FEN, so the oracle itself holds
//! no per-session state.

use std::collections::BTreeMap;

use async_trait::async_trait;
use shakmaty::{
    fen::Fen, san::San, uci::UciMove, CastlingMode, Chess, EnPassantMode, Position as _,
};

use super::{ChessOracle, MoveVerdict, OracleError};
use crate::types::{GameMode, Move, Piece, Position, Square};

/// Halfmove clock value at which the fifty-move rule applies.
const FIFTY_MOVE_HALFMOVES: u32 = 100;

/// Occurrences of the same position that make a repetition draw.
const REPETITION_COUNT: usize = 3;

/// Oracle implementing standard chess rules with shakmaty.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShakmatyOracle;

impl ShakmatyOracle {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Rebuild a shakmaty position from our snapshot.
    fn parse(position: &Position) -> Result<Chess, OracleError> {
        let fen: Fen = position
            .fen()
            .parse()
            .map_err(|e| OracleError::Unavailable(format!("corrupt position FEN: {e}")))?;
        fen.into_position(CastlingMode::Standard)
            .map_err(|e| OracleError::Unavailable(format!("corrupt position: {e}")))
    }

    /// Build our snapshot from a shakmaty position.
    fn snapshot(chess: &Chess, last_move: Option<Move>, mut history: Vec<String>) -> Position {
        let fen = Fen::from_position(chess.clone(), EnPassantMode::Legal).to_string();
        history.push(repetition_key(&fen));

        let board = chess.board();
        let pieces: BTreeMap<Square, Piece> = Square::all()
            .filter_map(|sq| {
                board
                    .piece_at(shakmaty::Square::from(sq))
                    .map(|p| (sq, Piece::from(p)))
            })
            .collect();

        let position = Position::new(fen, chess.turn().into(), pieces)
            .with_check(chess.is_check())
            .with_history(history);
        match last_move {
            Some(mv) => position.with_last_move(mv),
            None => position,
        }
    }
}

/// The part of a FEN that identifies a position for repetition: placement,
/// side to move, castling rights and en passant square.
fn repetition_key(fen: &str) -> String {
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl ChessOracle for ShakmatyOracle {
    async fn initial_position(&self, _mode: GameMode) -> Result<Position, OracleError> {
        Ok(Self::snapshot(&Chess::default(), None, Vec::new()))
    }

    async fn validate_move(
        &self,
        position: &Position,
        mv: &Move,
    ) -> Result<MoveVerdict, OracleError> {
        let chess = Self::parse(position)?;

        let uci: UciMove = mv
            .uci()
            .parse()
            .map_err(|_| OracleError::Illegal(mv.to_string()))?;
        let m = uci
            .to_move(&chess)
            .map_err(|_| OracleError::Illegal(mv.to_string()))?;
        if !chess.is_legal(&m) {
            return Err(OracleError::Illegal(mv.to_string()));
        }

        // SAN depends on the position before the move.
        let san = San::from_move(&chess, &m).to_string();
        let is_capture = m.is_capture();

        let after = chess
            .play(&m)
            .map_err(|_| OracleError::Illegal(mv.to_string()))?;

        let next = Self::snapshot(&after, Some(*mv), position.history().to_vec());
        let current_key = next.history().last().cloned().unwrap_or_default();
        let repetitions = next
            .history()
            .iter()
            .filter(|k| **k == current_key)
            .count();

        Ok(MoveVerdict {
            san,
            is_capture,
            is_check: after.is_check(),
            is_checkmate: after.is_checkmate(),
            is_stalemate: after.is_stalemate(),
            is_draw: after.halfmoves() >= FIFTY_MOVE_HALFMOVES,
            is_insufficient_material: after.is_insufficient_material(),
            is_repetition: repetitions >= REPETITION_COUNT,
            position: next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Color, EndReason, PieceKind};

    fn mv(s: &str) -> Move {
        s.parse().unwrap()
    }

    fn from_fen(fen: &str) -> Position {
        let fen: Fen = fen.parse().unwrap();
        let chess: Chess = fen.into_position(CastlingMode::Standard).unwrap();
        ShakmatyOracle::snapshot(&chess, None, Vec::new())
    }

    async fn play_all(oracle: &ShakmatyOracle, moves: &[&str]) -> MoveVerdict {
        let mut position = oracle.initial_position(GameMode::Standard).await.unwrap();
        let mut last = None;
        for m in moves {
            let verdict = oracle.validate_move(&position, &mv(m)).await.unwrap();
            position = verdict.position.clone();
            last = Some(verdict);
        }
        last.expect("at least one move")
    }

    #[tokio::test]
    async fn test_starting_position() {
        let pos = ShakmatyOracle.initial_position(GameMode::Blitz).await.unwrap();
        assert_eq!(pos.turn(), Color::White);
        assert_eq!(pos.pieces().count(), 32);
        assert!(!pos.is_check());
        assert_eq!(
            pos.piece_at("e1".parse().unwrap()).map(|p| p.kind),
            Some(PieceKind::King)
        );
    }

    #[tokio::test]
    async fn test_legal_move() {
        let verdict = play_all(&ShakmatyOracle, &["e2e4"]).await;
        assert_eq!(verdict.san, "e4");
        assert_eq!(verdict.position.turn(), Color::Black);
        assert!(verdict.position.is_occupied("e4".parse().unwrap()));
        assert!(!verdict.position.is_occupied("e2".parse().unwrap()));
        assert_eq!(verdict.position.last_move(), Some(mv("e2e4")));
        assert!(verdict.terminal().is_none());
    }

    #[tokio::test]
    async fn test_illegal_move() {
        let oracle = ShakmatyOracle;
        let pos = oracle.initial_position(GameMode::Standard).await.unwrap();
        let result = oracle.validate_move(&pos, &mv("e2e5")).await;
        assert!(matches!(result, Err(OracleError::Illegal(_))));

        // Wrong color's pawn.
        let result = oracle.validate_move(&pos, &mv("e7e5")).await;
        assert!(matches!(result, Err(OracleError::Illegal(_))));
    }

    #[tokio::test]
    async fn test_checkmate_fools_mate() {
        let verdict = play_all(&ShakmatyOracle, &["f2f3", "e7e5", "g2g4", "d8h4"]).await;
        assert!(verdict.is_check);
        assert!(verdict.is_checkmate);
        assert_eq!(verdict.terminal(), Some(EndReason::Checkmate));
    }

    #[tokio::test]
    async fn test_capture_flag() {
        let verdict = play_all(&ShakmatyOracle, &["e2e4", "d7d5", "e4d5"]).await;
        assert!(verdict.is_capture);
        assert_eq!(verdict.san, "exd5");
    }

    #[tokio::test]
    async fn test_en_passant_is_capture() {
        let pos = from_fen("rnbqkbnr/pppp1ppp/8/4pP2/8/8/PPPPP1PP/RNBQKBNR w KQkq e6 0 3");
        let verdict = ShakmatyOracle.validate_move(&pos, &mv("f5e6")).await.unwrap();
        assert!(verdict.is_capture);
        assert!(!verdict.position.is_occupied("e5".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_promotion() {
        let pos = from_fen("8/P7/8/8/8/7k/8/4K3 w - - 0 1");
        let verdict = ShakmatyOracle
            .validate_move(&pos, &mv("a7a8q"))
            .await
            .unwrap();
        assert_eq!(verdict.san, "a8=Q");
        assert_eq!(
            verdict.position.piece_at("a8".parse().unwrap()).map(|p| p.kind),
            Some(PieceKind::Queen)
        );
    }

    #[tokio::test]
    async fn test_stalemate() {
        // Black queen to g3 stalemates the white king on h1.
        let pos = from_fen("8/8/8/8/8/4q3/5k2/7K b - - 0 1");
        let verdict = ShakmatyOracle.validate_move(&pos, &mv("e3g3")).await.unwrap();
        assert!(verdict.is_stalemate);
        assert_eq!(verdict.terminal(), Some(EndReason::Stalemate));
    }

    #[tokio::test]
    async fn test_insufficient_material() {
        // King takes the last rook.
        let pos = from_fen("k7/8/8/8/4r3/4K3/8/8 w - - 0 1");
        let verdict = ShakmatyOracle.validate_move(&pos, &mv("e3e4")).await.unwrap();
        assert!(verdict.is_insufficient_material);
        assert_eq!(verdict.terminal(), Some(EndReason::InsufficientMaterial));
    }

    #[tokio::test]
    async fn test_fifty_move_rule() {
        let pos = from_fen("8/8/8/4k3/8/8/8/R3K3 w - - 99 80");
        let verdict = ShakmatyOracle.validate_move(&pos, &mv("a1a2")).await.unwrap();
        assert!(verdict.is_draw);
        assert_eq!(verdict.terminal(), Some(EndReason::Draw));
    }

    #[tokio::test]
    async fn test_threefold_repetition() {
        let verdict = play_all(
            &ShakmatyOracle,
            &["g1f3", "g8f6", "f3g1", "f6g8", "g1f3", "g8f6", "f3g1", "f6g8"],
        )
        .await;
        assert!(verdict.is_repetition);
        assert_eq!(verdict.terminal(), Some(EndReason::Repetition));
    }

    #[tokio::test]
    async fn test_twofold_is_not_repetition() {
        let verdict = play_all(&ShakmatyOracle, &["g1f3", "g8f6", "f3g1", "f6g8"]).await;
        assert!(!verdict.is_repetition);
    }

    #[test]
    fn test_repetition_key_drops_counters() {
        assert_eq!(
            repetition_key("8/8/8/8/8/8/8/4K2k w - - 12 40"),
            "8/8/8/8/8/8/8/4K2k w - -"
        );
    }
}
