//! Chess Rules Oracle port.
//!
//! The Session Engine asks the oracle whether a move is legal and what the
//! resulting position and terminal flags are. It never reimplements chess
//! legality itself.

pub mod engine;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{EndReason, GameMode, Move, Position};

pub use engine::ShakmatyOracle;

/// Errors returned by an oracle.
#[derive(Debug, Clone, Error)]
pub enum OracleError {
    /// The move is not legal in the given position.
    #[error("illegal move: {0}")]
    Illegal(String),

    /// The oracle could not answer; nothing was decided.
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

/// Verdict for a legal move.
#[derive(Debug, Clone)]
pub struct MoveVerdict {
    /// Position after the move.
    pub position: Position,
    /// The move in SAN notation.
    pub san: String,
    /// The move captured a piece (including en passant).
    pub is_capture: bool,
    /// The side to move in `position` is in check.
    pub is_check: bool,
    pub is_checkmate: bool,
    pub is_stalemate: bool,
    /// Draw not covered by the other flags (fifty-move rule).
    pub is_draw: bool,
    pub is_insufficient_material: bool,
    pub is_repetition: bool,
}

impl MoveVerdict {
    /// The terminal condition reported by the oracle, if any. Checkmate
    /// takes precedence over the draw conditions.
    #[must_use]
    pub const fn terminal(&self) -> Option<EndReason> {
        if self.is_checkmate {
            Some(EndReason::Checkmate)
        } else if self.is_stalemate {
            Some(EndReason::Stalemate)
        } else if self.is_insufficient_material {
            Some(EndReason::InsufficientMaterial)
        } else if self.is_repetition {
            Some(EndReason::Repetition)
        } else if self.is_draw {
            Some(EndReason::Draw)
        } else {
            None
        }
    }
}

/// External chess legality capability.
#[async_trait]
pub trait ChessOracle: Send + Sync {
    /// Starting position for a new session.
    async fn initial_position(&self, mode: GameMode) -> Result<Position, OracleError>;

    /// Validate `mv` in `position`. Must not have side effects.
    async fn validate_move(
        &self,
        position: &Position,
        mv: &Move,
    ) -> Result<MoveVerdict, OracleError>;
}
