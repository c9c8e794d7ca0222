//! Fog-of-War Engine.
//!
//! Pure functions over a position snapshot and a player's [`FogState`]:
//!
//! - [`reveal`] computes the squares newly revealed to the mover by the move
//!   just played. The Session Engine adds them to the mover's FogState.
//! - [`visible_squares`] computes what a player can currently see, for
//!   filtering what the gateway sends to that player.
//!
//! ## Reveal rules
//!
//! | Mode     | Trigger                  | Revealed                                   |
//! |----------|--------------------------|--------------------------------------------|
//! | both     | capture on `to`          | 3x3 around `to`                            |
//! | Standard | move gives check         | checked king's square and its 3x3          |
//! | Blitz    | every move               | up to 2 squares past `to` along the move's |
//! |          |                          | direction, stopping after an occupied one  |
//!
//! Squares already in the prior FogState are never reported again.

use std::collections::BTreeSet;

use crate::types::{Color, FogState, GameMode, Move, Position, Square};

/// How far a Blitz move's direction is continued past its destination.
const BLITZ_SCAN_DEPTH: usize = 2;

/// A move that has just been committed, as seen by the fog engine.
#[derive(Debug, Clone, Copy)]
pub struct PlayedMove<'a> {
    pub mode: GameMode,
    pub mover: Color,
    pub mv: Move,
    /// Whether the move captured a piece (en passant included).
    pub capture: bool,
    /// Position after the move.
    pub position: &'a Position,
}

/// Squares newly revealed to the mover, in ascending square order.
///
/// Deterministic, and never returns a square already present in `prior`.
#[must_use]
pub fn reveal(played: &PlayedMove<'_>, prior: &FogState) -> Vec<Square> {
    let mut squares = BTreeSet::new();
    let to = played.mv.to;

    if played.capture {
        squares.extend(to.neighborhood());
    }

    match played.mode {
        GameMode::Standard => {
            if played.position.is_check() {
                // The side to move after the mover's move is the one in check.
                if let Some(king) = played.position.king_square(played.mover.opposite()) {
                    squares.extend(king.neighborhood());
                }
            }
        }
        GameMode::Blitz => {
            squares.extend(direction_scan(played.position, played.mv));
        }
    }

    squares.retain(|sq| !prior.contains(*sq));
    squares.into_iter().collect()
}

/// Continue the move's (sign df, sign dr) direction past `to`.
fn direction_scan(position: &Position, mv: Move) -> Vec<Square> {
    let (df, dr) = mv.direction();
    let mut out = Vec::with_capacity(BLITZ_SCAN_DEPTH);
    let mut cursor = mv.to;
    for _ in 0..BLITZ_SCAN_DEPTH {
        let Some(next) = cursor.offset(df, dr) else {
            break;
        };
        out.push(next);
        if position.is_occupied(next) {
            break;
        }
        cursor = next;
    }
    out
}

/// Everything `color` can currently see in `position`.
///
/// Union of the player's FogState, their own half of the board, and the
/// 8-neighbourhood of every square they occupy. Recomputed on every call.
#[must_use]
pub fn visible_squares(color: Color, fog: &FogState, position: &Position) -> BTreeSet<Square> {
    let mut visible: BTreeSet<Square> = fog.iter().collect();
    visible.extend(Square::all().filter(|sq| color.owns_rank(sq.rank())));
    for sq in position.occupied_by(color) {
        visible.extend(sq.neighborhood());
    }
    visible
}
