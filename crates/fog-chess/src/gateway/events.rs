//! Events the Session Engine emits for delivery to connected players.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::fog::visible_squares;
use crate::types::{
    Clocks, Color, FogState, GameMode, Move, Piece, Position, SessionId, SessionResult,
    SessionStatus, Square, UserId,
};

/// The position as one player is allowed to see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub turn: Color,
    pub check: bool,
    pub last_move: Option<Move>,
    /// Every square the player currently sees.
    pub visible: BTreeSet<Square>,
    /// Pieces standing on visible squares only.
    pub pieces: BTreeMap<Square, Piece>,
}

impl PlayerView {
    #[must_use]
    pub fn build(color: Color, fog: &FogState, position: &Position) -> Self {
        let visible = visible_squares(color, fog, position);
        let pieces = position
            .pieces()
            .filter(|(sq, _)| visible.contains(sq))
            .collect();
        Self {
            turn: position.turn(),
            check: position.is_check(),
            last_move: position.last_move(),
            visible,
            pieces,
        }
    }
}

/// Outbound event for exactly one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Full state for the receiving player, sent on join and on match start.
    SessionState {
        session_id: SessionId,
        color: Color,
        mode: GameMode,
        status: SessionStatus,
        clocks: Clocks,
        /// The receiving player's own FogState.
        fog: FogState,
        view: PlayerView,
    },
    /// Sent to the non-mover after every accepted move.
    OpponentMove {
        session_id: SessionId,
        #[serde(rename = "move")]
        mv: Move,
        /// Squares the move revealed to the mover.
        fog_reveal: Vec<Square>,
        view: PlayerView,
    },
    /// Sent to both players whenever a clock changes.
    TimeUpdate {
        session_id: SessionId,
        white: u32,
        black: u32,
    },
    /// Sent to the caller of a failed operation.
    SessionError {
        session_id: Option<SessionId>,
        reason: String,
        error: SessionError,
    },
    /// Sent to both players once, when the session finishes.
    SessionEnded {
        session_id: SessionId,
        winner: Option<UserId>,
        result: SessionResult,
    },
}

impl GatewayEvent {
    #[must_use]
    pub fn time_update(session_id: SessionId, clocks: &Clocks) -> Self {
        Self::TimeUpdate {
            session_id,
            white: clocks.white,
            black: clocks.black,
        }
    }

    #[must_use]
    pub fn error(session_id: Option<SessionId>, error: SessionError) -> Self {
        Self::SessionError {
            session_id,
            reason: error.to_string(),
            error,
        }
    }

    /// The session this event concerns, if any.
    #[must_use]
    pub const fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::SessionState { session_id, .. }
            | Self::OpponentMove { session_id, .. }
            | Self::TimeUpdate { session_id, .. }
            | Self::SessionEnded { session_id, .. } => Some(*session_id),
            Self::SessionError { session_id, .. } => *session_id,
        }
    }
}

/// Delivers events to a user's connection(s).
///
/// Delivery must not block: sinks queue the event and return.
pub trait EventSink: Send + Sync {
    fn deliver(&self, user: UserId, event: GatewayEvent);
}
