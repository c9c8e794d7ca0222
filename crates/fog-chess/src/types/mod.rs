//! Type definitions shared across the engine.
//!
//! ## Modules
//!
//! - `chess` - Board vocabulary wrapping shakmaty (Color, Square, Move)
//! - `position` - Oracle-owned position snapshot
//! - `session` - Session-related types (SessionId, FogState, Clocks, MatchSession)

pub mod chess;
pub mod position;
pub mod session;

pub use chess::{Color, Move, Piece, PieceKind, Square};
pub use position::Position;
pub use session::{
    Clocks, EndReason, FogPair, FogState, GameMode, MatchSession, MoveRecord, Players,
    SessionId, SessionResult, SessionStatus, UserId,
};
