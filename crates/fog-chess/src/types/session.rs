//! Session-related types.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::chess::{Color, Move, Square};
use super::position::Position;

/// Unique identifier for a match session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Create a new random user ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Game mode; selects the clock and the fog reveal rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Standard,
    Blitz,
}

impl GameMode {
    pub const ALL: [GameMode; 2] = [GameMode::Standard, GameMode::Blitz];
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Blitz => write!(f, "blitz"),
        }
    }
}

/// Lifecycle of a session: `Waiting -> Active -> Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Active,
    Finished,
}

impl SessionStatus {
    /// Returns true if `next` is the single legal successor of `self`.
    /// `Finished` is absorbing.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Active) | (Self::Active, Self::Finished)
        )
    }

    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Active => write!(f, "active"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Reason why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Checkmate,
    Stalemate,
    /// Draw reported by the oracle outside the named cases (fifty-move rule).
    Draw,
    InsufficientMaterial,
    Repetition,
    Timeout,
    Resignation,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checkmate => write!(f, "checkmate"),
            Self::Stalemate => write!(f, "stalemate"),
            Self::Draw => write!(f, "draw"),
            Self::InsufficientMaterial => write!(f, "insufficient_material"),
            Self::Repetition => write!(f, "repetition"),
            Self::Timeout => write!(f, "timeout"),
            Self::Resignation => write!(f, "resignation"),
        }
    }
}

/// Final result of a session. `winner` is `None` for draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    pub winner: Option<Color>,
    pub reason: EndReason,
}

impl SessionResult {
    #[must_use]
    pub const fn win(winner: Color, reason: EndReason) -> Self {
        Self {
            winner: Some(winner),
            reason,
        }
    }

    #[must_use]
    pub const fn draw(reason: EndReason) -> Self {
        Self {
            winner: None,
            reason,
        }
    }
}

/// The two participants by color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Players {
    pub white: UserId,
    pub black: UserId,
}

impl Players {
    /// Get the color for a user, if they are in this session.
    #[must_use]
    pub fn color_of(&self, user: UserId) -> Option<Color> {
        if user == self.white {
            Some(Color::White)
        } else if user == self.black {
            Some(Color::Black)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn user(&self, color: Color) -> UserId {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    #[must_use]
    pub fn contains(&self, user: UserId) -> bool {
        self.color_of(user).is_some()
    }
}

/// Remaining whole seconds per color. Never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clocks {
    pub white: u32,
    pub black: u32,
}

impl Clocks {
    #[must_use]
    pub const fn new(initial_secs: u32) -> Self {
        Self {
            white: initial_secs,
            black: initial_secs,
        }
    }

    #[must_use]
    pub const fn get(&self, color: Color) -> u32 {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    /// Deduct `secs` from `color`, floored at zero. Returns the new value.
    pub fn deduct(&mut self, color: Color, secs: u32) -> u32 {
        let slot = match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        };
        *slot = slot.saturating_sub(secs);
        *slot
    }
}

/// Squares permanently revealed to one player. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FogState {
    revealed: BTreeSet<Square>,
}

impl FogState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, square: Square) -> bool {
        self.revealed.contains(&square)
    }

    /// Add a square; returns false if it was already revealed.
    pub fn reveal(&mut self, square: Square) -> bool {
        self.revealed.insert(square)
    }

    /// Add every square; returns how many were new.
    pub fn reveal_all(&mut self, squares: impl IntoIterator<Item = Square>) -> usize {
        squares.into_iter().filter(|sq| self.reveal(*sq)).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.revealed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revealed.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Square> + '_ {
        self.revealed.iter().copied()
    }
}

/// One FogState per color.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FogPair {
    pub white: FogState,
    pub black: FogState,
}

impl FogPair {
    #[must_use]
    pub const fn get(&self, color: Color) -> &FogState {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    pub fn get_mut(&mut self, color: Color) -> &mut FogState {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }
}

/// Record of a single accepted move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// Half-move number, 1-indexed.
    pub ply: u32,
    pub color: Color,
    #[serde(rename = "move")]
    pub mv: Move,
    /// Standard Algebraic Notation (e.g., "Nf3", "O-O").
    pub san: String,
    pub at: DateTime<Utc>,
    /// Whole seconds charged to the mover's clock by this move.
    pub elapsed_secs: u32,
}

/// Authoritative state of one match, as persisted and as returned by
/// `GetSession`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSession {
    pub id: SessionId,
    pub players: Players,
    pub mode: GameMode,
    pub status: SessionStatus,
    pub position: Position,
    pub fog: FogPair,
    pub clocks: Clocks,
    pub moves: Vec<MoveRecord>,
    pub result: Option<SessionResult>,
    pub created_at: DateTime<Utc>,
    pub last_move_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MatchSession {
    /// Winning user, if the session finished decisively.
    #[must_use]
    pub fn winner(&self) -> Option<UserId> {
        self.result
            .and_then(|r| r.winner)
            .map(|c| self.players.user(c))
    }
}
