//! Board vocabulary shared by every component.
//!
//! These are small `Copy` types with exact conversions to and from shakmaty's
//! types. `Square` serializes as its algebraic label so it can be used as a
//! JSON map key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Chess piece color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    /// White pieces.
    White,
    /// Black pieces.
    Black,
}

impl Color {
    /// Both colors, white first.
    pub const ALL: [Color; 2] = [Color::White, Color::Black];

    /// Get the opposite color.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }

    /// Returns true if `rank` (0-7) lies in the four rows nearest this
    /// color's back rank.
    #[must_use]
    pub const fn owns_rank(self, rank: u8) -> bool {
        match self {
            Self::White => rank < 4,
            Self::Black => rank >= 4 && rank < 8,
        }
    }
}

impl From<shakmaty::Color> for Color {
    fn from(c: shakmaty::Color) -> Self {
        match c {
            shakmaty::Color::White => Self::White,
            shakmaty::Color::Black => Self::Black,
        }
    }
}

impl From<Color> for shakmaty::Color {
    fn from(c: Color) -> Self {
        match c {
            Color::White => Self::White,
            Color::Black => Self::Black,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::White => write!(f, "white"),
            Self::Black => write!(f, "black"),
        }
    }
}

/// Chess piece type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    /// UCI promotion suffix, if this kind is a legal promotion target.
    #[must_use]
    pub const fn promotion_char(self) -> Option<char> {
        match self {
            Self::Knight => Some('n'),
            Self::Bishop => Some('b'),
            Self::Rook => Some('r'),
            Self::Queen => Some('q'),
            Self::Pawn | Self::King => None,
        }
    }

    fn from_promotion_char(c: char) -> Option<Self> {
        match c {
            'n' => Some(Self::Knight),
            'b' => Some(Self::Bishop),
            'r' => Some(Self::Rook),
            'q' => Some(Self::Queen),
            _ => None,
        }
    }
}

impl From<shakmaty::Role> for PieceKind {
    fn from(r: shakmaty::Role) -> Self {
        match r {
            shakmaty::Role::Pawn => Self::Pawn,
            shakmaty::Role::Knight => Self::Knight,
            shakmaty::Role::Bishop => Self::Bishop,
            shakmaty::Role::Rook => Self::Rook,
            shakmaty::Role::Queen => Self::Queen,
            shakmaty::Role::King => Self::King,
        }
    }
}

impl From<PieceKind> for shakmaty::Role {
    fn from(p: PieceKind) -> Self {
        match p {
            PieceKind::Pawn => Self::Pawn,
            PieceKind::Knight => Self::Knight,
            PieceKind::Bishop => Self::Bishop,
            PieceKind::Rook => Self::Rook,
            PieceKind::Queen => Self::Queen,
            PieceKind::King => Self::King,
        }
    }
}

/// A chess piece with color and kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Piece {
    pub color: Color,
    pub kind: PieceKind,
}

impl From<shakmaty::Piece> for Piece {
    fn from(p: shakmaty::Piece) -> Self {
        Self {
            color: p.color.into(),
            kind: p.role.into(),
        }
    }
}

/// A square on the board, stored as `rank * 8 + file`.
///
/// `(file, rank)` in `0..8 x 0..8` and the algebraic label (`a1`..`h8`) map
/// onto each other exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Square(u8);

impl Square {
    /// Create a square from file (0-7) and rank (0-7).
    #[must_use]
    pub const fn new(file: u8, rank: u8) -> Option<Self> {
        if file < 8 && rank < 8 {
            Some(Self(rank * 8 + file))
        } else {
            None
        }
    }

    /// Create a square from its 0-63 index.
    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        if index < 64 {
            Some(Self(index))
        } else {
            None
        }
    }

    #[must_use]
    pub const fn index(self) -> u8 {
        self.0
    }

    /// Get the file (0-7, a-h).
    #[must_use]
    pub const fn file(self) -> u8 {
        self.0 % 8
    }

    /// Get the rank (0-7, 1-8).
    #[must_use]
    pub const fn rank(self) -> u8 {
        self.0 / 8
    }

    /// The square `(df, dr)` away, or `None` past the board edge.
    #[must_use]
    pub fn offset(self, df: i8, dr: i8) -> Option<Self> {
        let file = i16::from(self.file()) + i16::from(df);
        let rank = i16::from(self.rank()) + i16::from(dr);
        if (0..8).contains(&file) && (0..8).contains(&rank) {
            Self::new(file as u8, rank as u8)
        } else {
            None
        }
    }

    /// The 3x3 block centred on this square, clipped to the board, in
    /// ascending index order. Includes the square itself.
    pub fn neighborhood(self) -> impl Iterator<Item = Square> {
        (-1i8..=1)
            .flat_map(|dr| (-1i8..=1).map(move |df| (df, dr)))
            .filter_map(move |(df, dr)| self.offset(df, dr))
    }

    /// All 64 squares, a1 first.
    pub fn all() -> impl Iterator<Item = Square> {
        (0u8..64).map(Square)
    }
}

impl From<shakmaty::Square> for Square {
    fn from(s: shakmaty::Square) -> Self {
        Self(s as u8)
    }
}

impl From<Square> for shakmaty::Square {
    fn from(s: Square) -> Self {
        // Square is always in 0..64.
        Self::new(u32::from(s.0))
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = (b'a' + self.file()) as char;
        let rank = (b'1' + self.rank()) as char;
        write!(f, "{file}{rank}")
    }
}

impl FromStr for Square {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return Err("square must be 2 characters");
        }
        let (file, rank) = (bytes[0], bytes[1]);
        if !(b'a'..=b'h').contains(&file) {
            return Err("file must be a-h");
        }
        if !(b'1'..=b'8').contains(&rank) {
            return Err("rank must be 1-8");
        }
        Self::new(file - b'a', rank - b'1').ok_or("invalid square")
    }
}

impl Serialize for Square {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Square {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A candidate or accepted move. Immutable once accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<PieceKind>,
}

impl Move {
    #[must_use]
    pub const fn new(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            promotion: None,
        }
    }

    #[must_use]
    pub const fn with_promotion(mut self, kind: PieceKind) -> Self {
        self.promotion = Some(kind);
        self
    }

    /// Sign of the file and rank deltas from `from` to `to`.
    #[must_use]
    pub fn direction(&self) -> (i8, i8) {
        let df = i16::from(self.to.file()) - i16::from(self.from.file());
        let dr = i16::from(self.to.rank()) - i16::from(self.from.rank());
        (df.signum() as i8, dr.signum() as i8)
    }

    /// UCI notation, e.g. `e2e4` or `e7e8q`.
    #[must_use]
    pub fn uci(&self) -> String {
        match self.promotion.and_then(PieceKind::promotion_char) {
            Some(p) => format!("{}{}{p}", self.from, self.to),
            None => format!("{}{}", self.from, self.to),
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uci())
    }
}

impl FromStr for Move {
    type Err = &'static str;

    /// Parse UCI notation. Checks format only, not legality.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_ascii() || s.len() < 4 || s.len() > 5 {
            return Err("UCI move must be 4-5 characters");
        }
        let from: Square = s[0..2].parse()?;
        let to: Square = s[2..4].parse()?;
        let promotion = match s[4..].chars().next() {
            Some(c) => Some(
                PieceKind::from_promotion_char(c).ok_or("promotion must be q, r, b, or n")?,
            ),
            None => None,
        };
        Ok(Self {
            from,
            to,
            promotion,
        })
    }
}
