//! Rating Port.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::RatingError;
use crate::types::UserId;

/// A player's outcome in one finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingOutcome {
    Win,
    Loss,
    Draw,
}

/// External rating capability.
#[async_trait]
pub trait RatingPort: Send + Sync {
    /// Record one result. Called once per participant per finished session.
    async fn apply_result(&self, user: UserId, outcome: RatingOutcome) -> Result<(), RatingError>;

    /// Current rating, used when the player joins a matchmaking queue.
    async fn current_rating(&self, user: UserId) -> Result<i32, RatingError>;
}

/// Rating and record for one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRating {
    pub rating: i32,
    pub games_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

impl PlayerRating {
    /// Starting rating for new players.
    pub const STARTING_RATING: i32 = 1200;
    /// A loss never takes a rating below this.
    pub const RATING_FLOOR: i32 = 1000;
    pub const WIN_DELTA: i32 = 15;
    pub const LOSS_DELTA: i32 = 15;
    pub const DRAW_DELTA: i32 = 5;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            rating: Self::STARTING_RATING,
            games_played: 0,
            wins: 0,
            losses: 0,
            draws: 0,
        }
    }

    /// Apply one result: win +15, loss -15 floored at 1000, draw +5.
    pub fn apply(&mut self, outcome: RatingOutcome) {
        self.games_played += 1;
        match outcome {
            RatingOutcome::Win => {
                self.wins += 1;
                self.rating += Self::WIN_DELTA;
            }
            RatingOutcome::Loss => {
                self.losses += 1;
                self.rating = (self.rating - Self::LOSS_DELTA).max(Self::RATING_FLOOR);
            }
            RatingOutcome::Draw => {
                self.draws += 1;
                self.rating += Self::DRAW_DELTA;
            }
        }
    }
}

impl Default for PlayerRating {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory rating book.
#[derive(Default)]
pub struct MemoryRatingBook {
    players: Mutex<HashMap<UserId, PlayerRating>>,
}

impl MemoryRatingBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record for `user`; unknown users have the starting rating.
    #[must_use]
    pub fn get(&self, user: UserId) -> PlayerRating {
        self.players.lock().get(&user).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn rating(&self, user: UserId) -> i32 {
        self.get(user).rating
    }

    /// Seed a player's rating, e.g. from an account store.
    pub fn set_rating(&self, user: UserId, rating: i32) {
        self.players.lock().entry(user).or_default().rating = rating;
    }
}

#[async_trait]
impl RatingPort for MemoryRatingBook {
    async fn apply_result(&self, user: UserId, outcome: RatingOutcome) -> Result<(), RatingError> {
        self.players.lock().entry(user).or_default().apply(outcome);
        Ok(())
    }

    async fn current_rating(&self, user: UserId) -> Result<i32, RatingError> {
        Ok(self.rating(user))
    }
}
