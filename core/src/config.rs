use serde::{Deserialize, Serialize};

/// Tunable parameters of the rating engine.
///
/// A single [`RatingConfig`] is injected into the [`Db`](crate::db::Db) when it is opened, and from
/// there flows into every settlement, every newly registered player and every analytics query.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct RatingConfig {
    /// Scales how far a single result moves a rating.
    pub k_factor: f64,

    /// Rating of a player with no recorded matches.
    pub initial_rating: i64,

    /// How many of a player's most recent matches are considered when computing streaks.
    ///
    /// `None` computes streaks over the player's entire history. A streak longer than the window
    /// is reported as exactly the window size.
    pub streak_window: Option<u32>,

    /// How many matches are listed in a player's recent games.
    pub recent_games: u32,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            k_factor: 32.,
            initial_rating: 1500,
            streak_window: Some(20),
            recent_games: 10,
        }
    }
}
