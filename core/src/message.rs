use crate::game::{GameType, MatchId, Outcome, PlayerId, Team};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub rating: i64,
    pub games_played: u32,
    pub created_at: DateTime<Utc>,
}

/// One side of a match as submitted for settlement.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TeamEntry {
    pub player_ids: Vec<PlayerId>,
    pub score: i64,
}

/// Request to settle a new match.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewMatch {
    pub game_type: GameType,
    pub teams: Vec<TeamEntry>,
}

/// Request to change the final score of a settled match.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Rescore {
    pub team1_score: i64,
    pub team2_score: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Match {
    pub id: MatchId,
    pub game_type: GameType,
    pub created_at: DateTime<Utc>,
    pub players: Vec<Participation>,
}

impl Match {
    /// The members of `team`, in the order they were recorded.
    pub fn team(&self, team: Team) -> impl '_ + Iterator<Item = &Participation> {
        self.players.iter().filter(move |p| p.team == team)
    }
}

/// A single player's part in a match, with their rating on either side of the settlement.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Participation {
    pub player_id: PlayerId,
    pub player_name: String,
    pub team: Team,
    pub score: i64,
    pub rating_before: i64,
    pub rating_after: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LeaderboardEntry {
    #[serde(flatten)]
    pub player: Player,
    /// Matches which raised the player's rating.
    pub wins: u32,
    /// Matches which lowered the player's rating.
    pub losses: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PlayerStats {
    pub total_games: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    /// Positive for a run of wins, negative for a run of losses.
    pub current_streak: i32,
    pub longest_win_streak: u32,
    pub longest_losing_streak: u32,
    pub peak_rating: i64,
    pub peak_rating_date: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct HeadToHead {
    pub opponent_id: PlayerId,
    pub opponent_name: String,
    pub total_games: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub last_result: Outcome,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct RatingHistoryPoint {
    pub date: DateTime<Utc>,
    pub rating: i64,
    pub match_id: MatchId,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RecentGame {
    pub match_id: MatchId,
    pub date: DateTime<Utc>,
    pub game_type: GameType,
    pub won: bool,
    pub score: i64,
    pub opponent_score: i64,
    pub rating_change: i64,
    pub opponents: String,
}
