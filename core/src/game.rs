use crate::error::{Error, Result};
use derive_more::{Display, From, FromStr, Into};
use serde::{Deserialize, Serialize};

#[derive(
    Clone,
    Copy,
    Deserialize,
    Serialize,
    Debug,
    Display,
    From,
    FromStr,
    Into,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct PlayerId(i64);

#[derive(
    Clone,
    Copy,
    Deserialize,
    Serialize,
    Debug,
    Display,
    From,
    FromStr,
    Into,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct MatchId(i64);

#[derive(Clone, Copy, Debug, Display, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    #[display("singles")]
    Singles,
    #[display("doubles")]
    Doubles,
}

impl std::str::FromStr for GameType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "singles" => Ok(Self::Singles),
            "doubles" => Ok(Self::Doubles),
            _ => Err(Error::validation(format!(
                "game type must be 'singles' or 'doubles', got '{s}'"
            ))),
        }
    }
}

/// One of the two sides of a match.
#[derive(Clone, Copy, Debug, Display, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "i64", into = "i64")]
pub enum Team {
    #[display("1")]
    One,
    #[display("2")]
    Two,
}

impl Team {
    pub fn opponent(self) -> Self {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::One,
        }
    }

    /// The team that wins a match with the given scores.
    ///
    /// Team 1 wins only with a strictly higher score, so a tied score goes to team 2.
    pub fn winner(score1: i64, score2: i64) -> Self {
        if score1 > score2 {
            Self::One
        } else {
            Self::Two
        }
    }
}

impl TryFrom<i64> for Team {
    type Error = Error;

    fn try_from(n: i64) -> Result<Self> {
        match n {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            _ => Err(Error::validation(format!("invalid team number {n}"))),
        }
    }
}

impl From<Team> for i64 {
    fn from(team: Team) -> Self {
        match team {
            Team::One => 1,
            Team::Two => 2,
        }
    }
}

/// The result of a match from the perspective of a single participant.
#[derive(Clone, Copy, Debug, Display, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    #[display("win")]
    Win,
    #[display("loss")]
    Loss,
}

impl Outcome {
    /// The outcome for a member of `team` in a match that ended `score1` to `score2`.
    pub fn for_team(team: Team, score1: i64, score2: i64) -> Self {
        if Team::winner(score1, score2) == team {
            Self::Win
        } else {
            Self::Loss
        }
    }

    /// The outcome for a participant given their own team's score and the opposing team's.
    pub fn from_scores(team: Team, score: i64, opponent_score: i64) -> Self {
        match team {
            Team::One => Self::for_team(team, score, opponent_score),
            Team::Two => Self::for_team(team, opponent_score, score),
        }
    }

    pub fn is_win(&self) -> bool {
        *self == Self::Win
    }
}
