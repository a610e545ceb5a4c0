//! Analytics derived from a player's match history.
//!
//! Everything here is a pure function of the [`MatchRecord`]s loaded from the ledger, newest
//! first, so each projection can be tested without a database.

use crate::{
    config::RatingConfig,
    game::{GameType, MatchId, Outcome, PlayerId, Team},
    message::{HeadToHead, PlayerStats, RecentGame},
};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Opponent {
    pub id: PlayerId,
    pub name: String,
}

/// One match from the perspective of a single participant.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchRecord {
    pub match_id: MatchId,
    pub date: DateTime<Utc>,
    pub game_type: GameType,
    pub team: Team,
    pub score: i64,
    pub opponent_score: i64,
    pub rating_before: i64,
    pub rating_after: i64,
    pub opponents: Vec<Opponent>,
}

impl MatchRecord {
    pub fn outcome(&self) -> Outcome {
        Outcome::from_scores(self.team, self.score, self.opponent_score)
    }

    pub fn rating_change(&self) -> i64 {
        self.rating_after - self.rating_before
    }

    pub fn recent_game(&self) -> RecentGame {
        RecentGame {
            match_id: self.match_id,
            date: self.date,
            game_type: self.game_type,
            won: self.outcome().is_win(),
            score: self.score,
            opponent_score: self.opponent_score,
            rating_change: self.rating_change(),
            opponents: self.opponents.iter().map(|o| &o.name).join(", "),
        }
    }
}

/// The run of identical outcomes at the head of `outcomes`.
///
/// Positive for wins, negative for losses, zero if there are no outcomes.
pub fn current_streak(outcomes: impl IntoIterator<Item = Outcome>) -> i32 {
    let mut outcomes = outcomes.into_iter();
    let Some(first) = outcomes.next() else {
        return 0;
    };
    let run = 1 + outcomes.take_while(|o| *o == first).count() as i32;
    if first.is_win() {
        run
    } else {
        -run
    }
}

/// The longest run of consecutive `target` outcomes.
pub fn longest_streak(outcomes: impl IntoIterator<Item = Outcome>, target: Outcome) -> u32 {
    outcomes
        .into_iter()
        .fold((0, 0), |(longest, run), outcome| {
            let run = if outcome == target { run + 1 } else { 0 };
            (longest.max(run), run)
        })
        .0
}

/// The highest rating a player has held after a match, and when they first reached it.
///
/// `history` is newest first.
pub fn peak_rating(history: &[MatchRecord]) -> Option<(i64, DateTime<Utc>)> {
    // Walk oldest to newest so ties keep the first time the peak was reached.
    history
        .iter()
        .rev()
        .fold(None, |peak, record| match peak {
            Some((rating, _)) if rating >= record.rating_after => peak,
            _ => Some((record.rating_after, record.date)),
        })
}

pub fn player_stats(history: &[MatchRecord], config: &RatingConfig) -> PlayerStats {
    let total_games = history.len() as u32;
    let wins = history.iter().filter(|r| r.outcome().is_win()).count() as u32;
    let window = match config.streak_window {
        Some(window) => &history[..history.len().min(window as usize)],
        None => history,
    };
    let outcomes = || window.iter().map(MatchRecord::outcome);
    let (peak_rating, peak_rating_date) = match peak_rating(history) {
        Some((rating, date)) => (rating, Some(date)),
        None => (config.initial_rating, None),
    };

    PlayerStats {
        total_games,
        wins,
        losses: total_games - wins,
        win_rate: ratio(wins, total_games),
        current_streak: current_streak(outcomes()),
        longest_win_streak: longest_streak(outcomes(), Outcome::Win),
        longest_losing_streak: longest_streak(outcomes(), Outcome::Loss),
        peak_rating,
        peak_rating_date,
    }
}

/// Per-opponent records over `history` (newest first).
///
/// Every member of the opposing team counts as an opponent. Entries are ordered by the number of
/// games played against the opponent, most first, then by name.
pub fn head_to_head(history: &[MatchRecord]) -> Vec<HeadToHead> {
    let mut records: HashMap<PlayerId, HeadToHead> = HashMap::new();
    for record in history {
        let outcome = record.outcome();
        for opponent in &record.opponents {
            let entry = records.entry(opponent.id).or_insert_with(|| HeadToHead {
                opponent_id: opponent.id,
                opponent_name: opponent.name.clone(),
                total_games: 0,
                wins: 0,
                losses: 0,
                win_rate: 0.,
                // The first record seen is the newest.
                last_result: outcome,
            });
            entry.total_games += 1;
            match outcome {
                Outcome::Win => entry.wins += 1,
                Outcome::Loss => entry.losses += 1,
            }
        }
    }

    records
        .into_values()
        .map(|mut entry| {
            entry.win_rate = ratio(entry.wins, entry.total_games);
            entry
        })
        .sorted_by(|a, b| {
            b.total_games
                .cmp(&a.total_games)
                .then_with(|| a.opponent_name.cmp(&b.opponent_name))
        })
        .collect()
}

fn ratio(n: u32, d: u32) -> f64 {
    if d == 0 {
        0.
    } else {
        n as f64 / d as f64
    }
}
