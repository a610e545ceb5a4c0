use crate::config::RatingConfig;

/// The Elo rating system, parameterized by a K-factor and the rating of an unrated player.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Elo {
    k_factor: f64,
    initial_rating: i64,
}

impl Elo {
    pub fn new(config: &RatingConfig) -> Self {
        Self {
            k_factor: config.k_factor,
            initial_rating: config.initial_rating,
        }
    }

    /// Rating changes for two sides after a decisive result.
    ///
    /// Each side's change is rounded independently (half away from zero), so the two deltas sum to
    /// zero only up to rounding: `|delta_a + delta_b| <= 1`.
    pub fn delta(&self, rating_a: f64, rating_b: f64, a_won: bool) -> (i64, i64) {
        let expected_a = 1. / (1. + 10f64.powf((rating_b - rating_a) / 400.));
        let expected_b = 1. - expected_a;
        let (actual_a, actual_b) = if a_won { (1., 0.) } else { (0., 1.) };

        let delta_a = (self.k_factor * (actual_a - expected_a)).round() as i64;
        let delta_b = (self.k_factor * (actual_b - expected_b)).round() as i64;
        (delta_a, delta_b)
    }

    /// The mean of `ratings`, or the initial rating if there are none.
    pub fn average(&self, ratings: impl IntoIterator<Item = i64>) -> f64 {
        let (sum, n) = ratings
            .into_iter()
            .fold((0i64, 0usize), |(sum, n), r| (sum + r, n + 1));
        if n == 0 {
            self.initial_rating as f64
        } else {
            sum as f64 / n as f64
        }
    }

    /// Settle a match between two teams given the ratings each player held going in.
    ///
    /// Returns the rating change applied to every member of team 1 and team 2 respectively.
    pub fn settle(
        &self,
        team1: impl IntoIterator<Item = i64>,
        team2: impl IntoIterator<Item = i64>,
        team1_won: bool,
    ) -> (i64, i64) {
        self.delta(self.average(team1), self.average(team2), team1_won)
    }
}

impl Default for Elo {
    fn default() -> Self {
        Self::new(&RatingConfig::default())
    }
}
