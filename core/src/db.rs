use crate::{
    config::RatingConfig,
    error::{Error, Result},
    game::{MatchId, PlayerId, Team},
    message::{
        HeadToHead, LeaderboardEntry, Match, NewMatch, Participation, Player, PlayerStats,
        RatingHistoryPoint, RecentGame, Rescore, TeamEntry,
    },
    rating::Elo,
    stats::{self, MatchRecord, Opponent},
};
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use itertools::Itertools;
use sqlx::{
    migrate, query, query_as,
    sqlite::{
        Sqlite, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool,
        SqlitePoolOptions,
    },
    Transaction,
};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
    time::Duration,
};

/// How long a mutation waits for a concurrent writer to commit before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Write transactions take the database write lock up front, so concurrent mutations queue on
/// the store instead of failing when they try to upgrade a stale read.
const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

/// The match ledger.
///
/// Players, matches and per-player participations live in a single SQLite database. Every
/// mutation runs in its own transaction, which either commits in full or leaves the ledger and
/// the rating projections untouched. Reads run against committed state and never wait on a
/// writer.
#[derive(Debug)]
pub struct Db {
    pool: SqlitePool,
    config: RatingConfig,
    elo: Elo,
}

impl Db {
    pub async fn open(path: &Path, config: RatingConfig) -> Result<Self> {
        let opt = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        Self::new(SqlitePoolOptions::new().max_connections(5), opt, config).await
    }

    /// A ledger that lives only as long as this [`Db`].
    pub async fn memory(config: RatingConfig) -> Result<Self> {
        // Every connection to `:memory:` is a separate database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        Self::new(pool, SqliteConnectOptions::new().in_memory(true), config).await
    }

    async fn new(
        pool: SqlitePoolOptions,
        opt: SqliteConnectOptions,
        config: RatingConfig,
    ) -> Result<Self> {
        let pool = pool.connect_with(opt.foreign_keys(true)).await?;
        migrate!("db/migrations").run(&pool).await?;
        Ok(Self {
            pool,
            config,
            elo: Elo::new(&config),
        })
    }

    pub fn config(&self) -> &RatingConfig {
        &self.config
    }

    pub async fn create_player(&self, name: &str) -> Result<Player> {
        let name = validate_name(name)?;
        let created_at = Utc::now().timestamp_millis();
        let (id,): (i64,) = query_as(
            "INSERT INTO player (name, rating, games_played, created_at) VALUES ($1, $2, 0, $3) RETURNING id",
        )
        .bind(name)
        .bind(self.config.initial_rating)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(id, name, "registered player");
        Ok(Player {
            id: id.into(),
            name: name.to_string(),
            rating: self.config.initial_rating,
            games_played: 0,
            created_at: timestamp(created_at),
        })
    }

    pub async fn player(&self, id: PlayerId) -> Result<Player> {
        let mut conn = self.pool.acquire().await?;
        get_player(&mut conn, id)
            .await?
            .ok_or_else(|| Error::not_found(format!("player {id}")))
    }

    pub async fn rename_player(&self, id: PlayerId, name: &str) -> Result<()> {
        let name = validate_name(name)?;
        let res = query("UPDATE player SET name = $1 WHERE id = $2")
            .bind(name)
            .bind(i64::from(id))
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(Error::not_found(format!("player {id}")));
        }
        Ok(())
    }

    /// Remove a player who has never been settled into a match.
    pub async fn delete_player(&self, id: PlayerId) -> Result<()> {
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;
        if get_player(tx.as_mut(), id).await?.is_none() {
            return Err(Error::not_found(format!("player {id}")));
        }
        let (games,): (i64,) = query_as("SELECT count(*) FROM participant WHERE player = $1")
            .bind(i64::from(id))
            .fetch_one(tx.as_mut())
            .await?;
        if games > 0 {
            return Err(Error::validation(format!(
                "player {id} has {games} recorded matches and cannot be deleted"
            )));
        }
        query("DELETE FROM player WHERE id = $1")
            .bind(i64::from(id))
            .execute(tx.as_mut())
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// All players, highest rated first.
    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>> {
        let rows: Vec<(i64, String, i64, i64, i64, i64, i64)> = query_as(
            "SELECT
                p.id,
                p.name,
                p.rating,
                p.games_played,
                p.created_at,
                count(CASE WHEN gp.rating_after > gp.rating_before THEN 1 END),
                count(CASE WHEN gp.rating_after < gp.rating_before THEN 1 END)
            FROM player AS p
            LEFT JOIN participant AS gp ON gp.player = p.id
            GROUP BY p.id
            ORDER BY p.rating DESC, p.id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, name, rating, games_played, created_at, wins, losses)| LeaderboardEntry {
                    player: Player {
                        id: id.into(),
                        name,
                        rating,
                        games_played: games_played as u32,
                        created_at: timestamp(created_at),
                    },
                    wins: wins as u32,
                    losses: losses as u32,
                },
            )
            .collect())
    }

    /// Settle a new match into the ratings of every player in it.
    pub async fn create_match(&self, new: NewMatch) -> Result<Match> {
        validate_match(&new)?;
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        let mut players = HashMap::new();
        for id in new.teams.iter().flat_map(|team| &team.player_ids) {
            let player = get_player(tx.as_mut(), *id)
                .await?
                .ok_or_else(|| Error::not_found(format!("player {id}")))?;
            players.insert(*id, player);
        }

        let ratings = |team: &TeamEntry| {
            team.player_ids
                .iter()
                .map(|id| players[id].rating)
                .collect::<Vec<_>>()
        };
        let (delta1, delta2) = self.elo.settle(
            ratings(&new.teams[0]),
            ratings(&new.teams[1]),
            Team::winner(new.teams[0].score, new.teams[1].score) == Team::One,
        );

        // Keep creation order and chronological order in agreement even if the clock steps back.
        let (latest,): (Option<i64>,) = query_as("SELECT max(created_at) FROM game")
            .fetch_one(tx.as_mut())
            .await?;
        let created_at = Utc::now().timestamp_millis().max(latest.unwrap_or_default());

        let (game,): (i64,) =
            query_as("INSERT INTO game (game_type, created_at) VALUES ($1, $2) RETURNING id")
                .bind(new.game_type.to_string())
                .bind(created_at)
                .fetch_one(tx.as_mut())
                .await?;

        let mut participations = vec![];
        for (team, entry, delta) in [
            (Team::One, &new.teams[0], delta1),
            (Team::Two, &new.teams[1], delta2),
        ] {
            for id in &entry.player_ids {
                let player = &players[id];
                let rating_after = player.rating + delta;
                query(
                    "INSERT INTO participant (game, player, team, score, rating_before, rating_after)
                    VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(game)
                .bind(i64::from(player.id))
                .bind(i64::from(team))
                .bind(entry.score)
                .bind(player.rating)
                .bind(rating_after)
                .execute(tx.as_mut())
                .await?;
                query("UPDATE player SET rating = $1, games_played = games_played + 1 WHERE id = $2")
                    .bind(rating_after)
                    .bind(i64::from(player.id))
                    .execute(tx.as_mut())
                    .await?;

                participations.push(Participation {
                    player_id: player.id,
                    player_name: player.name.clone(),
                    team,
                    score: entry.score,
                    rating_before: player.rating,
                    rating_after,
                });
            }
        }
        tx.commit().await?;

        tracing::debug!(game, delta1, delta2, game_type = %new.game_type, "settled match");
        Ok(Match {
            id: game.into(),
            game_type: new.game_type,
            created_at: timestamp(created_at),
            players: participations,
        })
    }

    /// Change the final score of a match and re-settle it from the ratings its players held going
    /// in.
    pub async fn revise_match(&self, id: MatchId, score: Rescore) -> Result<()> {
        if score.team1_score < 0 || score.team2_score < 0 {
            return Err(Error::validation("scores cannot be negative"));
        }
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        let (game_type, created_at): (String, i64) =
            query_as("SELECT game_type, created_at FROM game WHERE id = $1 LIMIT 1")
                .bind(i64::from(id))
                .fetch_optional(tx.as_mut())
                .await?
                .ok_or_else(|| Error::not_found(format!("match {id}")))?;
        let rows: Vec<(i64, i64, i64, i64)> = query_as(
            "SELECT player, team, rating_before, rating_after
            FROM participant WHERE game = $1 ORDER BY team, player",
        )
        .bind(i64::from(id))
        .fetch_all(tx.as_mut())
        .await?;

        let mut participants = vec![];
        for (player, team, rating_before, rating_after) in rows {
            participants.push((
                PlayerId::from(player),
                Team::try_from(team)?,
                rating_before,
                rating_after,
            ));
        }
        let ratings = |which: Team| {
            participants
                .iter()
                .filter(move |(_, team, _, _)| *team == which)
                .map(|(_, _, before, _)| *before)
        };
        let (delta1, delta2) = self.elo.settle(
            ratings(Team::One),
            ratings(Team::Two),
            Team::winner(score.team1_score, score.team2_score) == Team::One,
        );

        for (player, team, rating_before, old_rating_after) in &participants {
            let (delta, team_score) = match team {
                Team::One => (delta1, score.team1_score),
                Team::Two => (delta2, score.team2_score),
            };
            let rating_after = rating_before + delta;
            query("UPDATE participant SET score = $1, rating_after = $2 WHERE game = $3 AND player = $4")
                .bind(team_score)
                .bind(rating_after)
                .bind(i64::from(id))
                .bind(i64::from(*player))
                .execute(tx.as_mut())
                .await?;
            query("UPDATE player SET rating = rating - $1 + $2 WHERE id = $3")
                .bind(old_rating_after)
                .bind(rating_after)
                .bind(i64::from(*player))
                .execute(tx.as_mut())
                .await?;
        }

        resettle_after(&mut tx, &self.elo, &self.config, (created_at, id)).await?;
        tx.commit().await?;

        tracing::debug!(%id, %game_type, delta1, delta2, "revised match");
        Ok(())
    }

    /// Remove a match from the ledger, restoring the ratings its players held going in.
    pub async fn delete_match(&self, id: MatchId) -> Result<()> {
        let mut tx = self.pool.begin_with(BEGIN_WRITE).await?;

        let reverts: Vec<(i64, i64)> =
            query_as("SELECT player, rating_before FROM participant WHERE game = $1")
                .bind(i64::from(id))
                .fetch_all(tx.as_mut())
                .await?;
        if reverts.is_empty() {
            return Err(Error::not_found(format!("match {id}")));
        }
        let (created_at,): (i64,) = query_as("SELECT created_at FROM game WHERE id = $1")
            .bind(i64::from(id))
            .fetch_one(tx.as_mut())
            .await?;

        for (player, rating_before) in &reverts {
            query("UPDATE player SET rating = $1, games_played = games_played - 1 WHERE id = $2")
                .bind(rating_before)
                .bind(player)
                .execute(tx.as_mut())
                .await?;
        }
        query("DELETE FROM game WHERE id = $1")
            .bind(i64::from(id))
            .execute(tx.as_mut())
            .await?;

        resettle_after(&mut tx, &self.elo, &self.config, (created_at, id)).await?;
        tx.commit().await?;

        tracing::debug!(%id, players = reverts.len(), "deleted match");
        Ok(())
    }

    pub async fn game(&self, id: MatchId) -> Result<Match> {
        let mut tx = self.pool.begin().await?;
        let (game_type, created_at): (String, i64) =
            query_as("SELECT game_type, created_at FROM game WHERE id = $1 LIMIT 1")
                .bind(i64::from(id))
                .fetch_optional(tx.as_mut())
                .await?
                .ok_or_else(|| Error::not_found(format!("match {id}")))?;
        Ok(Match {
            id,
            game_type: game_type.parse()?,
            created_at: timestamp(created_at),
            players: participations(tx.as_mut(), id).await?,
        })
    }

    /// The `limit` most recently created matches, newest first.
    pub async fn matches(&self, limit: u32) -> Result<Vec<Match>> {
        // One snapshot, so every listed match comes with its own participations.
        let mut tx = self.pool.begin().await?;
        let games: Vec<(i64, String, i64)> = query_as(
            "SELECT id, game_type, created_at FROM game ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(tx.as_mut())
        .await?;

        let mut matches = Vec::with_capacity(games.len());
        for (id, game_type, created_at) in games {
            let id = MatchId::from(id);
            matches.push(Match {
                id,
                game_type: game_type.parse()?,
                created_at: timestamp(created_at),
                players: participations(tx.as_mut(), id).await?,
            });
        }
        Ok(matches)
    }

    pub async fn player_stats(&self, player: PlayerId) -> Result<PlayerStats> {
        let history = self.history(player, None).await?;
        Ok(stats::player_stats(&history, &self.config))
    }

    pub async fn head_to_head(&self, player: PlayerId) -> Result<Vec<HeadToHead>> {
        let history = self.history(player, None).await?;
        Ok(stats::head_to_head(&history))
    }

    pub async fn recent_games(&self, player: PlayerId) -> Result<Vec<RecentGame>> {
        let history = self.history(player, Some(self.config.recent_games)).await?;
        Ok(history.iter().map(MatchRecord::recent_game).collect())
    }

    /// A player's rating after each of their matches, oldest first.
    ///
    /// The stream reads the ledger lazily and can be restarted by calling this again.
    pub fn rating_history(
        &self,
        player: PlayerId,
    ) -> impl '_ + Stream<Item = Result<RatingHistoryPoint>> {
        query_as(
            "SELECT g.id, g.created_at, p.rating_after
            FROM participant AS p JOIN game AS g ON g.id = p.game
            WHERE p.player = $1
            ORDER BY g.created_at, g.id",
        )
        .bind(i64::from(player))
        .fetch(&self.pool)
        .map(|res| {
            let (id, created_at, rating): (i64, i64, i64) = res?;
            Ok::<_, Error>(RatingHistoryPoint {
                date: timestamp(created_at),
                rating,
                match_id: id.into(),
            })
        })
    }

    /// A player's matches, newest first, up to `limit` of them.
    async fn history(&self, player: PlayerId, limit: Option<u32>) -> Result<Vec<MatchRecord>> {
        let mut tx = self.pool.begin().await?;
        // Fail on unknown players rather than reporting an empty history.
        if get_player(tx.as_mut(), player).await?.is_none() {
            return Err(Error::not_found(format!("player {player}")));
        }

        let rows: Vec<(i64, String, i64, i64, i64, i64, i64, i64)> = query_as(
            "SELECT
                g.id,
                g.game_type,
                g.created_at,
                p.team,
                p.score,
                p.rating_before,
                p.rating_after,
                coalesce(
                    (SELECT o.score FROM participant AS o WHERE o.game = g.id AND o.team <> p.team LIMIT 1),
                    0
                )
            FROM participant AS p JOIN game AS g ON g.id = p.game
            WHERE p.player = $1
            ORDER BY g.created_at DESC, g.id DESC
            LIMIT $2",
        )
        .bind(i64::from(player))
        .bind(limit.map(i64::from).unwrap_or(-1))
        .fetch_all(tx.as_mut())
        .await?;

        let mut opponents: HashMap<i64, Vec<Opponent>> = query_as::<_, (i64, i64, String)>(
            "SELECT o.game, o.player, pl.name
            FROM participant AS p
            JOIN participant AS o ON o.game = p.game AND o.team <> p.team
            JOIN player AS pl ON pl.id = o.player
            WHERE p.player = $1
            ORDER BY o.game, pl.name",
        )
        .bind(i64::from(player))
        .fetch_all(tx.as_mut())
        .await?
        .into_iter()
        .map(|(game, id, name)| (game, Opponent { id: id.into(), name }))
        .into_group_map();

        rows.into_iter()
            .map(
                |(id, game_type, created_at, team, score, rating_before, rating_after, opponent_score)| {
                    Ok::<_, Error>(MatchRecord {
                        match_id: id.into(),
                        date: timestamp(created_at),
                        game_type: game_type.parse()?,
                        team: team.try_into()?,
                        score,
                        opponent_score,
                        rating_before,
                        rating_after,
                        opponents: opponents.remove(&id).unwrap_or_default(),
                    })
                },
            )
            .collect()
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("name is required"));
    }
    Ok(name)
}

fn validate_match(new: &NewMatch) -> Result<()> {
    if new.teams.len() != 2 {
        return Err(Error::validation(format!(
            "exactly 2 teams required, got {}",
            new.teams.len()
        )));
    }

    let mut seen = HashSet::new();
    for (i, team) in new.teams.iter().enumerate() {
        if team.player_ids.is_empty() {
            return Err(Error::validation(format!("team {} has no players", i + 1)));
        }
        if team.score < 0 {
            return Err(Error::validation("scores cannot be negative"));
        }
        for id in &team.player_ids {
            if !seen.insert(*id) {
                return Err(Error::validation(format!(
                    "player {id} appears more than once"
                )));
            }
        }
    }
    Ok(())
}

fn timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

async fn get_player(conn: &mut SqliteConnection, id: PlayerId) -> Result<Option<Player>> {
    let row: Option<(String, i64, i64, i64)> = query_as(
        "SELECT name, rating, games_played, created_at FROM player WHERE id = $1 LIMIT 1",
    )
    .bind(i64::from(id))
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|(name, rating, games_played, created_at)| Player {
        id,
        name,
        rating,
        games_played: games_played as u32,
        created_at: timestamp(created_at),
    }))
}

async fn participations(conn: &mut SqliteConnection, game: MatchId) -> Result<Vec<Participation>> {
    let rows: Vec<(i64, String, i64, i64, i64, i64)> = query_as(
        "SELECT p.player, pl.name, p.team, p.score, p.rating_before, p.rating_after
        FROM participant AS p JOIN player AS pl ON pl.id = p.player
        WHERE p.game = $1
        ORDER BY p.team, p.player",
    )
    .bind(i64::from(game))
    .fetch_all(conn)
    .await?;

    rows.into_iter()
        .map(
            |(player, name, team, score, rating_before, rating_after)| {
                Ok::<_, Error>(Participation {
                    player_id: player.into(),
                    player_name: name,
                    team: team.try_into()?,
                    score,
                    rating_before,
                    rating_after,
                })
            },
        )
        .collect()
}

/// Re-settle every match recorded after `anchor` (a creation time and match id), in order.
///
/// Each later match is settled again from the ratings its players held going in, as determined by
/// the ledger itself, and the current rating of every player involved is reset to the outcome of
/// their latest match. When the ledger was mutated at a player's most recent match there is
/// nothing to do.
async fn resettle_after(
    tx: &mut Transaction<'_, Sqlite>,
    elo: &Elo,
    config: &RatingConfig,
    anchor: (i64, MatchId),
) -> Result<()> {
    let (anchor_time, anchor_id) = (anchor.0, i64::from(anchor.1));
    let rows: Vec<(i64, i64, i64, i64, i64, i64)> = query_as(
        "SELECT p.game, p.player, p.team, p.score, p.rating_before, p.rating_after
        FROM participant AS p JOIN game AS g ON g.id = p.game
        WHERE (g.created_at, g.id) > ($1, $2)
        ORDER BY g.created_at, g.id, p.team, p.player",
    )
    .bind(anchor_time)
    .bind(anchor_id)
    .fetch_all(tx.as_mut())
    .await?;
    if rows.is_empty() {
        return Ok(());
    }

    let games = rows
        .into_iter()
        .chunk_by(|row| row.0)
        .into_iter()
        .map(|(game, rows)| (game, rows.collect::<Vec<_>>()))
        .collect::<Vec<_>>();
    tracing::debug!(anchor = anchor_id, games = games.len(), "re-settling later matches");

    let mut ratings: HashMap<i64, i64> = HashMap::new();
    for (game, rows) in games {
        // The rating each player brings into this match.
        let mut before = Vec::with_capacity(rows.len());
        for &(_, player, team, score, _, _) in &rows {
            let rating = match ratings.get(&player) {
                Some(rating) => *rating,
                None => rating_at(tx, config, player, (anchor_time, anchor_id)).await?,
            };
            before.push((player, Team::try_from(team)?, score, rating));
        }

        let side = |which: Team| before.iter().filter(move |(_, team, _, _)| *team == which);
        let score = |team: Team| side(team).map(|(_, _, score, _)| *score).next().unwrap_or_default();
        let (delta1, delta2) = elo.settle(
            side(Team::One).map(|(_, _, _, rating)| *rating),
            side(Team::Two).map(|(_, _, _, rating)| *rating),
            Team::winner(score(Team::One), score(Team::Two)) == Team::One,
        );

        for (&(_, player, _, _, old_before, old_after), &(_, team, _, rating_before)) in
            rows.iter().zip(&before)
        {
            let rating_after = rating_before
                + match team {
                    Team::One => delta1,
                    Team::Two => delta2,
                };
            if (rating_before, rating_after) != (old_before, old_after) {
                query(
                    "UPDATE participant SET rating_before = $1, rating_after = $2
                    WHERE game = $3 AND player = $4",
                )
                .bind(rating_before)
                .bind(rating_after)
                .bind(game)
                .bind(player)
                .execute(tx.as_mut())
                .await?;
            }
            ratings.insert(player, rating_after);
        }
    }

    for (player, rating) in ratings {
        query("UPDATE player SET rating = $1 WHERE id = $2")
            .bind(rating)
            .bind(player)
            .execute(tx.as_mut())
            .await?;
    }
    Ok(())
}

/// The rating `player` held as of `at`: the outcome of their latest match no later than `at`, or
/// the initial rating.
async fn rating_at(
    tx: &mut Transaction<'_, Sqlite>,
    config: &RatingConfig,
    player: i64,
    at: (i64, i64),
) -> Result<i64> {
    let rating: Option<(i64,)> = query_as(
        "SELECT p.rating_after
        FROM participant AS p JOIN game AS g ON g.id = p.game
        WHERE p.player = $1 AND (g.created_at, g.id) <= ($2, $3)
        ORDER BY g.created_at DESC, g.id DESC
        LIMIT 1",
    )
    .bind(player)
    .bind(at.0)
    .bind(at.1)
    .fetch_optional(tx.as_mut())
    .await?;
    Ok(rating.map(|(rating,)| rating).unwrap_or(config.initial_rating))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::game::{GameType, Outcome};
    use futures::stream::TryStreamExt;

    async fn db() -> Db {
        Db::memory(RatingConfig::default()).await.unwrap()
    }

    fn singles(p1: &Player, p2: &Player, score1: i64, score2: i64) -> NewMatch {
        NewMatch {
            game_type: GameType::Singles,
            teams: vec![
                TeamEntry {
                    player_ids: vec![p1.id],
                    score: score1,
                },
                TeamEntry {
                    player_ids: vec![p2.id],
                    score: score2,
                },
            ],
        }
    }

    async fn count(db: &Db, table: &str) -> i64 {
        let (n,): (i64,) = query_as(&format!("SELECT count(*) FROM {table}"))
            .fetch_one(&db.pool)
            .await
            .unwrap();
        n
    }

    async fn counts(db: &Db) -> (i64, i64, i64) {
        (
            count(db, "player").await,
            count(db, "game").await,
            count(db, "participant").await,
        )
    }

    /// Every player's projection agrees with their participations.
    async fn assert_consistent(db: &Db) {
        for entry in db.leaderboard().await.unwrap() {
            let player = entry.player;
            let history: Vec<_> = db.rating_history(player.id).try_collect().await.unwrap();
            let expected = history
                .last()
                .map(|point| point.rating)
                .unwrap_or(db.config.initial_rating);
            assert_eq!(player.rating, expected, "{player:?}");
            assert_eq!(player.games_played as usize, history.len(), "{player:?}");
        }
    }

    #[tokio::test]
    async fn test_settle_singles() {
        let db = db().await;
        let alice = db.create_player("alice").await.unwrap();
        let bob = db.create_player("bob").await.unwrap();
        assert_eq!(alice.rating, 1500);
        assert_eq!(alice.games_played, 0);

        let game = db.create_match(singles(&alice, &bob, 10, 7)).await.unwrap();
        assert_eq!(game.players.len(), 2);
        assert_eq!(game.players[0].rating_before, 1500);
        assert_eq!(game.players[0].rating_after, 1516);
        assert_eq!(game.players[1].rating_after, 1484);

        let alice = db.player(alice.id).await.unwrap();
        let bob = db.player(bob.id).await.unwrap();
        assert_eq!((alice.rating, alice.games_played), (1516, 1));
        assert_eq!((bob.rating, bob.games_played), (1484, 1));
        assert_eq!(counts(&db).await, (2, 1, 2));
        assert_eq!(db.game(game.id).await.unwrap(), game);
    }

    #[tokio::test]
    async fn test_settle_doubles() {
        let db = db().await;
        let mut players = vec![];
        for name in ["a", "b", "c", "d"] {
            players.push(db.create_player(name).await.unwrap());
        }
        db.create_match(singles(&players[0], &players[2], 10, 0))
            .await
            .unwrap();

        // Team 1 averages (1516 + 1500) / 2 = 1508 against 1492.
        let game = db
            .create_match(NewMatch {
                game_type: GameType::Doubles,
                teams: vec![
                    TeamEntry {
                        player_ids: vec![players[0].id, players[1].id],
                        score: 3,
                    },
                    TeamEntry {
                        player_ids: vec![players[2].id, players[3].id],
                        score: 10,
                    },
                ],
            })
            .await
            .unwrap();
        let (delta1, delta2) = Elo::default().delta(1508., 1492., false);
        for p in &game.players {
            let delta = if p.team == Team::One { delta1 } else { delta2 };
            assert_eq!(p.rating_after - p.rating_before, delta);
        }
        assert!((delta1 + delta2).abs() <= 1);
        assert_consistent(&db).await;
    }

    #[tokio::test]
    async fn test_settle_uneven_teams() {
        let db = db().await;
        let mut players = vec![];
        for name in ["a", "b", "c", "d"] {
            players.push(db.create_player(name).await.unwrap());
        }
        db.create_match(singles(&players[1], &players[3], 10, 0))
            .await
            .unwrap();

        // One player against a pair averaging (1516 + 1500) / 2 = 1508.
        let game = db
            .create_match(NewMatch {
                game_type: GameType::Doubles,
                teams: vec![
                    TeamEntry {
                        player_ids: vec![players[0].id],
                        score: 10,
                    },
                    TeamEntry {
                        player_ids: vec![players[1].id, players[2].id],
                        score: 6,
                    },
                ],
            })
            .await
            .unwrap();
        assert_eq!(game.players.len(), 3);
        let (delta1, delta2) = Elo::default().delta(1500., 1508., true);
        assert_eq!((delta1, delta2), (16, -16));
        for p in &game.players {
            let delta = if p.team == Team::One { delta1 } else { delta2 };
            assert_eq!(p.rating_after - p.rating_before, delta);
        }
        assert_eq!(db.player(players[0].id).await.unwrap().rating, 1516);
        assert_eq!(db.player(players[1].id).await.unwrap().rating, 1500);
        assert_eq!(db.player(players[2].id).await.unwrap().rating, 1484);
        assert_consistent(&db).await;
    }

    #[tokio::test]
    async fn test_delete_restores_ratings() {
        let db = db().await;
        let alice = db.create_player("alice").await.unwrap();
        let bob = db.create_player("bob").await.unwrap();
        db.create_match(singles(&alice, &bob, 10, 2)).await.unwrap();
        let before = (
            db.player(alice.id).await.unwrap(),
            db.player(bob.id).await.unwrap(),
        );

        let game = db.create_match(singles(&alice, &bob, 1, 10)).await.unwrap();
        db.delete_match(game.id).await.unwrap();

        assert_eq!(db.player(alice.id).await.unwrap(), before.0);
        assert_eq!(db.player(bob.id).await.unwrap(), before.1);
        assert_eq!(counts(&db).await, (2, 1, 2));
        assert!(matches!(db.game(game.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_match() {
        let db = db().await;
        let id = MatchId::from(42);
        assert!(matches!(db.delete_match(id).await, Err(Error::NotFound(_))));
        let score = Rescore {
            team1_score: 1,
            team2_score: 2,
        };
        assert!(matches!(
            db.revise_match(id, score).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_matches() {
        let db = db().await;
        let alice = db.create_player("alice").await.unwrap();
        let bob = db.create_player("bob").await.unwrap();
        let carol = db.create_player("carol").await.unwrap();

        let mut one_team = singles(&alice, &bob, 10, 0);
        one_team.teams.pop();
        let mut three_teams = singles(&alice, &bob, 10, 0);
        three_teams.teams.push(TeamEntry {
            player_ids: vec![carol.id],
            score: 3,
        });
        let mut empty_team = singles(&alice, &bob, 10, 0);
        empty_team.teams[1].player_ids.clear();
        let same_player = singles(&alice, &alice, 10, 0);
        let negative = singles(&alice, &bob, 10, -1);

        for new in [one_team, three_teams, empty_team, same_player, negative] {
            let res = db.create_match(new.clone()).await;
            assert!(matches!(res, Err(Error::Validation(_))), "{new:?}: {res:?}");
        }
        assert_eq!(counts(&db).await, (3, 0, 0));
        assert_eq!(db.player(alice.id).await.unwrap(), alice);
    }

    #[tokio::test]
    async fn test_unknown_player_aborts() {
        let db = db().await;
        let alice = db.create_player("alice").await.unwrap();
        let ghost = Player {
            id: 99.into(),
            ..alice.clone()
        };
        let res = db.create_match(singles(&alice, &ghost, 10, 0)).await;
        assert!(matches!(res, Err(Error::NotFound(_))), "{res:?}");
        assert_eq!(counts(&db).await, (1, 0, 0));
        assert_eq!(db.player(alice.id).await.unwrap(), alice);
    }

    #[tokio::test]
    async fn test_revise_latest_match() {
        let db = db().await;
        let alice = db.create_player("alice").await.unwrap();
        let bob = db.create_player("bob").await.unwrap();
        let game = db.create_match(singles(&alice, &bob, 10, 7)).await.unwrap();

        let res = db
            .revise_match(
                game.id,
                Rescore {
                    team1_score: -1,
                    team2_score: 10,
                },
            )
            .await;
        assert!(matches!(res, Err(Error::Validation(_))), "{res:?}");

        db.revise_match(
            game.id,
            Rescore {
                team1_score: 7,
                team2_score: 10,
            },
        )
        .await
        .unwrap();

        let alice = db.player(alice.id).await.unwrap();
        let bob = db.player(bob.id).await.unwrap();
        assert_eq!((alice.rating, alice.games_played), (1484, 1));
        assert_eq!((bob.rating, bob.games_played), (1516, 1));

        let game = db.game(game.id).await.unwrap();
        assert_eq!(game.players[0].score, 7);
        assert_eq!(game.players[0].rating_before, 1500);
        assert_eq!(game.players[1].score, 10);
        assert_consistent(&db).await;
    }

    #[tokio::test]
    async fn test_edit_older_match() {
        let db = db().await;
        let alice = db.create_player("alice").await.unwrap();
        let bob = db.create_player("bob").await.unwrap();
        let first = db.create_match(singles(&alice, &bob, 10, 5)).await.unwrap();
        let second = db.create_match(singles(&alice, &bob, 10, 5)).await.unwrap();
        assert_eq!(second.players[0].rating_before, 1516);
        assert_eq!(second.players[0].rating_after, 1531);

        // Flipping the first result re-settles the second from the corrected ratings.
        db.revise_match(
            first.id,
            Rescore {
                team1_score: 5,
                team2_score: 10,
            },
        )
        .await
        .unwrap();
        let second_now = db.game(second.id).await.unwrap();
        assert_eq!(second_now.players[0].rating_before, 1484);
        assert_eq!(second_now.players[0].rating_after, 1501);
        assert_eq!(second_now.players[1].rating_after, 1499);
        assert_eq!(db.player(alice.id).await.unwrap().rating, 1501);
        assert_consistent(&db).await;

        // Deleting the first leaves the second as if it had been played from scratch.
        db.delete_match(first.id).await.unwrap();
        let alice = db.player(alice.id).await.unwrap();
        let bob = db.player(bob.id).await.unwrap();
        assert_eq!((alice.rating, alice.games_played), (1516, 1));
        assert_eq!((bob.rating, bob.games_played), (1484, 1));
        assert_consistent(&db).await;
    }

    /// Player indices and score of each side of a match.
    #[derive(Clone, Debug)]
    struct Fixture {
        team1: Vec<usize>,
        score1: i64,
        team2: Vec<usize>,
        score2: i64,
    }

    fn fixture(team1: &[usize], score1: i64, team2: &[usize], score2: i64) -> Fixture {
        Fixture {
            team1: team1.to_vec(),
            score1,
            team2: team2.to_vec(),
            score2,
        }
    }

    /// A fresh ledger of four players with `fixtures` recorded in order.
    async fn ledger(fixtures: &[Fixture]) -> (Db, Vec<Player>, Vec<MatchId>) {
        let db = db().await;
        let mut players = vec![];
        for name in ["a", "b", "c", "d"] {
            players.push(db.create_player(name).await.unwrap());
        }

        let mut games = vec![];
        for f in fixtures {
            let entry = |team: &[usize], score| TeamEntry {
                player_ids: team.iter().map(|i| players[*i].id).collect(),
                score,
            };
            let game_type = if f.team1.len() + f.team2.len() > 2 {
                GameType::Doubles
            } else {
                GameType::Singles
            };
            let game = db
                .create_match(NewMatch {
                    game_type,
                    teams: vec![entry(&f.team1, f.score1), entry(&f.team2, f.score2)],
                })
                .await
                .unwrap();
            games.push(game.id);
        }
        (db, players, games)
    }

    type Settlement = (Team, i64, i64, i64);

    /// Each player's rating and match count, and each match's settlement, oldest first.
    async fn snapshot(db: &Db, players: &[Player]) -> (Vec<(i64, u32)>, Vec<Vec<Settlement>>) {
        let mut projections = vec![];
        for p in players {
            let p = db.player(p.id).await.unwrap();
            projections.push((p.rating, p.games_played));
        }
        let settlements = db
            .matches(u32::MAX)
            .await
            .unwrap()
            .into_iter()
            .rev()
            .map(|game| {
                game.players
                    .into_iter()
                    .map(|p| (p.team, p.score, p.rating_before, p.rating_after))
                    .collect()
            })
            .collect();
        (projections, settlements)
    }

    #[tokio::test]
    async fn test_edit_replays_uninvolved_players() {
        let fixtures = vec![
            fixture(&[0], 10, &[1], 5),
            fixture(&[2], 10, &[3], 4),
            fixture(&[1], 10, &[2], 8),
            fixture(&[3], 10, &[0], 6),
            fixture(&[2], 10, &[1], 9),
        ];
        let (db, players, games) = ledger(&fixtures).await;

        // The second match shares no player with the first, so its players' ratings going in
        // come from their own ledger history.
        db.revise_match(
            games[0],
            Rescore {
                team1_score: 5,
                team2_score: 10,
            },
        )
        .await
        .unwrap();
        assert_consistent(&db).await;
        let mut revised = fixtures.clone();
        revised[0] = fixture(&[0], 5, &[1], 10);
        let (expected, expected_players, _) = ledger(&revised).await;
        assert_eq!(
            snapshot(&db, &players).await,
            snapshot(&expected, &expected_players).await
        );

        db.delete_match(games[0]).await.unwrap();
        assert_consistent(&db).await;
        let (expected, expected_players, _) = ledger(&fixtures[1..]).await;
        assert_eq!(
            snapshot(&db, &players).await,
            snapshot(&expected, &expected_players).await
        );
        assert_eq!(db.player(players[0].id).await.unwrap().games_played, 1);
    }

    #[tokio::test]
    async fn test_edit_doubles_match() {
        let fixtures = vec![
            fixture(&[0, 1], 10, &[2, 3], 6),
            fixture(&[0, 2], 10, &[1, 3], 8),
            fixture(&[1], 10, &[2, 3], 7),
            fixture(&[3, 0], 10, &[1, 2], 9),
        ];
        let (db, players, games) = ledger(&fixtures).await;

        db.revise_match(
            games[1],
            Rescore {
                team1_score: 4,
                team2_score: 10,
            },
        )
        .await
        .unwrap();
        assert_consistent(&db).await;
        let mut revised = fixtures.clone();
        revised[1] = fixture(&[0, 2], 4, &[1, 3], 10);
        let (expected, expected_players, _) = ledger(&revised).await;
        assert_eq!(
            snapshot(&db, &players).await,
            snapshot(&expected, &expected_players).await
        );

        db.delete_match(games[1]).await.unwrap();
        assert_consistent(&db).await;
        let remaining = [
            fixtures[0].clone(),
            fixtures[2].clone(),
            fixtures[3].clone(),
        ];
        let (expected, expected_players, _) = ledger(&remaining).await;
        assert_eq!(
            snapshot(&db, &players).await,
            snapshot(&expected, &expected_players).await
        );
    }

    #[tokio::test]
    async fn test_reads_during_write() {
        let path = std::env::temp_dir().join(format!("foosball-{}-reads.db", std::process::id()));
        let files = ["", "-wal", "-shm"].map(|suffix| format!("{}{suffix}", path.display()));
        for file in &files {
            let _ = std::fs::remove_file(file);
        }

        let db = Db::open(&path, RatingConfig::default()).await.unwrap();
        let alice = db.create_player("alice").await.unwrap();
        let bob = db.create_player("bob").await.unwrap();
        db.create_match(singles(&alice, &bob, 10, 4)).await.unwrap();

        // An open writer does not hold up reads, which see the last committed state.
        let mut tx = db.pool.begin_with(BEGIN_WRITE).await.unwrap();
        query("UPDATE player SET name = 'alicia' WHERE id = $1")
            .bind(i64::from(alice.id))
            .execute(tx.as_mut())
            .await
            .unwrap();
        assert_eq!(db.player(alice.id).await.unwrap().name, "alice");
        assert_eq!(db.player_stats(alice.id).await.unwrap().wins, 1);
        assert_eq!(db.leaderboard().await.unwrap().len(), 2);

        // A settlement started meanwhile waits for the writer instead of failing.
        let (settled, ()) = tokio::join!(db.create_match(singles(&alice, &bob, 10, 2)), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.commit().await.unwrap();
        });
        let settled = settled.unwrap();
        assert_eq!(settled.players[0].player_name, "alicia");
        assert_eq!(settled.players[0].rating_before, 1516);
        assert_consistent(&db).await;

        db.pool.close().await;
        for file in &files {
            let _ = std::fs::remove_file(file);
        }
    }

    #[tokio::test]
    async fn test_leaderboard() {
        let db = db().await;
        let mut players = vec![];
        for name in ["a", "b", "c"] {
            players.push(db.create_player(name).await.unwrap());
        }
        db.create_match(singles(&players[0], &players[1], 10, 2))
            .await
            .unwrap();
        db.create_match(singles(&players[2], &players[0], 10, 8))
            .await
            .unwrap();
        db.create_match(singles(&players[2], &players[1], 10, 9))
            .await
            .unwrap();

        let board = db.leaderboard().await.unwrap();
        assert_eq!(board.len(), 3);
        assert_eq!(board[0].player.name, "c");
        assert_eq!((board[0].wins, board[0].losses), (2, 0));
        for pair in board.windows(2) {
            assert!(pair[0].player.rating >= pair[1].player.rating);
        }
        for entry in &board {
            assert!(entry.wins + entry.losses <= entry.player.games_played);
        }
    }

    #[tokio::test]
    async fn test_head_to_head() {
        let db = db().await;
        let alice = db.create_player("alice").await.unwrap();
        let bob = db.create_player("bob").await.unwrap();
        db.create_match(singles(&alice, &bob, 10, 4)).await.unwrap();
        db.create_match(singles(&bob, &alice, 10, 4)).await.unwrap();
        db.create_match(singles(&alice, &bob, 10, 6)).await.unwrap();

        let h2h = db.head_to_head(alice.id).await.unwrap();
        assert_eq!(h2h.len(), 1);
        assert_eq!(h2h[0].opponent_id, bob.id);
        assert_eq!(h2h[0].total_games, 3);
        assert_eq!((h2h[0].wins, h2h[0].losses), (2, 1));
        assert!((h2h[0].win_rate - 0.667).abs() < 0.001);
        assert_eq!(h2h[0].last_result, Outcome::Win);

        let h2h = db.head_to_head(bob.id).await.unwrap();
        assert_eq!((h2h[0].wins, h2h[0].losses), (1, 2));
        assert_eq!(h2h[0].last_result, Outcome::Loss);
    }

    #[tokio::test]
    async fn test_player_analytics() {
        let db = db().await;
        let alice = db.create_player("alice").await.unwrap();
        let bob = db.create_player("bob").await.unwrap();
        let carol = db.create_player("carol").await.unwrap();
        let mut games = vec![];
        for (p1, p2) in [(&alice, &bob), (&alice, &carol), (&bob, &alice), (&alice, &bob)] {
            games.push(db.create_match(singles(p1, p2, 10, 3)).await.unwrap());
        }

        let stats = db.player_stats(alice.id).await.unwrap();
        assert_eq!(stats.total_games, 4);
        assert_eq!((stats.wins, stats.losses), (3, 1));
        assert_eq!(stats.win_rate, 0.75);
        assert_eq!(stats.current_streak, 1);
        assert_eq!(stats.longest_win_streak, 2);
        assert_eq!(stats.longest_losing_streak, 1);
        assert_eq!(stats.peak_rating, games[1].players[0].rating_after);
        assert_eq!(stats.peak_rating_date, Some(games[1].created_at));

        let history: Vec<_> = db.rating_history(alice.id).try_collect().await.unwrap();
        assert_eq!(
            history.iter().map(|p| p.match_id).collect::<Vec<_>>(),
            games.iter().map(|g| g.id).collect::<Vec<_>>()
        );
        assert!(history.windows(2).all(|w| w[0].date <= w[1].date));
        let again: Vec<_> = db.rating_history(alice.id).try_collect().await.unwrap();
        assert_eq!(history, again);

        let recent = db.recent_games(alice.id).await.unwrap();
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0].match_id, games[3].id);
        assert!(recent[0].won);
        assert_eq!(recent[0].opponents, "bob");
        assert!(!recent[1].won);
        assert_eq!(recent[1].score, 3);
        assert_eq!(recent[1].opponent_score, 10);
        assert_eq!(recent[2].opponents, "carol");

        let fresh = db.player_stats(carol.id).await.unwrap();
        assert_eq!(fresh.current_streak, -1);
        assert!(matches!(
            db.player_stats(PlayerId::from(1234)).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_recent_games_limit() {
        let db = Db::memory(RatingConfig {
            recent_games: 2,
            ..Default::default()
        })
        .await
        .unwrap();
        let alice = db.create_player("alice").await.unwrap();
        let bob = db.create_player("bob").await.unwrap();
        for _ in 0..3 {
            db.create_match(singles(&alice, &bob, 10, 0)).await.unwrap();
        }
        assert_eq!(db.recent_games(alice.id).await.unwrap().len(), 2);
        assert_eq!(db.matches(2).await.unwrap().len(), 2);
        assert_eq!(db.matches(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_manage_players() {
        let db = db().await;
        assert!(matches!(
            db.create_player("   ").await,
            Err(Error::Validation(_))
        ));
        let alice = db.create_player(" alice ").await.unwrap();
        assert_eq!(alice.name, "alice");
        let bob = db.create_player("bob").await.unwrap();

        db.rename_player(alice.id, "alicia").await.unwrap();
        assert_eq!(db.player(alice.id).await.unwrap().name, "alicia");
        assert!(matches!(
            db.rename_player(PlayerId::from(77), "x").await,
            Err(Error::NotFound(_))
        ));

        db.create_match(singles(&alice, &bob, 10, 0)).await.unwrap();
        assert!(matches!(
            db.delete_player(bob.id).await,
            Err(Error::Validation(_))
        ));
        let carol = db.create_player("carol").await.unwrap();
        db.delete_player(carol.id).await.unwrap();
        assert!(matches!(db.player(carol.id).await, Err(Error::NotFound(_))));
    }
}
