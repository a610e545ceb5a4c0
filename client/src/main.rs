use clap::{Parser, Subcommand};
use foosball_client::ApiClient;
use foosball_core::{
    game::{GameType, MatchId, PlayerId, Team},
    message::{NewMatch, Rescore, TeamEntry},
};
use itertools::Itertools;
use std::process::exit;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Record foosball matches and follow the ratings.
#[derive(Parser)]
struct Options {
    /// Ratings server.
    #[clap(
        short,
        long,
        env = "FOOSBALL_SERVER",
        default_value = "http://localhost:8080"
    )]
    server: Url,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the leaderboard.
    Leaderboard,

    /// Register a new player.
    AddPlayer { name: String },

    /// Change a player's name.
    RenamePlayer { id: PlayerId, name: String },

    /// Remove a player who has not played any matches.
    RemovePlayer { id: PlayerId },

    /// List the most recent matches.
    Games {
        #[clap(short, long, default_value = "20")]
        limit: u32,
    },

    /// Record the result of a match.
    Record {
        #[clap(short, long, default_value = "singles")]
        game_type: GameType,

        /// Comma-separated player IDs of the first team.
        #[clap(long, value_delimiter = ',', required = true)]
        team1: Vec<PlayerId>,

        #[clap(long)]
        score1: i64,

        /// Comma-separated player IDs of the second team.
        #[clap(long, value_delimiter = ',', required = true)]
        team2: Vec<PlayerId>,

        #[clap(long)]
        score2: i64,
    },

    /// Correct the score of a recorded match.
    Revise {
        id: MatchId,
        score1: i64,
        score2: i64,
    },

    /// Delete a recorded match, reverting its effect on ratings.
    Delete { id: MatchId },

    /// Show a player's statistics.
    Stats { id: PlayerId },

    /// Show a player's rating after each match.
    History { id: PlayerId },
}

impl Command {
    async fn run(&self, api: &ApiClient) -> anyhow::Result<()> {
        match self {
            Self::Leaderboard => {
                for (rank, entry) in api.leaderboard().await?.into_iter().enumerate() {
                    println!(
                        "{:>3}. {:<20} {:>5}  {}W {}L ({} games)",
                        rank + 1,
                        entry.player.name,
                        entry.player.rating,
                        entry.wins,
                        entry.losses,
                        entry.player.games_played,
                    );
                }
            }
            Self::AddPlayer { name } => {
                let player = api.create_player(name).await?;
                println!("registered {} with ID {}", player.name, player.id);
            }
            Self::RenamePlayer { id, name } => api.rename_player(*id, name).await?,
            Self::RemovePlayer { id } => api.delete_player(*id).await?,
            Self::Games { limit } => {
                for game in api.matches(*limit).await? {
                    let side = |team| {
                        let names = game.team(team).map(|p| &p.player_name).join(" & ");
                        let score = game.team(team).next().map(|p| p.score).unwrap_or_default();
                        (names, score)
                    };
                    let ((names1, score1), (names2, score2)) = (side(Team::One), side(Team::Two));
                    println!(
                        "{}. {} {}: {names1} {score1} - {score2} {names2}",
                        game.id,
                        game.created_at.format("%Y-%m-%d %H:%M"),
                        game.game_type,
                    );
                }
            }
            Self::Record {
                game_type,
                team1,
                score1,
                team2,
                score2,
            } => {
                let game = api
                    .create_match(&NewMatch {
                        game_type: *game_type,
                        teams: vec![
                            TeamEntry {
                                player_ids: team1.clone(),
                                score: *score1,
                            },
                            TeamEntry {
                                player_ids: team2.clone(),
                                score: *score2,
                            },
                        ],
                    })
                    .await?;
                println!("recorded match {}", game.id);
                for p in &game.players {
                    println!(
                        "  {:<20} {} -> {} ({:+})",
                        p.player_name,
                        p.rating_before,
                        p.rating_after,
                        p.rating_after - p.rating_before
                    );
                }
            }
            Self::Revise { id, score1, score2 } => {
                api.revise_match(
                    *id,
                    Rescore {
                        team1_score: *score1,
                        team2_score: *score2,
                    },
                )
                .await?;
            }
            Self::Delete { id } => api.delete_match(*id).await?,
            Self::Stats { id } => {
                let player = api.player(*id).await?;
                let stats = api.player_stats(*id).await?;
                let recent = api.recent_games(*id).await?;
                let h2h = api.head_to_head(*id).await?;

                println!("{} (rating {})", player.name, player.rating);
                println!(
                    "{} games, {}W {}L ({:.1}%)",
                    stats.total_games,
                    stats.wins,
                    stats.losses,
                    stats.win_rate * 100.
                );
                match stats.current_streak {
                    0 => println!("no active streak"),
                    n if n > 0 => println!("{n} game win streak"),
                    n => println!("{} game losing streak", -n),
                }
                println!(
                    "longest streaks: {}W {}L",
                    stats.longest_win_streak, stats.longest_losing_streak
                );
                match stats.peak_rating_date {
                    Some(date) => println!(
                        "peak rating {} on {}",
                        stats.peak_rating,
                        date.format("%Y-%m-%d")
                    ),
                    None => println!("peak rating {}", stats.peak_rating),
                }

                println!("\nrecent games:");
                for game in recent {
                    println!(
                        "  {} {} {}-{} vs {} ({:+})",
                        game.date.format("%Y-%m-%d"),
                        if game.won { "W" } else { "L" },
                        game.score,
                        game.opponent_score,
                        game.opponents,
                        game.rating_change,
                    );
                }

                println!("\nhead to head:");
                for record in h2h {
                    println!(
                        "  {:<20} {}W {}L ({:.1}%), last {}",
                        record.opponent_name,
                        record.wins,
                        record.losses,
                        record.win_rate * 100.,
                        record.last_result,
                    );
                }
            }
            Self::History { id } => {
                for point in api.rating_history(*id).await? {
                    println!(
                        "{} {:>5} (match {})",
                        point.date.format("%Y-%m-%d %H:%M"),
                        point.rating,
                        point.match_id
                    );
                }
            }
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let opt = Options::parse();
    let api = ApiClient::new(opt.server.clone());

    if let Err(err) = opt.command.run(&api).await {
        eprintln!("{err:#}");
        exit(1);
    }
}
