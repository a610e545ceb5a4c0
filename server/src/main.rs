use anyhow::Context;
use clap::{Args, Parser};
use foosball_core::{config::RatingConfig, db::Db};
use futures::future;
use hyper::{
    service::{make_service_fn, service_fn},
    Server,
};
use std::{convert::Infallible, net::SocketAddr, path::PathBuf};
use tracing_subscriber::filter::EnvFilter;

mod api;

use api::App;

/// HTTP server for foosball ratings.
#[derive(Parser)]
struct Options {
    /// Address to listen on.
    #[clap(short, long, env = "FOOSBALL_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// SQLite database file. Ratings are kept in memory if not given.
    #[clap(short, long, env = "FOOSBALL_DB")]
    db: Option<PathBuf>,

    /// Maximum number of matches returned when listing matches.
    #[clap(long, env = "FOOSBALL_GAME_LIMIT", default_value = "50")]
    game_limit: u32,

    /// Origin allowed to make cross-origin requests, e.g. a web frontend.
    #[clap(long, env = "FOOSBALL_ALLOW_ORIGIN")]
    allow_origin: Option<String>,

    #[clap(flatten)]
    rating: RatingOptions,
}

#[derive(Args)]
struct RatingOptions {
    /// How far a single result moves a rating.
    #[clap(long, env = "FOOSBALL_K_FACTOR", default_value = "32")]
    k_factor: f64,

    /// Rating given to newly registered players.
    #[clap(long, env = "FOOSBALL_INITIAL_RATING", default_value = "1500")]
    initial_rating: i64,

    /// Number of recent matches considered for streaks; 0 considers every match.
    #[clap(long, env = "FOOSBALL_STREAK_WINDOW", default_value = "20")]
    streak_window: u32,

    /// Number of matches listed in a player's recent games.
    #[clap(long, env = "FOOSBALL_RECENT_GAMES", default_value = "10")]
    recent_games: u32,
}

impl From<&RatingOptions> for RatingConfig {
    fn from(opt: &RatingOptions) -> Self {
        Self {
            k_factor: opt.k_factor,
            initial_rating: opt.initial_rating,
            streak_window: Some(opt.streak_window).filter(|window| *window > 0),
            recent_games: opt.recent_games,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(true)
        .init();
    let opt = Options::parse();

    let config = RatingConfig::from(&opt.rating);
    tracing::info!(?config, "rating configuration");
    let db = match &opt.db {
        Some(path) => Db::open(path, config)
            .await
            .context(format!("opening database {}", path.display()))?,
        None => {
            tracing::warn!("no database file given, ratings will not survive a restart");
            Db::memory(config).await?
        }
    };
    let app = App::new(db, opt.game_limit, opt.allow_origin.clone());

    let make_service = make_service_fn(move |_| {
        let app = app.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let app = app.clone();
                async move { Ok::<_, Infallible>(app.handle(req).await) }
            }))
        }
    });

    let server = Server::try_bind(&opt.bind)
        .context(format!("binding {}", opt.bind))?
        .serve(make_service);
    tracing::info!(addr = %opt.bind, "listening");

    server
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {err:#}");
                future::pending::<()>().await;
            }
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
