//! Show tracker CLI application.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shared::{Config, Database, LogConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tmdb_client::TmdbClient;
use tracing::{error, info};
use tracker::Tracker;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage users
    #[command(subcommand)]
    User(UserCommand),

    /// Show a catalog entry, fetching it on first access
    Show {
        show_id: i64,
        /// Flag episodes this user has watched
        #[arg(long)]
        user: Option<String>,
    },

    /// Mark one episode as watched
    Watch {
        username: String,
        show_id: i64,
        season: u32,
        episode: u32,
    },

    /// Mark every remaining episode of a season as watched
    WatchSeason {
        username: String,
        show_id: i64,
        season: u32,
    },

    /// Remove one watched episode
    Unwatch {
        username: String,
        show_id: i64,
        season: u32,
        episode: u32,
    },

    /// Remove a user's whole watch history for a show
    UnwatchShow { username: String, show_id: i64 },

    /// Per-show progress for a user
    Progress { username: String },

    /// Aggregate statistics for a user
    Stats { username: String },

    /// Watched episodes, newest first
    Timeline { username: String },

    /// Movie marks
    #[command(subcommand)]
    Movie(MovieCommand),

    /// Refresh catalog entries from TMDB
    Sync {
        /// Only this show
        #[arg(long)]
        show: Option<i64>,
        /// Overwrite even when nothing changed (requires --show)
        #[arg(long, requires = "show")]
        force: bool,
        /// Repeat the full sync every N seconds until Ctrl-C
        #[arg(long, conflicts_with = "show")]
        every: Option<u64>,
    },

    /// Fetch shows and movies that have watch records but no catalog entry
    Backfill,
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Register a new user
    Add { username: String },
}

#[derive(Subcommand, Debug)]
enum MovieCommand {
    /// Mark a movie as watched
    Watch { username: String, movie_id: i64 },
    /// Remove a watched movie
    Unwatch { username: String, movie_id: i64 },
    /// Watched movies, newest first
    Timeline { username: String },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Initialize logging
    shared::logging::init(LogConfig::from_settings(
        &config.logging,
        &config.log_dir(),
        "tracker",
        args.verbose,
    ))?;

    info!(config_file = %args.config.display(), "Tracker starting");

    // Initialize database
    let db_path = config.database_path();
    info!(db_path = %db_path.display(), "Opening database");
    let database = Database::open(&db_path).context("Failed to open database")?;

    // Initialize catalog source
    let source = TmdbClient::from_config(&config).context("Failed to create TMDB client")?;
    let tracker = Tracker::new(database, Arc::new(source), &config);

    run(&tracker, args.command).await
}

async fn run(tracker: &Tracker, command: Command) -> Result<()> {
    match command {
        Command::User(UserCommand::Add { username }) => {
            print_json(&tracker.register_user(&username)?)?;
        }
        Command::Show { show_id, user } => {
            let user_id = match user {
                Some(username) => tracker.find_user(&username)?.map(|u| u.user_id),
                None => None,
            };
            print_json(&tracker.show_detail(show_id, user_id.as_deref()).await?)?;
        }
        Command::Watch {
            username,
            show_id,
            season,
            episode,
        } => {
            let user = tracker.resolve_user(&username)?;
            let state = tracker
                .mark_episode_watched(&user.user_id, show_id, season, episode)
                .await?;
            print_json(&state)?;
        }
        Command::WatchSeason {
            username,
            show_id,
            season,
        } => {
            let user = tracker.resolve_user(&username)?;
            print_json(&tracker.mark_season_watched(&user.user_id, show_id, season).await?)?;
        }
        Command::Unwatch {
            username,
            show_id,
            season,
            episode,
        } => {
            let user = tracker.resolve_user(&username)?;
            match tracker.unmark_episode(&user.user_id, show_id, season, episode)? {
                shared::Removal::Episode(state) => print_json(&state)?,
                shared::Removal::EntryRemoved => {
                    print_json(&serde_json::json!({ "show_id": show_id, "entry_removed": true }))?
                }
            }
        }
        Command::UnwatchShow { username, show_id } => {
            let user = tracker.resolve_user(&username)?;
            tracker.unmark_show(&user.user_id, show_id)?;
            print_json(&serde_json::json!({ "show_id": show_id, "entry_removed": true }))?;
        }
        Command::Progress { username } => {
            let user = tracker.resolve_user(&username)?;
            print_json(&tracker.compute_progress(&user.user_id)?)?;
        }
        Command::Stats { username } => {
            let user = tracker.resolve_user(&username)?;
            print_json(&tracker.compute_stats(&user.user_id)?)?;
        }
        Command::Timeline { username } => {
            let user = tracker.resolve_user(&username)?;
            print_json(&tracker.episode_timeline(&user.user_id)?)?;
        }
        Command::Movie(MovieCommand::Watch { username, movie_id }) => {
            let user = tracker.resolve_user(&username)?;
            print_json(&tracker.mark_movie_watched(&user.user_id, movie_id).await?)?;
        }
        Command::Movie(MovieCommand::Unwatch { username, movie_id }) => {
            let user = tracker.resolve_user(&username)?;
            tracker.unmark_movie(&user.user_id, movie_id)?;
            print_json(&serde_json::json!({ "movie_id": movie_id, "removed": true }))?;
        }
        Command::Movie(MovieCommand::Timeline { username }) => {
            let user = tracker.resolve_user(&username)?;
            print_json(&tracker.movie_timeline(&user.user_id)?)?;
        }
        Command::Sync {
            show: Some(show_id),
            force,
            ..
        } => {
            let result = if force {
                tracker.resync_show(show_id).await?
            } else {
                tracker.sync_show(show_id).await?
            };
            print_json(&result)?;
        }
        Command::Sync {
            show: None,
            every: Some(seconds),
            ..
        } => {
            sync_periodically(tracker, Duration::from_secs(seconds.max(1))).await?;
        }
        Command::Sync { show: None, .. } => {
            print_json(&tracker.sync_all().await?)?;
        }
        Command::Backfill => {
            print_json(&tracker.backfill().await?)?;
        }
    }

    Ok(())
}

/// Run a full sync every `period` until Ctrl-C
async fn sync_periodically(tracker: &Tracker, period: Duration) -> Result<()> {
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, stopping periodic sync"),
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    };

    tracker
        .sync_periodically(period, shutdown, |summary| {
            if let Err(e) = print_json(&summary) {
                error!(error = %e, "Failed to print sync summary");
            }
        })
        .await?;

    Ok(())
}
