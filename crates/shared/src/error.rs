//! Error taxonomy shared by the stores, the source adapter and the engine.
//!
//! Bootstrapping code (config, logging, opening the database) reports through
//! `anyhow`; everything a caller may want to branch on goes through
//! [`TrackerError`].

use std::fmt;
use thiserror::Error;

/// What was absent when an operation required it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    User(String),
    Show(i64),
    Season { show_id: i64, season_number: u32 },
    WatchedEpisode {
        user_id: String,
        show_id: i64,
        season_number: u32,
        episode_number: u32,
    },
    WatchEntry { user_id: String, show_id: i64 },
    Movie(i64),
    WatchedMovie { user_id: String, movie_id: i64 },
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::User(name) => write!(f, "user '{}'", name),
            Missing::Show(id) => write!(f, "show {}", id),
            Missing::Season { show_id, season_number } => {
                write!(f, "season {} of show {}", season_number, show_id)
            }
            Missing::WatchedEpisode {
                user_id,
                show_id,
                season_number,
                episode_number,
            } => write!(
                f,
                "watch record of S{}E{} of show {} for user {}",
                season_number, episode_number, show_id, user_id
            ),
            Missing::WatchEntry { user_id, show_id } => {
                write!(f, "watch record of show {} for user {}", show_id, user_id)
            }
            Missing::Movie(id) => write!(f, "movie {}", id),
            Missing::WatchedMovie { user_id, movie_id } => {
                write!(f, "watch record of movie {} for user {}", movie_id, user_id)
            }
        }
    }
}

/// Errors surfaced by catalog and watch-state operations
#[derive(Error, Debug)]
pub enum TrackerError {
    /// A required entity does not exist
    #[error("Not found: {0}")]
    NotFound(Missing),

    /// The episode or movie is already recorded as watched
    #[error("Already marked as watched")]
    AlreadyWatched,

    /// Every catalog episode of the season is already watched
    #[error("All episodes in this season are already watched")]
    NothingToMark,

    /// The upstream content database could not be reached or refused the request
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Missing or invalid setting (e.g. no API key); not retryable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A concurrent writer created the same unique key first
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database failure, with the operation that was running
    #[error("Database error while {operation}: {source}")]
    Storage {
        operation: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Stored JSON document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrackerError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrackerError::SourceUnavailable(_))
    }

    /// True for idempotency rejections (`AlreadyWatched`, `NothingToMark`)
    pub fn is_already_applied(&self) -> bool {
        matches!(self, TrackerError::AlreadyWatched | TrackerError::NothingToMark)
    }
}

/// Attach the running operation to a `rusqlite` failure
pub trait StorageContext<T> {
    fn during(self, operation: &str) -> Result<T, TrackerError>;
}

impl<T> StorageContext<T> for Result<T, rusqlite::Error> {
    fn during(self, operation: &str) -> Result<T, TrackerError> {
        self.map_err(|source| TrackerError::Storage {
            operation: operation.to_string(),
            source,
        })
    }
}

/// Whether a `rusqlite` error is a UNIQUE / PRIMARY KEY violation
///
/// NOT NULL, CHECK and foreign key failures are real storage errors and
/// must not be read as a duplicate.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
