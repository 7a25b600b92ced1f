//! Shared library for the show tracker.
//!
//! This crate provides common functionality used by the source client and
//! the tracker engine:
//! - Configuration management
//! - Logging infrastructure
//! - Error taxonomy
//! - Data models
//! - SQLite database and per-entity stores
//! - The catalog source capability

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod movies;
pub mod source;
pub mod users;
pub mod watch_state;

// Re-export commonly used types
pub use catalog::CatalogStore;
pub use config::Config;
pub use db::Database;
pub use error::{Missing, TrackerError};
pub use logging::LogConfig;
pub use models::*;
pub use movies::MovieStore;
pub use source::{CatalogSource, SourceMovie, SourceSeason, SourceSeasonSummary, SourceShow};
pub use users::UserStore;
pub use watch_state::{Removal, WatchStateStore};

/// Result type for catalog and watch-state operations
pub type Result<T> = std::result::Result<T, TrackerError>;
