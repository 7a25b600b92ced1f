//! Database operations for SQLite.
//!
//! This module handles the connection, schema creation, and migrations.
//! A single connection is opened at start-up and shared by every store
//! through a cheap-to-clone [`Database`] handle.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Current schema version (PRAGMA user_version)
pub const SCHEMA_VERSION: i32 = 2;

/// Shared database connection handle
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let is_new = !path.exists();

        debug!(path = %path.display(), "Opening database");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        // Enable foreign keys
        conn.execute("PRAGMA foreign_keys = ON", [])
            .context("Failed to enable foreign keys")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        if is_new {
            info!("Creating new database schema");
            db.create_schema()?;
        } else {
            debug!("Database already exists");
            db.run_migrations()?;
        }

        Ok(db)
    }

    /// Create the database schema
    fn create_schema(&self) -> Result<()> {
        self.conn()
            .execute_batch(include_str!("../schema.sql"))
            .context("Failed to create database schema")?;

        info!(version = SCHEMA_VERSION, "Database schema created successfully");
        Ok(())
    }

    /// Lock the underlying connection
    ///
    /// Callers must not hold the guard across an `.await`.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves SQLite itself consistent
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check if a table exists
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Check if a column exists on a table
    pub fn column_exists(&self, table_name: &str, column: &str) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
            [table_name, column],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get the database version (from user_version pragma)
    pub fn get_version(&self) -> Result<i32> {
        let version: i32 = self.conn().query_row(
            "PRAGMA user_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    /// Set the database version
    pub fn set_version(&self, version: i32) -> Result<()> {
        self.conn().execute(
            &format!("PRAGMA user_version = {}", version),
            [],
        )?;
        Ok(())
    }

    /// Run migrations for existing databases
    fn run_migrations(&self) -> Result<()> {
        let version = self.get_version()?;
        if version >= SCHEMA_VERSION {
            return Ok(());
        }

        info!(from = version, to = SCHEMA_VERSION, "Running database migrations");

        // v1 files tracked the last refresh in `updated_at`; rebuild the
        // table so inserts that only know `synced_at` satisfy every column
        if self.table_exists("shows")? && !self.column_exists("shows", "synced_at")? {
            info!("Running migration: replacing shows.updated_at with synced_at");
            self.conn()
                .execute_batch(
                    "BEGIN;
                     CREATE TABLE shows_v2 (
                         show_id INTEGER PRIMARY KEY,
                         name TEXT NOT NULL,
                         overview TEXT NOT NULL DEFAULT '',
                         status TEXT NOT NULL DEFAULT '',
                         tagline TEXT NOT NULL DEFAULT '',
                         poster_path TEXT,
                         genres TEXT NOT NULL DEFAULT '[]',
                         number_of_seasons INTEGER NOT NULL,
                         number_of_episodes INTEGER NOT NULL,
                         seasons TEXT NOT NULL DEFAULT '[]',
                         created_at TIMESTAMP NOT NULL,
                         synced_at TIMESTAMP NOT NULL
                     );
                     INSERT INTO shows_v2 (
                         show_id, name, overview, status, tagline, poster_path, genres,
                         number_of_seasons, number_of_episodes, seasons, created_at, synced_at
                     )
                     SELECT show_id, name, overview, status, tagline, poster_path, genres,
                            number_of_seasons, number_of_episodes, seasons, created_at,
                            COALESCE(updated_at, created_at)
                     FROM shows;
                     DROP TABLE shows;
                     ALTER TABLE shows_v2 RENAME TO shows;
                     COMMIT;",
                )
                .context("Failed to migrate shows table")?;
        }

        // v1 files had no movie tables; everything else is IF NOT EXISTS
        self.conn()
            .execute_batch(include_str!("../schema.sql"))
            .context("Failed to apply schema during migration")?;

        self.set_version(SCHEMA_VERSION)?;
        info!("Migrations completed");

        Ok(())
    }
}
