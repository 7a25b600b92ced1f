//! Catalog store: one row per show, the season/episode tree kept as a JSON
//! document so a sync can replace it in one statement.

use crate::db::Database;
use crate::error::{is_unique_violation, Missing, StorageContext, TrackerError};
use crate::models::ShowCatalogEntry;
use crate::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};
use tracing::{debug, info};

const SELECT_COLUMNS: &str = "show_id, name, overview, status, tagline, poster_path, genres,
     number_of_seasons, number_of_episodes, seasons, created_at, synced_at";

/// Repository for show catalog entries
#[derive(Debug, Clone)]
pub struct CatalogStore {
    db: Database,
}

impl CatalogStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Find a catalog entry by show id
    pub fn find(&self, show_id: i64) -> Result<Option<ShowCatalogEntry>> {
        let conn = self.db.conn();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM shows WHERE show_id = ?1", SELECT_COLUMNS),
                params![show_id],
                read_row,
            )
            .optional()
            .during("looking up show")?;

        row.map(decode).transpose()
    }

    /// Find every entry whose id is in `show_ids` (missing ids are skipped)
    pub fn find_many(&self, show_ids: &[i64]) -> Result<Vec<ShowCatalogEntry>> {
        if show_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; show_ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM shows WHERE show_id IN ({}) ORDER BY show_id",
            SELECT_COLUMNS, placeholders
        );

        let rows = {
            let conn = self.db.conn();
            let mut stmt = conn.prepare(&sql).during("preparing bulk show lookup")?;
            let rows = stmt
                .query_map(params_from_iter(show_ids.iter()), read_row)
                .during("loading shows")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .during("reading show rows")?;
            rows
        };

        rows.into_iter().map(decode).collect()
    }

    /// Insert a new entry; a concurrent insert of the same id yields `Conflict`
    pub fn insert(&self, entry: &ShowCatalogEntry) -> Result<()> {
        let genres = serde_json::to_string(&entry.genres)?;
        let seasons = serde_json::to_string(&entry.seasons)?;

        let conn = self.db.conn();
        match conn.execute(
            "INSERT INTO shows (
                show_id, name, overview, status, tagline, poster_path, genres,
                number_of_seasons, number_of_episodes, seasons, created_at, synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.show_id,
                entry.name,
                entry.overview,
                entry.status,
                entry.tagline,
                entry.poster_path,
                genres,
                entry.number_of_seasons,
                entry.number_of_episodes,
                seasons,
                entry.created_at,
                entry.synced_at,
            ],
        ) {
            Ok(_) => {
                info!(
                    show_id = entry.show_id,
                    name = %entry.name,
                    seasons = entry.seasons.len(),
                    "Created catalog entry"
                );
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                debug!(show_id = entry.show_id, "Catalog entry already exists");
                Err(TrackerError::Conflict(format!("show {} already in catalog", entry.show_id)))
            }
            Err(e) => Err(e).during("inserting show"),
        }
    }

    /// Overwrite metadata and the whole season tree of an existing entry
    pub fn replace(&self, entry: &ShowCatalogEntry) -> Result<()> {
        let genres = serde_json::to_string(&entry.genres)?;
        let seasons = serde_json::to_string(&entry.seasons)?;

        let updated = self
            .db
            .conn()
            .execute(
                "UPDATE shows SET
                    name = ?2, overview = ?3, status = ?4, tagline = ?5, poster_path = ?6,
                    genres = ?7, number_of_seasons = ?8, number_of_episodes = ?9,
                    seasons = ?10, synced_at = ?11
                 WHERE show_id = ?1",
                params![
                    entry.show_id,
                    entry.name,
                    entry.overview,
                    entry.status,
                    entry.tagline,
                    entry.poster_path,
                    genres,
                    entry.number_of_seasons,
                    entry.number_of_episodes,
                    seasons,
                    entry.synced_at,
                ],
            )
            .during("replacing show")?;

        if updated == 0 {
            return Err(TrackerError::NotFound(Missing::Show(entry.show_id)));
        }

        debug!(show_id = entry.show_id, "Replaced catalog entry");
        Ok(())
    }

    /// Record that a sync looked at the entry without changing it
    pub fn touch(&self, show_id: i64, synced_at: DateTime<Utc>) -> Result<()> {
        self.db
            .conn()
            .execute(
                "UPDATE shows SET synced_at = ?2 WHERE show_id = ?1",
                params![show_id, synced_at],
            )
            .during("touching show")?;
        Ok(())
    }

    /// Ids of every stored show, ascending
    pub fn list_ids(&self) -> Result<Vec<i64>> {
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare("SELECT show_id FROM shows ORDER BY show_id")
            .during("preparing show id listing")?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .during("listing shows")?
            .collect::<std::result::Result<Vec<i64>, _>>()
            .during("reading show ids")?;
        Ok(ids)
    }

    /// Ids of shows last synced before `cutoff`
    pub fn list_synced_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<i64>> {
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare("SELECT show_id FROM shows WHERE synced_at < ?1 ORDER BY show_id")
            .during("preparing stale show listing")?;
        let ids = stmt
            .query_map(params![cutoff], |row| row.get(0))
            .during("listing stale shows")?
            .collect::<std::result::Result<Vec<i64>, _>>()
            .during("reading stale show ids")?;
        Ok(ids)
    }

    /// Number of stored shows
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM shows", [], |row| row.get(0))
            .during("counting shows")?;
        Ok(count as usize)
    }
}

/// Raw row before JSON columns are decoded
struct ShowRow {
    show_id: i64,
    name: String,
    overview: String,
    status: String,
    tagline: String,
    poster_path: Option<String>,
    genres: String,
    number_of_seasons: u32,
    number_of_episodes: u32,
    seasons: String,
    created_at: DateTime<Utc>,
    synced_at: DateTime<Utc>,
}

fn read_row(row: &rusqlite::Row) -> rusqlite::Result<ShowRow> {
    Ok(ShowRow {
        show_id: row.get(0)?,
        name: row.get(1)?,
        overview: row.get(2)?,
        status: row.get(3)?,
        tagline: row.get(4)?,
        poster_path: row.get(5)?,
        genres: row.get(6)?,
        number_of_seasons: row.get(7)?,
        number_of_episodes: row.get(8)?,
        seasons: row.get(9)?,
        created_at: row.get(10)?,
        synced_at: row.get(11)?,
    })
}

fn decode(row: ShowRow) -> Result<ShowCatalogEntry> {
    Ok(ShowCatalogEntry {
        show_id: row.show_id,
        name: row.name,
        overview: row.overview,
        status: row.status,
        tagline: row.tagline,
        poster_path: row.poster_path,
        genres: serde_json::from_str(&row.genres)?,
        number_of_seasons: row.number_of_seasons,
        number_of_episodes: row.number_of_episodes,
        seasons: serde_json::from_str(&row.seasons)?,
        created_at: row.created_at,
        synced_at: row.synced_at,
    })
}
