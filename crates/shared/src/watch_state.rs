//! Watch-state store.
//!
//! A watch entry is a header row in `watched_shows` plus one row per watched
//! episode in `watched_episodes`. Marking an episode only ever inserts its
//! own row, so concurrent marks of different episodes cannot overwrite each
//! other, and the primary key rejects a second mark of the same episode.

use crate::db::Database;
use crate::error::{is_unique_violation, Missing, StorageContext, TrackerError};
use crate::models::{WatchedEpisode, WatchedSeason, WatchedShow};
use crate::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use tracing::debug;

/// Result of removing one watched episode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// Episode removed, the entry still has other episodes
    Episode(WatchedShow),
    /// The last episode was removed and the entry with it
    EntryRemoved,
}

/// Repository for per-user watch history
#[derive(Debug, Clone)]
pub struct WatchStateStore {
    db: Database,
}

impl WatchStateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Load one user's entry for one show
    pub fn find(&self, user_id: &str, show_id: i64) -> Result<Option<WatchedShow>> {
        let conn = self.db.conn();
        load_entry(&conn, user_id, show_id)
    }

    /// Load every entry of a user, ordered by show id
    pub fn find_for_user(&self, user_id: &str) -> Result<Vec<WatchedShow>> {
        let conn = self.db.conn();

        let headers = {
            let mut stmt = conn
                .prepare(
                    "SELECT show_id, created_at, updated_at FROM watched_shows
                     WHERE user_id = ?1 ORDER BY show_id",
                )
                .during("preparing watch entry listing")?;
            let headers = stmt
                .query_map(params![user_id], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get(1)?, row.get(2)?))
                })
                .during("listing watch entries")?
                .collect::<std::result::Result<Vec<(i64, DateTime<Utc>, DateTime<Utc>)>, _>>()
                .during("reading watch entries")?;
            headers
        };

        let mut episodes: BTreeMap<i64, Vec<(u32, u32, Option<DateTime<Utc>>)>> = BTreeMap::new();
        {
            let mut stmt = conn
                .prepare(
                    "SELECT show_id, season_number, episode_number, watched_at
                     FROM watched_episodes WHERE user_id = ?1",
                )
                .during("preparing watched episode listing")?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, Option<DateTime<Utc>>>(3)?,
                    ))
                })
                .during("listing watched episodes")?;
            for row in rows {
                let (show_id, season, episode, watched_at) = row.during("reading watched episode")?;
                episodes.entry(show_id).or_default().push((season, episode, watched_at));
            }
        }

        Ok(headers
            .into_iter()
            .map(|(show_id, created_at, updated_at)| {
                let rows = episodes.remove(&show_id).unwrap_or_default();
                assemble(user_id, show_id, created_at, updated_at, rows)
            })
            .collect())
    }

    /// Ids of every show referenced by any user's watch state
    pub fn referenced_show_ids(&self) -> Result<Vec<i64>> {
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare("SELECT DISTINCT show_id FROM watched_shows ORDER BY show_id")
            .during("preparing referenced show listing")?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .during("listing referenced shows")?
            .collect::<std::result::Result<Vec<i64>, _>>()
            .during("reading referenced shows")?;
        Ok(ids)
    }

    /// Record one episode; `AlreadyWatched` if it is already recorded
    pub fn insert_episode(
        &self,
        user_id: &str,
        show_id: i64,
        season_number: u32,
        episode_number: u32,
        watched_at: DateTime<Utc>,
    ) -> Result<WatchedShow> {
        let mut conn = self.db.conn();
        let tx = conn.transaction().during("beginning mark transaction")?;

        ensure_header(&tx, user_id, show_id, watched_at)?;

        match tx.execute(
            "INSERT INTO watched_episodes (user_id, show_id, season_number, episode_number, watched_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, show_id, season_number, episode_number, watched_at],
        ) {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                // Transaction rolls back on drop
                debug!(user_id, show_id, season_number, episode_number, "Episode already watched");
                return Err(TrackerError::AlreadyWatched);
            }
            Err(e) => return Err(e).during("inserting watched episode"),
        }

        let entry = load_entry(&tx, user_id, show_id)?
            .ok_or_else(|| TrackerError::NotFound(Missing::WatchEntry {
                user_id: user_id.to_string(),
                show_id,
            }))?;
        tx.commit().during("committing mark")?;

        Ok(entry)
    }

    /// Record several episodes of one season with one shared timestamp
    ///
    /// Episodes already present are skipped. Returns the number actually
    /// inserted along with the resulting entry.
    pub fn insert_episodes(
        &self,
        user_id: &str,
        show_id: i64,
        season_number: u32,
        episode_numbers: &[u32],
        watched_at: DateTime<Utc>,
    ) -> Result<(usize, WatchedShow)> {
        let mut conn = self.db.conn();
        let tx = conn.transaction().during("beginning season mark transaction")?;

        ensure_header(&tx, user_id, show_id, watched_at)?;

        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO watched_episodes
                        (user_id, show_id, season_number, episode_number, watched_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .during("preparing season mark")?;
            for episode_number in episode_numbers {
                inserted += stmt
                    .execute(params![user_id, show_id, season_number, episode_number, watched_at])
                    .during("inserting watched episode")?;
            }
        }

        if inserted == 0 {
            // Leave no empty header behind
            drop(tx);
            return Err(TrackerError::NothingToMark);
        }

        let entry = load_entry(&tx, user_id, show_id)?
            .ok_or_else(|| TrackerError::NotFound(Missing::WatchEntry {
                user_id: user_id.to_string(),
                show_id,
            }))?;
        tx.commit().during("committing season mark")?;

        Ok((inserted, entry))
    }

    /// Remove one watched episode, dropping the entry when it becomes empty
    pub fn remove_episode(
        &self,
        user_id: &str,
        show_id: i64,
        season_number: u32,
        episode_number: u32,
    ) -> Result<Removal> {
        let mut conn = self.db.conn();
        let tx = conn.transaction().during("beginning unmark transaction")?;

        let removed = tx
            .execute(
                "DELETE FROM watched_episodes
                 WHERE user_id = ?1 AND show_id = ?2 AND season_number = ?3 AND episode_number = ?4",
                params![user_id, show_id, season_number, episode_number],
            )
            .during("deleting watched episode")?;

        if removed == 0 {
            return Err(TrackerError::NotFound(Missing::WatchedEpisode {
                user_id: user_id.to_string(),
                show_id,
                season_number,
                episode_number,
            }));
        }

        let remaining: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM watched_episodes WHERE user_id = ?1 AND show_id = ?2",
                params![user_id, show_id],
                |row| row.get(0),
            )
            .during("counting remaining episodes")?;

        let outcome = if remaining == 0 {
            tx.execute(
                "DELETE FROM watched_shows WHERE user_id = ?1 AND show_id = ?2",
                params![user_id, show_id],
            )
            .during("deleting empty watch entry")?;
            Removal::EntryRemoved
        } else {
            tx.execute(
                "UPDATE watched_shows SET updated_at = ?3 WHERE user_id = ?1 AND show_id = ?2",
                params![user_id, show_id, Utc::now()],
            )
            .during("touching watch entry")?;
            let entry = load_entry(&tx, user_id, show_id)?
                .ok_or_else(|| TrackerError::NotFound(Missing::WatchEntry {
                    user_id: user_id.to_string(),
                    show_id,
                }))?;
            Removal::Episode(entry)
        };

        tx.commit().during("committing unmark")?;
        Ok(outcome)
    }

    /// Remove a user's whole entry for a show
    pub fn remove_entry(&self, user_id: &str, show_id: i64) -> Result<()> {
        let removed = self
            .db
            .conn()
            .execute(
                "DELETE FROM watched_shows WHERE user_id = ?1 AND show_id = ?2",
                params![user_id, show_id],
            )
            .during("deleting watch entry")?;

        if removed == 0 {
            return Err(TrackerError::NotFound(Missing::WatchEntry {
                user_id: user_id.to_string(),
                show_id,
            }));
        }
        Ok(())
    }
}

fn ensure_header(conn: &Connection, user_id: &str, show_id: i64, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO watched_shows (user_id, show_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT (user_id, show_id) DO UPDATE SET updated_at = excluded.updated_at",
        params![user_id, show_id, now],
    )
    .during("upserting watch entry")?;
    Ok(())
}

fn load_entry(conn: &Connection, user_id: &str, show_id: i64) -> Result<Option<WatchedShow>> {
    let header: Option<(DateTime<Utc>, DateTime<Utc>)> = conn
        .query_row(
            "SELECT created_at, updated_at FROM watched_shows WHERE user_id = ?1 AND show_id = ?2",
            params![user_id, show_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .during("looking up watch entry")?;

    let Some((created_at, updated_at)) = header else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "SELECT season_number, episode_number, watched_at FROM watched_episodes
             WHERE user_id = ?1 AND show_id = ?2",
        )
        .during("preparing watched episode lookup")?;
    let rows = stmt
        .query_map(params![user_id, show_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .during("loading watched episodes")?
        .collect::<std::result::Result<Vec<(u32, u32, Option<DateTime<Utc>>)>, _>>()
        .during("reading watched episodes")?;

    Ok(Some(assemble(user_id, show_id, created_at, updated_at, rows)))
}

/// Group flat episode rows into seasons, both ascending
fn assemble(
    user_id: &str,
    show_id: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    rows: Vec<(u32, u32, Option<DateTime<Utc>>)>,
) -> WatchedShow {
    let mut seasons: BTreeMap<u32, Vec<WatchedEpisode>> = BTreeMap::new();
    for (season_number, episode_number, watched_at) in rows {
        seasons
            .entry(season_number)
            .or_default()
            .push(WatchedEpisode { episode_number, watched_at });
    }

    WatchedShow {
        user_id: user_id.to_string(),
        show_id,
        seasons: seasons
            .into_iter()
            .map(|(season_number, mut episodes)| {
                episodes.sort_by_key(|e| e.episode_number);
                WatchedSeason { season_number, episodes }
            })
            .collect(),
        created_at,
        updated_at,
    }
}
