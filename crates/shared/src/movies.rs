//! Movie catalog and per-user watched movies.

use crate::db::Database;
use crate::error::{is_unique_violation, Missing, StorageContext, TrackerError};
use crate::models::{Movie, WatchedMovie};
use crate::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct MovieStore {
    db: Database,
}

impl MovieStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn find(&self, movie_id: i64) -> Result<Option<Movie>> {
        let row = self
            .db
            .conn()
            .query_row(
                "SELECT movie_id, title, overview, genres, release_date, poster_path, runtime, created_at
                 FROM movies WHERE movie_id = ?1",
                params![movie_id],
                read_movie,
            )
            .optional()
            .during("looking up movie")?;

        row.map(decode_movie).transpose()
    }

    pub fn find_many(&self, movie_ids: &[i64]) -> Result<Vec<Movie>> {
        if movie_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT movie_id, title, overview, genres, release_date, poster_path, runtime, created_at
             FROM movies WHERE movie_id IN ({}) ORDER BY movie_id",
            vec!["?"; movie_ids.len()].join(", ")
        );

        let rows = {
            let conn = self.db.conn();
            let mut stmt = conn.prepare(&sql).during("preparing bulk movie lookup")?;
            let rows = stmt
                .query_map(params_from_iter(movie_ids.iter()), read_movie)
                .during("loading movies")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .during("reading movie rows")?;
            rows
        };

        rows.into_iter().map(decode_movie).collect()
    }

    /// Insert a movie; `Conflict` when another writer got there first
    pub fn insert(&self, movie: &Movie) -> Result<()> {
        let genres = serde_json::to_string(&movie.genres)?;

        match self.db.conn().execute(
            "INSERT INTO movies (movie_id, title, overview, genres, release_date, poster_path, runtime, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                movie.movie_id,
                movie.title,
                movie.overview,
                genres,
                movie.release_date,
                movie.poster_path,
                movie.runtime,
                movie.created_at,
            ],
        ) {
            Ok(_) => {
                info!(movie_id = movie.movie_id, title = %movie.title, "Created movie entry");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                Err(TrackerError::Conflict(format!("movie {} already in catalog", movie.movie_id)))
            }
            Err(e) => Err(e).during("inserting movie"),
        }
    }

    /// Record a watched movie; `AlreadyWatched` on a second mark
    pub fn insert_watched(&self, user_id: &str, movie_id: i64, watched_at: DateTime<Utc>) -> Result<WatchedMovie> {
        match self.db.conn().execute(
            "INSERT INTO watched_movies (user_id, movie_id, watched_at) VALUES (?1, ?2, ?3)",
            params![user_id, movie_id, watched_at],
        ) {
            Ok(_) => {
                debug!(user_id, movie_id, "Movie marked as watched");
                Ok(WatchedMovie {
                    user_id: user_id.to_string(),
                    movie_id,
                    watched_at,
                })
            }
            Err(e) if is_unique_violation(&e) => Err(TrackerError::AlreadyWatched),
            Err(e) => Err(e).during("inserting watched movie"),
        }
    }

    pub fn remove_watched(&self, user_id: &str, movie_id: i64) -> Result<()> {
        let removed = self
            .db
            .conn()
            .execute(
                "DELETE FROM watched_movies WHERE user_id = ?1 AND movie_id = ?2",
                params![user_id, movie_id],
            )
            .during("deleting watched movie")?;

        if removed == 0 {
            return Err(TrackerError::NotFound(Missing::WatchedMovie {
                user_id: user_id.to_string(),
                movie_id,
            }));
        }
        Ok(())
    }

    /// A user's watched movies, most recent first
    pub fn watched_for_user(&self, user_id: &str) -> Result<Vec<WatchedMovie>> {
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare(
                "SELECT movie_id, watched_at FROM watched_movies
                 WHERE user_id = ?1 ORDER BY watched_at DESC",
            )
            .during("preparing watched movie listing")?;
        let watched = stmt
            .query_map(params![user_id], |row| {
                Ok(WatchedMovie {
                    user_id: user_id.to_string(),
                    movie_id: row.get(0)?,
                    watched_at: row.get(1)?,
                })
            })
            .during("listing watched movies")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .during("reading watched movies")?;
        Ok(watched)
    }

    /// Ids of every movie referenced by any user's watch state
    pub fn referenced_movie_ids(&self) -> Result<Vec<i64>> {
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare("SELECT DISTINCT movie_id FROM watched_movies ORDER BY movie_id")
            .during("preparing referenced movie listing")?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .during("listing referenced movies")?
            .collect::<std::result::Result<Vec<i64>, _>>()
            .during("reading referenced movies")?;
        Ok(ids)
    }
}

struct MovieRow {
    movie_id: i64,
    title: String,
    overview: String,
    genres: String,
    release_date: String,
    poster_path: Option<String>,
    runtime: u32,
    created_at: DateTime<Utc>,
}

fn read_movie(row: &rusqlite::Row) -> rusqlite::Result<MovieRow> {
    Ok(MovieRow {
        movie_id: row.get(0)?,
        title: row.get(1)?,
        overview: row.get(2)?,
        genres: row.get(3)?,
        release_date: row.get(4)?,
        poster_path: row.get(5)?,
        runtime: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn decode_movie(row: MovieRow) -> Result<Movie> {
    Ok(Movie {
        movie_id: row.movie_id,
        title: row.title,
        overview: row.overview,
        genres: serde_json::from_str(&row.genres)?,
        release_date: row.release_date,
        poster_path: row.poster_path,
        runtime: row.runtime,
        created_at: row.created_at,
    })
}
