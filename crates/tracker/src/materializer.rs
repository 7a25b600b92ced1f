//! Lazy catalog materialization.
//!
//! A miss fetches the show and its regular seasons from the source and
//! inserts the result. The store's primary key on `show_id` decides which
//! of several concurrent first accesses wins; the others re-read the winner's
//! row instead of failing.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use shared::models::{Movie, Season, ShowCatalogEntry};
use shared::source::{CatalogSource, SourceSeasonSummary, SourceShow};
use shared::{CatalogStore, Missing, MovieStore, Result, TrackerError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ensures shows and movies exist in the catalog
#[derive(Clone)]
pub struct CatalogMaterializer {
    catalog: CatalogStore,
    movies: MovieStore,
    source: Arc<dyn CatalogSource>,
}

impl CatalogMaterializer {
    pub fn new(catalog: CatalogStore, movies: MovieStore, source: Arc<dyn CatalogSource>) -> Self {
        Self {
            catalog,
            movies,
            source,
        }
    }

    /// Return the stored entry, fetching and inserting it on first access
    pub async fn ensure_catalog(&self, show_id: i64) -> Result<ShowCatalogEntry> {
        if let Some(entry) = self.catalog.find(show_id)? {
            return Ok(entry);
        }

        info!(show_id, "Catalog miss, materializing show");
        let entry = self.fetch_entry(show_id).await?;

        match self.catalog.insert(&entry) {
            Ok(()) => {}
            Err(TrackerError::Conflict(_)) => {
                debug!(show_id, "Show materialized concurrently, re-reading");
            }
            Err(e) => return Err(e),
        }

        self.catalog
            .find(show_id)?
            .ok_or(TrackerError::NotFound(Missing::Show(show_id)))
    }

    /// Fetch a show with every regular season; a failed season becomes an
    /// empty placeholder carrying its declared episode count
    async fn fetch_entry(&self, show_id: i64) -> Result<ShowCatalogEntry> {
        let show = self.source.fetch_show(show_id).await?;

        let fetches = show.regular_seasons().map(|summary| async move {
            let fetched = self.source.fetch_season(show_id, summary.season_number).await;
            (summary, fetched)
        });

        let mut seasons = Vec::new();
        for (summary, fetched) in join_all(fetches).await {
            match fetched {
                Ok(season) => seasons.push(Season {
                    season_number: summary.season_number,
                    name: summary.name.clone(),
                    overview: summary.overview.clone(),
                    episode_count: summary.episode_count,
                    air_date: summary.air_date.clone(),
                    episodes: season.episodes,
                }),
                Err(e @ TrackerError::Configuration(_)) => return Err(e),
                Err(e) => {
                    warn!(
                        show_id,
                        season_number = summary.season_number,
                        error = %e,
                        "Season fetch failed, storing placeholder"
                    );
                    seasons.push(placeholder_season(summary));
                }
            }
        }

        Ok(build_entry(show, seasons, Utc::now()))
    }

    /// Movie counterpart of `ensure_catalog`
    pub async fn ensure_movie(&self, movie_id: i64) -> Result<Movie> {
        if let Some(movie) = self.movies.find(movie_id)? {
            return Ok(movie);
        }

        info!(movie_id, "Movie miss, materializing");
        let fetched = self.source.fetch_movie(movie_id).await?;
        let movie = Movie {
            movie_id: fetched.movie_id,
            title: fetched.title,
            overview: fetched.overview,
            genres: fetched.genres,
            release_date: fetched.release_date,
            poster_path: fetched.poster_path,
            runtime: fetched.runtime,
            created_at: Utc::now(),
        };

        match self.movies.insert(&movie) {
            Ok(()) => {}
            Err(TrackerError::Conflict(_)) => {
                debug!(movie_id, "Movie materialized concurrently, re-reading");
            }
            Err(e) => return Err(e),
        }

        self.movies
            .find(movie_id)?
            .ok_or(TrackerError::NotFound(Missing::Movie(movie_id)))
    }
}

fn placeholder_season(summary: &SourceSeasonSummary) -> Season {
    Season {
        season_number: summary.season_number,
        name: summary.name.clone(),
        overview: summary.overview.clone(),
        episode_count: summary.episode_count,
        air_date: summary.air_date.clone(),
        episodes: Vec::new(),
    }
}

/// Catalog entry from source metadata and already-assembled seasons
pub(crate) fn build_entry(show: SourceShow, seasons: Vec<Season>, now: DateTime<Utc>) -> ShowCatalogEntry {
    ShowCatalogEntry {
        show_id: show.show_id,
        name: show.name,
        overview: show.overview,
        status: show.status,
        tagline: show.tagline,
        poster_path: show.poster_path,
        genres: show.genres,
        number_of_seasons: show.number_of_seasons,
        number_of_episodes: show.number_of_episodes,
        seasons,
        created_at: now,
        synced_at: now,
    }
}
