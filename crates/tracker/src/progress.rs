//! Progress derived by joining watch state against the catalog.
//!
//! Both sides are keyed by `(season_number, episode_number)`. Nothing here
//! writes; the functions that do the joining are pure so they can be tested
//! without a store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::models::{ShowCatalogEntry, WatchedShow};
use shared::{CatalogStore, Result, WatchStateStore};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::warn;

/// First catalog episode without a watch record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextEpisode {
    pub season_number: u32,
    pub episode_number: u32,
    pub episode_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShowProgress {
    pub show_id: i64,
    pub show_name: String,
    pub poster_path: Option<String>,
    pub status: String,
    pub total_episodes: u32,
    /// Timestamped records, orphans included
    pub watched_episodes: u32,
    pub percent_complete: f64,
    pub next_episode: Option<NextEpisode>,
    pub is_completed: bool,
}

impl ShowProgress {
    fn ratio(&self) -> f64 {
        if self.total_episodes == 0 {
            0.0
        } else {
            self.watched_episodes as f64 / self.total_episodes as f64
        }
    }
}

/// Progress of one show for one user
pub fn progress_for(entry: &ShowCatalogEntry, watched: &WatchedShow) -> ShowProgress {
    let watched_episodes = watched.watched_count();
    let total_episodes = entry.number_of_episodes;
    let watched_keys = watched.watched_keys();

    let next_episode = entry
        .ordered_seasons()
        .into_iter()
        .filter(|s| s.season_number > 0)
        .flat_map(|season| {
            let season_number = season.season_number;
            season.episodes.into_iter().map(move |e| (season_number, e))
        })
        .find(|(season_number, e)| !watched_keys.contains(&(*season_number, e.episode_number)))
        .map(|(season_number, e)| NextEpisode {
            season_number,
            episode_number: e.episode_number,
            episode_name: e.name,
        });

    let mut progress = ShowProgress {
        show_id: entry.show_id,
        show_name: entry.name.clone(),
        poster_path: entry.poster_path.clone(),
        status: entry.status.clone(),
        total_episodes,
        watched_episodes,
        percent_complete: 0.0,
        next_episode,
        is_completed: total_episodes > 0 && watched_episodes >= total_episodes,
    };
    progress.percent_complete = progress.ratio() * 100.0;
    progress
}

/// Incomplete shows by descending completion (empty catalogs last), then
/// completed shows by name
pub fn sort_progress(progress: &mut [ShowProgress]) {
    progress.sort_by(|a, b| match (a.is_completed, b.is_completed) {
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (true, true) => a.show_name.cmp(&b.show_name),
        (false, false) => (a.total_episodes == 0)
            .cmp(&(b.total_episodes == 0))
            .then_with(|| b.ratio().partial_cmp(&a.ratio()).unwrap_or(Ordering::Equal))
            .then_with(|| a.show_name.cmp(&b.show_name)),
    });
}

/// Catalog episode annotated with the user's watch record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeDetail {
    pub episode_number: u32,
    pub name: String,
    pub overview: String,
    pub runtime: u32,
    pub watched: bool,
    pub watched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonDetail {
    pub season_number: u32,
    pub name: String,
    pub overview: String,
    pub episode_count: u32,
    pub air_date: String,
    pub episodes: Vec<EpisodeDetail>,
}

/// Catalog entry as shown to one user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShowDetail {
    pub show_id: i64,
    pub name: String,
    pub overview: String,
    pub status: String,
    pub tagline: String,
    pub poster_path: Option<String>,
    pub genres: Vec<String>,
    pub number_of_seasons: u32,
    pub number_of_episodes: u32,
    pub seasons: Vec<SeasonDetail>,
}

pub fn annotate(entry: &ShowCatalogEntry, watched: Option<&WatchedShow>) -> ShowDetail {
    let seasons = entry
        .ordered_seasons()
        .into_iter()
        .map(|season| {
            let season_number = season.season_number;
            SeasonDetail {
                episodes: season
                    .episodes
                    .into_iter()
                    .map(|e| {
                        let watched_at =
                            watched.and_then(|w| w.watched_at(season_number, e.episode_number));
                        EpisodeDetail {
                            episode_number: e.episode_number,
                            name: e.name,
                            overview: e.overview,
                            runtime: e.runtime,
                            watched: watched_at.is_some(),
                            watched_at,
                        }
                    })
                    .collect(),
                season_number,
                name: season.name,
                overview: season.overview,
                episode_count: season.episode_count,
                air_date: season.air_date,
            }
        })
        .collect();

    ShowDetail {
        show_id: entry.show_id,
        name: entry.name.clone(),
        overview: entry.overview.clone(),
        status: entry.status.clone(),
        tagline: entry.tagline.clone(),
        poster_path: entry.poster_path.clone(),
        genres: entry.genres.clone(),
        number_of_seasons: entry.number_of_seasons,
        number_of_episodes: entry.number_of_episodes,
        seasons,
    }
}

/// Read-only join of both stores
#[derive(Clone)]
pub struct ProgressCalculator {
    catalog: CatalogStore,
    watch_state: WatchStateStore,
}

impl ProgressCalculator {
    pub fn new(catalog: CatalogStore, watch_state: WatchStateStore) -> Self {
        Self { catalog, watch_state }
    }

    /// One row per show the user has watch state for, sorted for display
    pub fn compute_progress(&self, user_id: &str) -> Result<Vec<ShowProgress>> {
        let entries = self.watch_state.find_for_user(user_id)?;
        let show_ids: Vec<i64> = entries.iter().map(|e| e.show_id).collect();
        let catalog: HashMap<i64, ShowCatalogEntry> = self
            .catalog
            .find_many(&show_ids)?
            .into_iter()
            .map(|entry| (entry.show_id, entry))
            .collect();

        let mut progress = Vec::with_capacity(entries.len());
        for watched in &entries {
            match catalog.get(&watched.show_id) {
                Some(entry) => progress.push(progress_for(entry, watched)),
                None => warn!(
                    user_id,
                    show_id = watched.show_id,
                    "Watch entry has no catalog entry, skipping"
                ),
            }
        }

        sort_progress(&mut progress);
        Ok(progress)
    }
}
