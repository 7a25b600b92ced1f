//! Scripted catalog source and fixtures for engine tests.

use crate::Tracker;
use async_trait::async_trait;
use shared::config::Config;
use shared::models::Episode;
use shared::source::{CatalogSource, SourceMovie, SourceSeason, SourceSeasonSummary, SourceShow};
use shared::{Database, Result, TrackerError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const EPISODE_RUNTIME: u32 = 45;

/// In-memory source; every fetch yields once so concurrent callers interleave
#[derive(Default)]
pub struct FakeSource {
    shows: Mutex<HashMap<i64, SourceShow>>,
    seasons: Mutex<HashMap<(i64, u32), SourceSeason>>,
    movies: Mutex<HashMap<i64, SourceMovie>>,
    failing_seasons: Mutex<HashSet<(i64, u32)>>,
    unavailable: AtomicBool,
    missing_key: AtomicBool,
    show_fetches: AtomicUsize,
    season_fetches: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script a show from `(season_number, episode_numbers)` pairs
    ///
    /// A specials season 0 is always listed and never scripted, so fetching
    /// it would fail.
    pub fn add_show(&self, show_id: i64, name: &str, status: &str, layout: &[(u32, &[u32])]) {
        let mut summaries = vec![SourceSeasonSummary {
            season_number: 0,
            name: "Specials".to_string(),
            overview: String::new(),
            episode_count: 2,
            air_date: String::new(),
        }];

        let mut seasons = self.seasons.lock().unwrap();
        for (season_number, episode_numbers) in layout {
            summaries.push(SourceSeasonSummary {
                season_number: *season_number,
                name: format!("Season {}", season_number),
                overview: String::new(),
                episode_count: episode_numbers.len() as u32,
                air_date: "2020-01-01".to_string(),
            });
            seasons.insert(
                (show_id, *season_number),
                SourceSeason {
                    season_number: *season_number,
                    name: format!("Season {}", season_number),
                    overview: String::new(),
                    air_date: "2020-01-01".to_string(),
                    episodes: episode_numbers
                        .iter()
                        .map(|n| Episode {
                            episode_number: *n,
                            name: format!("S{}E{}", season_number, n),
                            overview: String::new(),
                            runtime: EPISODE_RUNTIME,
                        })
                        .collect(),
                },
            );
        }

        self.shows.lock().unwrap().insert(
            show_id,
            SourceShow {
                show_id,
                name: name.to_string(),
                overview: String::new(),
                genres: vec!["Drama".to_string()],
                status: status.to_string(),
                tagline: String::new(),
                number_of_seasons: layout.len() as u32,
                number_of_episodes: layout.iter().map(|(_, eps)| eps.len() as u32).sum(),
                poster_path: Some(format!("/{}.jpg", show_id)),
                seasons: summaries,
            },
        );
    }

    pub fn add_movie(&self, movie_id: i64, title: &str, runtime: u32) {
        self.movies.lock().unwrap().insert(
            movie_id,
            SourceMovie {
                movie_id,
                title: title.to_string(),
                overview: String::new(),
                genres: vec!["Action".to_string()],
                release_date: "1999-03-31".to_string(),
                poster_path: None,
                runtime,
            },
        );
    }

    pub fn fail_season(&self, show_id: i64, season_number: u32) {
        self.failing_seasons.lock().unwrap().insert((show_id, season_number));
    }

    pub fn heal_season(&self, show_id: i64, season_number: u32) {
        self.failing_seasons.lock().unwrap().remove(&(show_id, season_number));
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_missing_key(&self, missing: bool) {
        self.missing_key.store(missing, Ordering::SeqCst);
    }

    pub fn show_fetches(&self) -> usize {
        self.show_fetches.load(Ordering::SeqCst)
    }

    pub fn season_fetches(&self) -> usize {
        self.season_fetches.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.missing_key.load(Ordering::SeqCst) {
            return Err(TrackerError::Configuration("no TMDB API key".to_string()));
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TrackerError::SourceUnavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogSource for FakeSource {
    async fn fetch_show(&self, show_id: i64) -> Result<SourceShow> {
        self.show_fetches.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.check_reachable()?;

        self.shows
            .lock()
            .unwrap()
            .get(&show_id)
            .cloned()
            .ok_or_else(|| TrackerError::SourceUnavailable(format!("/tv/{} returned 404", show_id)))
    }

    async fn fetch_season(&self, show_id: i64, season_number: u32) -> Result<SourceSeason> {
        self.season_fetches.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.check_reachable()?;

        if self.failing_seasons.lock().unwrap().contains(&(show_id, season_number)) {
            return Err(TrackerError::SourceUnavailable("503 Service Unavailable".to_string()));
        }

        self.seasons
            .lock()
            .unwrap()
            .get(&(show_id, season_number))
            .cloned()
            .ok_or_else(|| {
                TrackerError::SourceUnavailable(format!(
                    "/tv/{}/season/{} returned 404",
                    show_id, season_number
                ))
            })
    }

    async fn fetch_movie(&self, movie_id: i64) -> Result<SourceMovie> {
        tokio::task::yield_now().await;
        self.check_reachable()?;

        self.movies
            .lock()
            .unwrap()
            .get(&movie_id)
            .cloned()
            .ok_or_else(|| TrackerError::SourceUnavailable(format!("/movie/{} returned 404", movie_id)))
    }
}

/// Config with no pauses between fetches
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.sync.show_delay_ms = 0;
    config.sync.season_delay_ms = 0;
    config
}

/// Tracker over a fresh database; keep the `TempDir` alive for the test
pub fn tracker(source: Arc<FakeSource>) -> anyhow::Result<(TempDir, Tracker)> {
    let (temp_dir, _, tracker) = tracker_with_db(source)?;
    Ok((temp_dir, tracker))
}

/// Same as [`tracker`], also handing out the database for direct store access
pub fn tracker_with_db(source: Arc<FakeSource>) -> anyhow::Result<(TempDir, Database, Tracker)> {
    let temp_dir = TempDir::new()?;
    let db = Database::open(temp_dir.path().join("tracker.db"))?;
    let tracker = Tracker::new(db.clone(), source, &test_config());
    Ok((temp_dir, db, tracker))
}
