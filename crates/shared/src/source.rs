//! The upstream content database as seen by the engine.
//!
//! Implementations own transport, authentication and rate limiting; every
//! failure reaches the engine as `SourceUnavailable` or `Configuration`.

use crate::models::Episode;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Season as listed on the show record (no episodes)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSeasonSummary {
    pub season_number: u32,
    pub name: String,
    pub overview: String,
    pub episode_count: u32,
    pub air_date: String,
}

/// Show metadata plus its season list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceShow {
    pub show_id: i64,
    pub name: String,
    pub overview: String,
    pub genres: Vec<String>,
    pub status: String,
    pub tagline: String,
    pub number_of_seasons: u32,
    pub number_of_episodes: u32,
    pub poster_path: Option<String>,
    pub seasons: Vec<SourceSeasonSummary>,
}

impl SourceShow {
    /// Season list without specials (season 0)
    pub fn regular_seasons(&self) -> impl Iterator<Item = &SourceSeasonSummary> {
        self.seasons.iter().filter(|s| s.season_number > 0)
    }
}

/// One season with its episodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSeason {
    pub season_number: u32,
    pub name: String,
    pub overview: String,
    pub air_date: String,
    pub episodes: Vec<Episode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMovie {
    pub movie_id: i64,
    pub title: String,
    pub overview: String,
    pub genres: Vec<String>,
    pub release_date: String,
    pub poster_path: Option<String>,
    pub runtime: u32,
}

/// Fetcher capability over the external content database
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Show metadata and season list
    async fn fetch_show(&self, show_id: i64) -> Result<SourceShow>;

    /// Episodes of one season
    async fn fetch_season(&self, show_id: i64, season_number: u32) -> Result<SourceSeason>;

    /// Movie metadata
    async fn fetch_movie(&self, movie_id: i64) -> Result<SourceMovie>;
}
