//! Data models for the tracker.
//!
//! Two aggregates live side by side: the show catalog (metadata as last
//! fetched from the content database) and per-user watch state. They are
//! joined at read time by `(show_id, season_number, episode_number)` and
//! never embedded in one another.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One episode as listed by the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub episode_number: u32,
    pub name: String,
    #[serde(default)]
    pub overview: String,
    /// Minutes, 0 when unknown
    #[serde(default)]
    pub runtime: u32,
}

/// One season of a show (specials are never stored)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub season_number: u32,
    pub name: String,
    #[serde(default)]
    pub overview: String,
    pub episode_count: u32,
    #[serde(default)]
    pub air_date: String,
    #[serde(default)]
    pub episodes: Vec<Episode>,
}

impl Season {
    /// Episode numbers declared for this season, ascending
    pub fn episode_numbers(&self) -> Vec<u32> {
        let mut numbers: Vec<u32> = self.episodes.iter().map(|e| e.episode_number).collect();
        numbers.sort_unstable();
        numbers.dedup();
        numbers
    }

    pub fn episode(&self, episode_number: u32) -> Option<&Episode> {
        self.episodes.iter().find(|e| e.episode_number == episode_number)
    }
}

/// Show metadata as known at last fetch or sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowCatalogEntry {
    pub show_id: i64,
    pub name: String,
    pub overview: String,
    pub status: String,
    pub tagline: String,
    pub poster_path: Option<String>,
    pub genres: Vec<String>,
    pub number_of_seasons: u32,
    pub number_of_episodes: u32,
    pub seasons: Vec<Season>,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

impl ShowCatalogEntry {
    pub fn season(&self, season_number: u32) -> Option<&Season> {
        self.seasons.iter().find(|s| s.season_number == season_number)
    }

    pub fn episode(&self, season_number: u32, episode_number: u32) -> Option<&Episode> {
        self.season(season_number)
            .and_then(|s| s.episode(episode_number))
    }

    /// Seasons by ascending number, each with episodes by ascending number
    pub fn ordered_seasons(&self) -> Vec<Season> {
        let mut seasons = self.seasons.clone();
        seasons.sort_by_key(|s| s.season_number);
        for season in &mut seasons {
            season.episodes.sort_by_key(|e| e.episode_number);
        }
        seasons
    }
}

/// One watched episode; the timestamp is the watched signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedEpisode {
    pub episode_number: u32,
    pub watched_at: Option<DateTime<Utc>>,
}

impl WatchedEpisode {
    /// Records without a timestamp count as not watched
    pub fn is_watched(&self) -> bool {
        self.watched_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedSeason {
    pub season_number: u32,
    pub episodes: Vec<WatchedEpisode>,
}

impl WatchedSeason {
    pub fn contains(&self, episode_number: u32) -> bool {
        self.episodes.iter().any(|e| e.episode_number == episode_number)
    }
}

/// One user's watch history for one show
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedShow {
    pub user_id: String,
    pub show_id: i64,
    pub seasons: Vec<WatchedSeason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WatchedShow {
    pub fn season(&self, season_number: u32) -> Option<&WatchedSeason> {
        self.seasons.iter().find(|s| s.season_number == season_number)
    }

    /// Number of records carrying a timestamp, orphans included
    pub fn watched_count(&self) -> u32 {
        self.seasons
            .iter()
            .flat_map(|s| s.episodes.iter())
            .filter(|e| e.is_watched())
            .count() as u32
    }

    /// `(season_number, episode_number)` of every timestamped record
    pub fn watched_keys(&self) -> HashSet<(u32, u32)> {
        self.seasons
            .iter()
            .flat_map(|s| {
                s.episodes
                    .iter()
                    .filter(|e| e.is_watched())
                    .map(move |e| (s.season_number, e.episode_number))
            })
            .collect()
    }

    pub fn watched_at(&self, season_number: u32, episode_number: u32) -> Option<DateTime<Utc>> {
        self.season(season_number)?
            .episodes
            .iter()
            .find(|e| e.episode_number == episode_number)?
            .watched_at
    }
}

/// Movie metadata (the single-episode degenerate case of a show)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub movie_id: i64,
    pub title: String,
    pub overview: String,
    pub genres: Vec<String>,
    pub release_date: String,
    pub poster_path: Option<String>,
    pub runtime: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedMovie {
    pub user_id: String,
    pub movie_id: i64,
    pub watched_at: DateTime<Utc>,
}

/// External identity; only the username → user_id mapping matters here
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(n: u32) -> Episode {
        Episode {
            episode_number: n,
            name: format!("Episode {}", n),
            overview: String::new(),
            runtime: 30,
        }
    }

    #[test]
    fn test_ordered_seasons() {
        let entry = ShowCatalogEntry {
            show_id: 1,
            name: "Show".to_string(),
            overview: String::new(),
            status: "Ended".to_string(),
            tagline: String::new(),
            poster_path: None,
            genres: vec![],
            number_of_seasons: 2,
            number_of_episodes: 3,
            seasons: vec![
                Season {
                    season_number: 2,
                    name: "Season 2".to_string(),
                    overview: String::new(),
                    episode_count: 1,
                    air_date: String::new(),
                    episodes: vec![episode(1)],
                },
                Season {
                    season_number: 1,
                    name: "Season 1".to_string(),
                    overview: String::new(),
                    episode_count: 2,
                    air_date: String::new(),
                    episodes: vec![episode(2), episode(1)],
                },
            ],
            created_at: Utc::now(),
            synced_at: Utc::now(),
        };

        let ordered = entry.ordered_seasons();
        assert_eq!(ordered[0].season_number, 1);
        assert_eq!(ordered[0].episode_numbers(), vec![1, 2]);
        assert_eq!(ordered[0].episodes[0].episode_number, 1);
        assert_eq!(entry.episode(2, 1).map(|e| e.runtime), Some(30));
    }

    #[test]
    fn test_untimestamped_records_are_not_watched() {
        let now = Utc::now();
        let watched = WatchedShow {
            user_id: "u1".to_string(),
            show_id: 1,
            seasons: vec![WatchedSeason {
                season_number: 1,
                episodes: vec![
                    WatchedEpisode { episode_number: 1, watched_at: Some(now) },
                    WatchedEpisode { episode_number: 2, watched_at: None },
                ],
            }],
            created_at: now,
            updated_at: now,
        };

        assert_eq!(watched.watched_count(), 1);
        assert!(watched.watched_keys().contains(&(1, 1)));
        assert!(!watched.watched_keys().contains(&(1, 2)));
        assert!(watched.season(1).map(|s| s.contains(2)).unwrap_or(false));
    }
}
