//! Aggregate statistics and activity timelines.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::models::{Movie, ShowCatalogEntry};
use shared::{CatalogStore, MovieStore, Result, WatchStateStore};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeActivity {
    pub show_id: i64,
    pub show_name: String,
    pub poster_path: Option<String>,
    pub season_number: u32,
    pub episode_number: u32,
    pub episode_name: String,
    /// 0 for episodes no longer in the catalog
    pub runtime: u32,
    pub watched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieActivity {
    pub movie_id: i64,
    pub title: String,
    pub poster_path: Option<String>,
    pub runtime: u32,
    pub watched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityItem {
    Episode(EpisodeActivity),
    Movie(MovieActivity),
}

impl ActivityItem {
    pub fn watched_at(&self) -> DateTime<Utc> {
        match self {
            ActivityItem::Episode(e) => e.watched_at,
            ActivityItem::Movie(m) => m.watched_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStats {
    pub movies_watched: usize,
    pub shows_watched: usize,
    pub episodes_watched: u32,
    pub total_movie_minutes: u64,
    pub total_show_minutes: u64,
    pub recent_activity: Vec<ActivityItem>,
}

#[derive(Clone)]
pub struct StatsCalculator {
    catalog: CatalogStore,
    watch_state: WatchStateStore,
    movies: MovieStore,
    recent_limit: usize,
}

impl StatsCalculator {
    pub fn new(catalog: CatalogStore, watch_state: WatchStateStore, movies: MovieStore, recent_limit: usize) -> Self {
        Self {
            catalog,
            watch_state,
            movies,
            recent_limit,
        }
    }

    pub fn compute_stats(&self, user_id: &str) -> Result<UserStats> {
        let entries = self.watch_state.find_for_user(user_id)?;
        let episodes_watched: u32 = entries.iter().map(|e| e.watched_count()).sum();

        let episodes = self.episode_timeline(user_id)?;
        let movies = self.movie_timeline(user_id)?;

        let total_show_minutes: u64 = episodes.iter().map(|e| e.runtime as u64).sum();
        let total_movie_minutes: u64 = movies.iter().map(|m| m.runtime as u64).sum();
        let movies_watched = self.movies.watched_for_user(user_id)?.len();

        let mut recent_activity: Vec<ActivityItem> = episodes
            .into_iter()
            .map(ActivityItem::Episode)
            .chain(movies.into_iter().map(ActivityItem::Movie))
            .collect();
        recent_activity.sort_by(|a, b| b.watched_at().cmp(&a.watched_at()));
        recent_activity.truncate(self.recent_limit);

        debug!(user_id, episodes_watched, movies_watched, "Computed user statistics");

        Ok(UserStats {
            movies_watched,
            shows_watched: entries.len(),
            episodes_watched,
            total_movie_minutes,
            total_show_minutes,
            recent_activity,
        })
    }

    /// Every timestamped episode record joined to its catalog, newest first
    ///
    /// Shows without a catalog entry are skipped; orphaned episodes keep a
    /// generated name and count zero minutes.
    pub fn episode_timeline(&self, user_id: &str) -> Result<Vec<EpisodeActivity>> {
        let entries = self.watch_state.find_for_user(user_id)?;
        let show_ids: Vec<i64> = entries.iter().map(|e| e.show_id).collect();
        let catalog: HashMap<i64, ShowCatalogEntry> = self
            .catalog
            .find_many(&show_ids)?
            .into_iter()
            .map(|entry| (entry.show_id, entry))
            .collect();

        let mut timeline = Vec::new();
        for watched in &entries {
            let Some(show) = catalog.get(&watched.show_id) else {
                continue;
            };

            for season in &watched.seasons {
                for record in &season.episodes {
                    let Some(watched_at) = record.watched_at else {
                        continue;
                    };
                    let episode = show.episode(season.season_number, record.episode_number);

                    timeline.push(EpisodeActivity {
                        show_id: show.show_id,
                        show_name: show.name.clone(),
                        poster_path: show.poster_path.clone(),
                        season_number: season.season_number,
                        episode_number: record.episode_number,
                        episode_name: episode
                            .map(|e| e.name.clone())
                            .unwrap_or_else(|| format!("Episode {}", record.episode_number)),
                        runtime: episode.map(|e| e.runtime).unwrap_or(0),
                        watched_at,
                    });
                }
            }
        }

        timeline.sort_by(|a, b| b.watched_at.cmp(&a.watched_at));
        Ok(timeline)
    }

    /// Watched movies present in the catalog, newest first
    pub fn movie_timeline(&self, user_id: &str) -> Result<Vec<MovieActivity>> {
        let watched = self.movies.watched_for_user(user_id)?;
        let movie_ids: Vec<i64> = watched.iter().map(|w| w.movie_id).collect();
        let movies: HashMap<i64, Movie> = self
            .movies
            .find_many(&movie_ids)?
            .into_iter()
            .map(|movie| (movie.movie_id, movie))
            .collect();

        Ok(watched
            .into_iter()
            .filter_map(|w| {
                movies.get(&w.movie_id).map(|movie| MovieActivity {
                    movie_id: movie.movie_id,
                    title: movie.title.clone(),
                    poster_path: movie.poster_path.clone(),
                    runtime: movie.runtime,
                    watched_at: w.watched_at,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FakeSource, EPISODE_RUNTIME};

    #[tokio::test]
    async fn test_stats_sum_joined_runtimes() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Ended", &[(1, &[1, 2, 3])]);
        source.add_movie(603, "The Matrix", 136);
        let (_dir, tracker) = testing::tracker(source)?;

        tracker.mark_episode_watched("u1", 1, 1, 1).await?;
        tracker.mark_episode_watched("u1", 1, 1, 2).await?;
        // Not in the catalog: counted, zero minutes
        tracker.mark_episode_watched("u1", 1, 4, 1).await?;
        tracker.mark_movie_watched("u1", 603).await?;

        let stats = tracker.compute_stats("u1")?;
        assert_eq!(stats.shows_watched, 1);
        assert_eq!(stats.episodes_watched, 3);
        assert_eq!(stats.movies_watched, 1);
        assert_eq!(stats.total_show_minutes, 2 * EPISODE_RUNTIME as u64);
        assert_eq!(stats.total_movie_minutes, 136);
        assert_eq!(stats.recent_activity.len(), 4);

        // Newest first; the movie was marked last
        assert!(matches!(stats.recent_activity[0], ActivityItem::Movie(_)));
        assert!(stats
            .recent_activity
            .windows(2)
            .all(|pair| pair[0].watched_at() >= pair[1].watched_at()));

        Ok(())
    }

    #[tokio::test]
    async fn test_recent_activity_is_bounded() -> anyhow::Result<()> {
        let source = FakeSource::new();
        let episodes: Vec<u32> = (1..=12).collect();
        source.add_show(1, "Long", "Ended", &[(1, &episodes[..])]);
        let (_dir, tracker) = testing::tracker(source)?;

        tracker.mark_season_watched("u1", 1, 1).await?;

        let stats = tracker.compute_stats("u1")?;
        assert_eq!(stats.episodes_watched, 12);
        assert_eq!(stats.recent_activity.len(), 10);

        Ok(())
    }

    #[tokio::test]
    async fn test_episode_timeline_names_orphans() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Ended", &[(1, &[1])]);
        let (_dir, tracker) = testing::tracker(source)?;

        tracker.mark_episode_watched("u1", 1, 1, 1).await?;
        tracker.mark_episode_watched("u1", 1, 2, 5).await?;

        let timeline = tracker.episode_timeline("u1")?;
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].episode_name, "Episode 5");
        assert_eq!(timeline[0].runtime, 0);
        assert_eq!(timeline[1].episode_name, "S1E1");

        Ok(())
    }

    #[test]
    fn test_activity_serializes_with_kind() -> anyhow::Result<()> {
        let item = ActivityItem::Movie(MovieActivity {
            movie_id: 603,
            title: "The Matrix".to_string(),
            poster_path: None,
            runtime: 136,
            watched_at: Utc::now(),
        });

        let json = serde_json::to_value(&item)?;
        assert_eq!(json["kind"], "movie");
        assert_eq!(json["movie_id"], 603);

        Ok(())
    }
}
