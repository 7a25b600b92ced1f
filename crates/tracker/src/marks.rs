//! Watch-mark engine.
//!
//! Marks are guarded by catalog existence and reject duplicates instead of
//! succeeding silently, so a retrying caller can tell "already applied" apart
//! from "applied now".

use crate::materializer::CatalogMaterializer;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::models::{WatchedMovie, WatchedShow};
use shared::{Missing, MovieStore, Removal, Result, TrackerError, WatchStateStore};
use std::collections::HashSet;
use tracing::info;

/// Outcome of a season-batch mark
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonMark {
    /// Episodes recorded by this call, ascending
    pub episodes_marked: Vec<u32>,
    /// Timestamp shared by every episode recorded by this call
    pub watched_at: DateTime<Utc>,
    pub state: WatchedShow,
}

#[derive(Clone)]
pub struct WatchMarks {
    materializer: CatalogMaterializer,
    watch_state: WatchStateStore,
    movies: MovieStore,
}

impl WatchMarks {
    pub fn new(materializer: CatalogMaterializer, watch_state: WatchStateStore, movies: MovieStore) -> Self {
        Self {
            materializer,
            watch_state,
            movies,
        }
    }

    pub async fn mark_episode_watched(
        &self,
        user_id: &str,
        show_id: i64,
        season_number: u32,
        episode_number: u32,
    ) -> Result<WatchedShow> {
        self.materializer.ensure_catalog(show_id).await?;

        let state = self.watch_state.insert_episode(
            user_id,
            show_id,
            season_number,
            episode_number,
            Utc::now(),
        )?;

        info!(user_id, show_id, season_number, episode_number, "Episode marked as watched");
        Ok(state)
    }

    /// Mark every catalog episode of a season the user has no record for
    pub async fn mark_season_watched(&self, user_id: &str, show_id: i64, season_number: u32) -> Result<SeasonMark> {
        let entry = self.materializer.ensure_catalog(show_id).await?;
        let season = entry.season(season_number).ok_or(TrackerError::NotFound(Missing::Season {
            show_id,
            season_number,
        }))?;

        let already: HashSet<u32> = self
            .watch_state
            .find(user_id, show_id)?
            .and_then(|state| {
                state
                    .season(season_number)
                    .map(|s| s.episodes.iter().map(|e| e.episode_number).collect())
            })
            .unwrap_or_default();

        let pending: Vec<u32> = season
            .episode_numbers()
            .into_iter()
            .filter(|n| !already.contains(n))
            .collect();

        if pending.is_empty() {
            return Err(TrackerError::NothingToMark);
        }

        let now = Utc::now();
        let (inserted, state) = self
            .watch_state
            .insert_episodes(user_id, show_id, season_number, &pending, now)?;

        // A concurrent mark may have taken some of them
        let episodes_marked: Vec<u32> = state
            .season(season_number)
            .map(|s| {
                s.episodes
                    .iter()
                    .filter(|e| e.watched_at == Some(now) && pending.contains(&e.episode_number))
                    .map(|e| e.episode_number)
                    .collect()
            })
            .unwrap_or_default();

        info!(user_id, show_id, season_number, inserted, "Season marked as watched");
        Ok(SeasonMark {
            episodes_marked,
            watched_at: now,
            state,
        })
    }

    /// Remove one watched episode; the entry goes away with its last episode
    pub fn unmark_episode(
        &self,
        user_id: &str,
        show_id: i64,
        season_number: u32,
        episode_number: u32,
    ) -> Result<Removal> {
        let removal = self
            .watch_state
            .remove_episode(user_id, show_id, season_number, episode_number)?;

        if removal == Removal::EntryRemoved {
            info!(user_id, show_id, "Last episode unwatched, entry removed");
        } else {
            info!(user_id, show_id, season_number, episode_number, "Episode unwatched");
        }
        Ok(removal)
    }

    pub fn unmark_show(&self, user_id: &str, show_id: i64) -> Result<()> {
        self.watch_state.remove_entry(user_id, show_id)?;
        info!(user_id, show_id, "Show unwatched");
        Ok(())
    }

    pub async fn mark_movie_watched(&self, user_id: &str, movie_id: i64) -> Result<WatchedMovie> {
        self.materializer.ensure_movie(movie_id).await?;
        let watched = self.movies.insert_watched(user_id, movie_id, Utc::now())?;
        info!(user_id, movie_id, "Movie marked as watched");
        Ok(watched)
    }

    pub fn unmark_movie(&self, user_id: &str, movie_id: i64) -> Result<()> {
        self.movies.remove_watched(user_id, movie_id)?;
        info!(user_id, movie_id, "Movie unwatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{self, FakeSource};
    use shared::{Missing, Removal, TrackerError};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_second_mark_is_rejected() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1399, "Game of Thrones", "Ended", &[(1, &[1, 2, 3])]);
        let (_dir, tracker) = testing::tracker(source)?;

        tracker.mark_episode_watched("u1", 1399, 1, 1).await?;
        let err = tracker.mark_episode_watched("u1", 1399, 1, 1).await.unwrap_err();
        assert!(matches!(err, TrackerError::AlreadyWatched));
        assert!(err.is_already_applied());

        let state = tracker.watch_state("u1", 1399)?.expect("entry exists");
        assert_eq!(state.season(1).map(|s| s.episodes.len()), Some(1));

        Ok(())
    }

    #[tokio::test]
    async fn test_mark_requires_catalog() -> anyhow::Result<()> {
        let source = FakeSource::new();
        let (_dir, tracker) = testing::tracker(source)?;

        assert!(matches!(
            tracker.mark_episode_watched("u1", 42, 1, 1).await,
            Err(TrackerError::SourceUnavailable(_))
        ));
        assert!(tracker.watch_state("u1", 42)?.is_none());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_marks_of_same_episode() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Ended", &[(1, &[1, 2, 3, 4, 5, 6])]);
        let (_dir, tracker) = testing::tracker(source)?;
        let tracker = Arc::new(tracker);

        // Six callers on one episode, six more on distinct episodes
        let mut handles = Vec::new();
        for episode in std::iter::repeat(1).take(6).chain(1..=6) {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                tracker.mark_episode_watched("u1", 1, 1, episode).await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await? {
                Ok(_) => succeeded += 1,
                Err(TrackerError::AlreadyWatched) => {}
                Err(e) => return Err(e.into()),
            }
        }

        // Exactly one winner per distinct episode, no lost writes
        assert_eq!(succeeded, 6);
        let state = tracker.watch_state("u1", 1)?.expect("entry exists");
        assert_eq!(state.watched_count(), 6);

        Ok(())
    }

    #[tokio::test]
    async fn test_season_mark_fills_gaps_with_one_timestamp() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Ended", &[(1, &[1, 2, 3]), (2, &[1, 2])]);
        let (_dir, tracker) = testing::tracker(source)?;

        let before = tracker.mark_episode_watched("u1", 1, 1, 2).await?;
        let earlier = before.watched_at(1, 2);

        let mark = tracker.mark_season_watched("u1", 1, 1).await?;
        assert_eq!(mark.episodes_marked, vec![1, 3]);

        let state = mark.state;
        assert_eq!(state.watched_at(1, 1), Some(mark.watched_at));
        assert_eq!(state.watched_at(1, 3), Some(mark.watched_at));
        assert_eq!(state.watched_at(1, 2), earlier);
        assert!(state.season(2).is_none());

        assert!(matches!(
            tracker.mark_season_watched("u1", 1, 1).await,
            Err(TrackerError::NothingToMark)
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_season_mark_unknown_season() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Ended", &[(1, &[1])]);
        let (_dir, tracker) = testing::tracker(source)?;

        assert!(matches!(
            tracker.mark_season_watched("u1", 1, 0).await,
            Err(TrackerError::NotFound(Missing::Season { season_number: 0, .. }))
        ));
        assert!(matches!(
            tracker.mark_season_watched("u1", 1, 7).await,
            Err(TrackerError::NotFound(Missing::Season { season_number: 7, .. }))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_unmark_last_episode_removes_entry() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Ended", &[(1, &[1, 2])]);
        let (_dir, tracker) = testing::tracker(source)?;

        tracker.mark_episode_watched("u1", 1, 1, 1).await?;
        tracker.mark_episode_watched("u1", 1, 1, 2).await?;

        assert!(matches!(tracker.unmark_episode("u1", 1, 1, 1)?, Removal::Episode(_)));
        assert_eq!(tracker.unmark_episode("u1", 1, 1, 2)?, Removal::EntryRemoved);
        assert!(tracker.watch_state("u1", 1)?.is_none());
        assert!(tracker.compute_progress("u1")?.is_empty());

        assert!(matches!(
            tracker.unmark_episode("u1", 1, 1, 2),
            Err(TrackerError::NotFound(Missing::WatchedEpisode { .. }))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_unmark_show() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Ended", &[(1, &[1, 2])]);
        let (_dir, tracker) = testing::tracker(source)?;

        tracker.mark_season_watched("u1", 1, 1).await?;
        tracker.unmark_show("u1", 1)?;
        assert!(tracker.watch_state("u1", 1)?.is_none());
        assert!(matches!(
            tracker.unmark_show("u1", 1),
            Err(TrackerError::NotFound(Missing::WatchEntry { .. }))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_movie_marks() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_movie(603, "The Matrix", 136);
        let (_dir, tracker) = testing::tracker(source)?;

        tracker.mark_movie_watched("u1", 603).await?;
        assert!(matches!(
            tracker.mark_movie_watched("u1", 603).await,
            Err(TrackerError::AlreadyWatched)
        ));

        tracker.unmark_movie("u1", 603)?;
        assert!(matches!(
            tracker.unmark_movie("u1", 603),
            Err(TrackerError::NotFound(Missing::WatchedMovie { .. }))
        ));

        Ok(())
    }
}
