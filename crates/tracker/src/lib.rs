//! Show tracker engine.
//!
//! Reconciles per-user watch state with a show catalog that is lazily
//! materialized from, and periodically re-synced with, an external content
//! database. The stores are opened once and handed to each component; the
//! [`Tracker`] facade wires them together for the CLI.

pub mod marks;
pub mod materializer;
pub mod progress;
pub mod stats;
pub mod sync;

#[cfg(test)]
mod testing;

pub use marks::{SeasonMark, WatchMarks};
pub use materializer::CatalogMaterializer;
pub use progress::{NextEpisode, ProgressCalculator, ShowDetail, ShowProgress};
pub use stats::{ActivityItem, EpisodeActivity, MovieActivity, StatsCalculator, UserStats};
pub use sync::{BackfillReport, CatalogSync, ShowSyncResult, SyncOutcome, SyncRunSummary};

use shared::models::{Movie, ShowCatalogEntry, User, WatchedMovie, WatchedShow};
use shared::source::CatalogSource;
use shared::{CatalogStore, Config, Database, MovieStore, Removal, Result, UserStore, WatchStateStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Every engine operation behind one handle
#[derive(Clone)]
pub struct Tracker {
    users: UserStore,
    catalog: CatalogStore,
    watch_state: WatchStateStore,
    materializer: CatalogMaterializer,
    marks: WatchMarks,
    progress: ProgressCalculator,
    stats: StatsCalculator,
    sync: CatalogSync,
}

impl Tracker {
    pub fn new(db: Database, source: Arc<dyn CatalogSource>, config: &Config) -> Self {
        let users = UserStore::new(db.clone());
        let catalog = CatalogStore::new(db.clone());
        let watch_state = WatchStateStore::new(db.clone());
        let movies = MovieStore::new(db);

        let materializer = CatalogMaterializer::new(catalog.clone(), movies.clone(), source.clone());
        let marks = WatchMarks::new(materializer.clone(), watch_state.clone(), movies.clone());
        let progress = ProgressCalculator::new(catalog.clone(), watch_state.clone());
        let stats = StatsCalculator::new(
            catalog.clone(),
            watch_state.clone(),
            movies.clone(),
            config.stats.recent_limit,
        );
        let sync = CatalogSync::new(
            catalog.clone(),
            movies,
            watch_state.clone(),
            materializer.clone(),
            source,
            config.sync.clone(),
        );

        Self {
            users,
            catalog,
            watch_state,
            materializer,
            marks,
            progress,
            stats,
            sync,
        }
    }

    // Users

    pub fn register_user(&self, username: &str) -> Result<User> {
        self.users.register(username)
    }

    pub fn resolve_user(&self, username: &str) -> Result<User> {
        self.users.resolve(username)
    }

    pub fn find_user(&self, username: &str) -> Result<Option<User>> {
        self.users.find_by_username(username)
    }

    // Catalog

    pub async fn ensure_catalog(&self, show_id: i64) -> Result<ShowCatalogEntry> {
        self.materializer.ensure_catalog(show_id).await
    }

    pub async fn ensure_movie(&self, movie_id: i64) -> Result<Movie> {
        self.materializer.ensure_movie(movie_id).await
    }

    /// Materialized show with each episode flagged for `user_id` (all
    /// unwatched without a user)
    pub async fn show_detail(&self, show_id: i64, user_id: Option<&str>) -> Result<ShowDetail> {
        let entry = self.materializer.ensure_catalog(show_id).await?;
        let watched = match user_id {
            Some(user_id) => self.watch_state.find(user_id, show_id)?,
            None => None,
        };
        Ok(progress::annotate(&entry, watched.as_ref()))
    }

    pub fn catalog_size(&self) -> Result<usize> {
        self.catalog.count()
    }

    // Watch marks

    pub async fn mark_episode_watched(
        &self,
        user_id: &str,
        show_id: i64,
        season_number: u32,
        episode_number: u32,
    ) -> Result<WatchedShow> {
        self.marks
            .mark_episode_watched(user_id, show_id, season_number, episode_number)
            .await
    }

    pub async fn mark_season_watched(&self, user_id: &str, show_id: i64, season_number: u32) -> Result<SeasonMark> {
        self.marks.mark_season_watched(user_id, show_id, season_number).await
    }

    pub fn unmark_episode(
        &self,
        user_id: &str,
        show_id: i64,
        season_number: u32,
        episode_number: u32,
    ) -> Result<Removal> {
        self.marks
            .unmark_episode(user_id, show_id, season_number, episode_number)
    }

    pub fn unmark_show(&self, user_id: &str, show_id: i64) -> Result<()> {
        self.marks.unmark_show(user_id, show_id)
    }

    pub async fn mark_movie_watched(&self, user_id: &str, movie_id: i64) -> Result<WatchedMovie> {
        self.marks.mark_movie_watched(user_id, movie_id).await
    }

    pub fn unmark_movie(&self, user_id: &str, movie_id: i64) -> Result<()> {
        self.marks.unmark_movie(user_id, movie_id)
    }

    pub fn watch_state(&self, user_id: &str, show_id: i64) -> Result<Option<WatchedShow>> {
        self.watch_state.find(user_id, show_id)
    }

    // Progress and statistics

    pub fn compute_progress(&self, user_id: &str) -> Result<Vec<ShowProgress>> {
        self.progress.compute_progress(user_id)
    }

    pub fn compute_stats(&self, user_id: &str) -> Result<UserStats> {
        self.stats.compute_stats(user_id)
    }

    pub fn episode_timeline(&self, user_id: &str) -> Result<Vec<EpisodeActivity>> {
        self.stats.episode_timeline(user_id)
    }

    pub fn movie_timeline(&self, user_id: &str) -> Result<Vec<MovieActivity>> {
        self.stats.movie_timeline(user_id)
    }

    // Sync

    pub async fn sync_show(&self, show_id: i64) -> Result<ShowSyncResult> {
        self.sync.sync_show(show_id).await
    }

    pub async fn resync_show(&self, show_id: i64) -> Result<ShowSyncResult> {
        self.sync.resync_show(show_id).await
    }

    pub async fn sync_all(&self) -> Result<SyncRunSummary> {
        self.sync.sync_all().await
    }

    /// Full sync every `period` until `shutdown` resolves; returns completed runs
    pub async fn sync_periodically<F>(
        &self,
        period: Duration,
        shutdown: F,
        on_run: impl FnMut(SyncRunSummary),
    ) -> Result<usize>
    where
        F: Future<Output = ()>,
    {
        self.sync.sync_periodically(period, shutdown, on_run).await
    }

    pub async fn backfill(&self) -> Result<BackfillReport> {
        self.sync.backfill().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FakeSource};
    use shared::{Missing, TrackerError};

    #[tokio::test]
    async fn test_users() -> anyhow::Result<()> {
        let (_dir, tracker) = testing::tracker(FakeSource::new())?;

        let user = tracker.register_user("alice")?;
        assert_eq!(tracker.resolve_user("alice")?.user_id, user.user_id);
        assert!(tracker.find_user("bob")?.is_none());
        assert!(matches!(
            tracker.resolve_user("bob"),
            Err(TrackerError::NotFound(Missing::User(_)))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_show_detail_without_user() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Ended", &[(1, &[1, 2])]);
        let (_dir, tracker) = testing::tracker(source)?;

        tracker.mark_episode_watched("u1", 1, 1, 1).await?;

        let anonymous = tracker.show_detail(1, None).await?;
        assert!(anonymous.seasons[0].episodes.iter().all(|e| !e.watched));

        let other = tracker.show_detail(1, Some("u2")).await?;
        assert!(other.seasons[0].episodes.iter().all(|e| !e.watched));

        Ok(())
    }

    #[tokio::test]
    async fn test_movie_timeline() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_movie(1, "First", 90);
        source.add_movie(2, "Second", 100);
        let (_dir, tracker) = testing::tracker(source)?;

        tracker.mark_movie_watched("u1", 1).await?;
        tracker.mark_movie_watched("u1", 2).await?;

        let timeline = tracker.movie_timeline("u1")?;
        assert_eq!(timeline.iter().map(|m| m.movie_id).collect::<Vec<_>>(), vec![2, 1]);

        Ok(())
    }
}
