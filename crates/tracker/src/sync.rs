//! Catalog sync.
//!
//! Re-fetches stored shows and replaces the whole catalog entry when its
//! structure or status drifted. Watch state lives in separate tables keyed by
//! `(show_id, season_number, episode_number)`, so a replace never touches it.
//! Also hosts the backfill run that materializes shows and movies referenced
//! by watch records but missing from the catalog.

use crate::materializer::{build_entry, CatalogMaterializer};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use shared::config::SyncConfig;
use shared::models::{Season, ShowCatalogEntry};
use shared::source::{CatalogSource, SourceShow};
use shared::{CatalogStore, Missing, MovieStore, Result, TrackerError, WatchStateStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Updated,
    Unchanged,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShowSyncResult {
    pub show_id: i64,
    pub show_name: String,
    pub outcome: SyncOutcome,
    pub previous_seasons: u32,
    pub current_seasons: u32,
    pub previous_episodes: u32,
    pub current_episodes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ShowSyncResult {
    fn failed(stored: &ShowCatalogEntry, error: &TrackerError) -> Self {
        Self {
            show_id: stored.show_id,
            show_name: stored.name.clone(),
            outcome: SyncOutcome::Error,
            previous_seasons: stored.number_of_seasons,
            current_seasons: stored.number_of_seasons,
            previous_episodes: stored.number_of_episodes,
            current_episodes: stored.number_of_episodes,
            error: Some(error.to_string()),
        }
    }
}

/// Run-level counts plus one result per visited show
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncRunSummary {
    pub total: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errors: usize,
    pub results: Vec<ShowSyncResult>,
}

impl SyncRunSummary {
    fn record(&mut self, result: ShowSyncResult) {
        match result.outcome {
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Unchanged => self.unchanged += 1,
            SyncOutcome::Error => self.errors += 1,
        }
        self.results.push(result);
    }
}

/// Statistics for a backfill run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub shows_missing: usize,
    pub shows_created: usize,
    pub movies_missing: usize,
    pub movies_created: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct CatalogSync {
    catalog: CatalogStore,
    movies: MovieStore,
    watch_state: WatchStateStore,
    materializer: CatalogMaterializer,
    source: Arc<dyn CatalogSource>,
    settings: SyncConfig,
}

impl CatalogSync {
    pub fn new(
        catalog: CatalogStore,
        movies: MovieStore,
        watch_state: WatchStateStore,
        materializer: CatalogMaterializer,
        source: Arc<dyn CatalogSource>,
        settings: SyncConfig,
    ) -> Self {
        Self {
            catalog,
            movies,
            watch_state,
            materializer,
            source,
            settings,
        }
    }

    /// Refresh one stored show, replacing it only when it drifted
    pub async fn sync_show(&self, show_id: i64) -> Result<ShowSyncResult> {
        let stored = self.stored(show_id)?;
        self.refresh(&stored, false).await
    }

    /// Refresh one stored show and overwrite it even when nothing drifted
    pub async fn resync_show(&self, show_id: i64) -> Result<ShowSyncResult> {
        let stored = self.stored(show_id)?;
        self.refresh(&stored, true).await
    }

    /// Refresh every stored show (or only stale ones when configured)
    ///
    /// Per-show failures are recorded in the summary; only a configuration
    /// error aborts the run.
    pub async fn sync_all(&self) -> Result<SyncRunSummary> {
        let show_ids = match self.settings.stale_after_seconds {
            Some(seconds) => match stale_cutoff(Utc::now(), seconds) {
                Some(cutoff) => self.catalog.list_synced_before(cutoff)?,
                None => self.catalog.list_ids()?,
            },
            None => self.catalog.list_ids()?,
        };

        info!(shows = show_ids.len(), "Starting catalog sync");

        let mut summary = SyncRunSummary {
            total: show_ids.len(),
            ..Default::default()
        };

        for (idx, show_id) in show_ids.iter().enumerate() {
            if idx > 0 {
                self.pause(self.settings.show_delay_ms).await;
            }

            info!(
                progress = format!("{}/{}", idx + 1, show_ids.len()),
                show_id,
                "Syncing show"
            );

            let Some(stored) = self.catalog.find(*show_id)? else {
                continue;
            };

            match self.refresh(&stored, false).await {
                Ok(result) => summary.record(result),
                Err(e @ TrackerError::Configuration(_)) => return Err(e),
                Err(e) => {
                    error!(show_id, error = %e, "Failed to sync show");
                    summary.record(ShowSyncResult::failed(&stored, &e));
                }
            }
        }

        info!(
            total = summary.total,
            updated = summary.updated,
            unchanged = summary.unchanged,
            errors = summary.errors,
            "Catalog sync complete"
        );

        Ok(summary)
    }

    /// Run [`sync_all`](Self::sync_all) every `period` until `shutdown` resolves
    ///
    /// Shutdown is also observed while a run is in flight; the run is dropped
    /// between storage calls and keeps whatever shows it already refreshed.
    /// Returns the number of completed runs.
    pub async fn sync_periodically<F>(
        &self,
        period: Duration,
        shutdown: F,
        mut on_run: impl FnMut(SyncRunSummary),
    ) -> Result<usize>
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(period);
        let mut completed = 0;
        tokio::pin!(shutdown);

        info!(period_secs = period.as_secs(), "Starting periodic sync");

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = &mut shutdown => break,
            }

            tokio::select! {
                result = self.sync_all() => match result {
                    Ok(summary) => {
                        completed += 1;
                        on_run(summary);
                    }
                    Err(e @ TrackerError::Configuration(_)) => return Err(e),
                    Err(e) => error!(error = %e, "Sync run failed"),
                },
                _ = &mut shutdown => {
                    warn!("Shutdown requested during a sync run, stopping");
                    break;
                }
            }
        }

        info!(runs = completed, "Periodic sync stopped");
        Ok(completed)
    }

    /// Materialize every show and movie that has watch records but no catalog entry
    pub async fn backfill(&self) -> Result<BackfillReport> {
        let mut report = BackfillReport::default();

        let referenced = self.watch_state.referenced_show_ids()?;
        let present: Vec<i64> = self
            .catalog
            .find_many(&referenced)?
            .into_iter()
            .map(|entry| entry.show_id)
            .collect();
        let missing_shows: Vec<i64> = referenced.into_iter().filter(|id| !present.contains(id)).collect();

        let referenced = self.movies.referenced_movie_ids()?;
        let present: Vec<i64> = self
            .movies
            .find_many(&referenced)?
            .into_iter()
            .map(|movie| movie.movie_id)
            .collect();
        let missing_movies: Vec<i64> = referenced.into_iter().filter(|id| !present.contains(id)).collect();

        report.shows_missing = missing_shows.len();
        report.movies_missing = missing_movies.len();
        info!(
            shows = report.shows_missing,
            movies = report.movies_missing,
            "Starting catalog backfill"
        );

        for (idx, show_id) in missing_shows.iter().enumerate() {
            if idx > 0 {
                self.pause(self.settings.show_delay_ms).await;
            }
            match self.materializer.ensure_catalog(*show_id).await {
                Ok(_) => report.shows_created += 1,
                Err(e @ TrackerError::Configuration(_)) => return Err(e),
                Err(e) => {
                    warn!(show_id, error = %e, "Failed to backfill show");
                    report.failed += 1;
                    report.errors.push(format!("show {}: {}", show_id, e));
                }
            }
        }

        for (idx, movie_id) in missing_movies.iter().enumerate() {
            if idx > 0 || !missing_shows.is_empty() {
                self.pause(self.settings.show_delay_ms).await;
            }
            match self.materializer.ensure_movie(*movie_id).await {
                Ok(_) => report.movies_created += 1,
                Err(e @ TrackerError::Configuration(_)) => return Err(e),
                Err(e) => {
                    warn!(movie_id, error = %e, "Failed to backfill movie");
                    report.failed += 1;
                    report.errors.push(format!("movie {}: {}", movie_id, e));
                }
            }
        }

        info!(
            shows_created = report.shows_created,
            movies_created = report.movies_created,
            failed = report.failed,
            "Catalog backfill complete"
        );

        Ok(report)
    }

    fn stored(&self, show_id: i64) -> Result<ShowCatalogEntry> {
        self.catalog
            .find(show_id)?
            .ok_or(TrackerError::NotFound(Missing::Show(show_id)))
    }

    /// Fetch the show and its seasons, then replace or touch the stored entry
    ///
    /// Source failures become an `Error` outcome and leave the entry as is;
    /// a half-fetched season list is never written over a complete one.
    async fn refresh(&self, stored: &ShowCatalogEntry, force: bool) -> Result<ShowSyncResult> {
        let show_id = stored.show_id;

        let show = match self.source.fetch_show(show_id).await {
            Ok(show) => show,
            Err(e @ TrackerError::Configuration(_)) => return Err(e),
            Err(e) => {
                warn!(show_id, error = %e, "Show fetch failed during sync");
                return Ok(ShowSyncResult::failed(stored, &e));
            }
        };

        let seasons = match self.fetch_seasons(&show).await {
            Ok(seasons) => seasons,
            Err(e @ TrackerError::Configuration(_)) => return Err(e),
            Err(e) => {
                warn!(show_id, error = %e, "Season fetch failed during sync");
                return Ok(ShowSyncResult::failed(stored, &e));
            }
        };

        let drifted = has_drifted(stored, &show, seasons.len());
        let mut result = ShowSyncResult {
            show_id,
            show_name: show.name.clone(),
            outcome: SyncOutcome::Unchanged,
            previous_seasons: stored.number_of_seasons,
            current_seasons: show.number_of_seasons,
            previous_episodes: stored.number_of_episodes,
            current_episodes: show.number_of_episodes,
            error: None,
        };

        let now = Utc::now();
        if drifted || force {
            let mut entry = build_entry(show, seasons, now);
            entry.created_at = stored.created_at;
            self.catalog.replace(&entry)?;
            result.outcome = SyncOutcome::Updated;
            info!(
                show_id,
                previous_seasons = result.previous_seasons,
                current_seasons = result.current_seasons,
                previous_episodes = result.previous_episodes,
                current_episodes = result.current_episodes,
                forced = force && !drifted,
                "Catalog entry updated"
            );
        } else {
            self.catalog.touch(show_id, now)?;
            info!(show_id, "Catalog entry unchanged");
        }

        Ok(result)
    }

    /// Every regular season in order; the first failure aborts
    async fn fetch_seasons(&self, show: &SourceShow) -> Result<Vec<Season>> {
        let mut seasons = Vec::new();

        for (idx, summary) in show.regular_seasons().enumerate() {
            if idx > 0 {
                self.pause(self.settings.season_delay_ms).await;
            }

            let fetched = self
                .source
                .fetch_season(show.show_id, summary.season_number)
                .await?;

            seasons.push(Season {
                season_number: summary.season_number,
                name: fetched.name,
                overview: fetched.overview,
                episode_count: fetched.episodes.len() as u32,
                air_date: fetched.air_date,
                episodes: fetched.episodes,
            });
        }

        Ok(seasons)
    }

    async fn pause(&self, millis: u64) {
        if millis > 0 {
            sleep(Duration::from_millis(millis)).await;
        }
    }
}

/// Entries synced before this instant are stale; `None` when the window
/// reaches past what a timestamp can express, so every entry counts
fn stale_cutoff(now: DateTime<Utc>, stale_after_seconds: u64) -> Option<DateTime<Utc>> {
    let seconds = i64::try_from(stale_after_seconds).ok()?;
    now.checked_sub_signed(ChronoDuration::try_seconds(seconds)?)
}

/// Whether the source disagrees with the stored entry on structure or status
fn has_drifted(stored: &ShowCatalogEntry, show: &SourceShow, fetched_seasons: usize) -> bool {
    stored.number_of_seasons != show.number_of_seasons
        || stored.number_of_episodes != show.number_of_episodes
        || stored.status != show.status
        || stored.seasons.len() != fetched_seasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FakeSource};

    #[test]
    fn test_stale_cutoff_out_of_range_covers_everything() {
        let now = Utc::now();
        assert_eq!(stale_cutoff(now, 60), Some(now - ChronoDuration::seconds(60)));
        assert_eq!(stale_cutoff(now, 10_000_000_000_000_000), None);
        assert_eq!(stale_cutoff(now, u64::MAX), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sync_runs_until_shutdown() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Ended", &[(1, &[1])]);
        let (_dir, tracker) = testing::tracker(source)?;
        tracker.ensure_catalog(1).await?;

        let mut runs = Vec::new();
        let completed = tracker
            .sync_periodically(
                Duration::from_secs(10),
                sleep(Duration::from_secs(25)),
                |summary| runs.push(summary),
            )
            .await?;

        // Ticks at 0s, 10s and 20s
        assert_eq!(completed, 3);
        assert_eq!(runs.len(), 3);
        assert!(runs.iter().all(|summary| summary.total == 1));

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_running_sync() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "First", "Ended", &[(1, &[1])]);
        source.add_show(2, "Second", "Ended", &[(1, &[1])]);
        let (_dir, db, _) = testing::tracker_with_db(source.clone())?;

        let mut config = testing::test_config();
        config.sync.show_delay_ms = 60_000;
        let tracker = crate::Tracker::new(db, source.clone(), &config);
        tracker.ensure_catalog(1).await?;
        tracker.ensure_catalog(2).await?;
        let fetches_before = source.show_fetches();

        let started = tokio::time::Instant::now();
        let completed = tracker
            .sync_periodically(
                Duration::from_secs(3600),
                sleep(Duration::from_secs(1)),
                |_| {},
            )
            .await?;

        // Stopped during the pause after the first show
        assert_eq!(completed, 0);
        assert_eq!(source.show_fetches(), fetches_before + 1);
        assert!(started.elapsed() < Duration::from_secs(60));

        Ok(())
    }

    #[tokio::test]
    async fn test_huge_stale_window_syncs_every_show() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Ended", &[(1, &[1])]);
        let (_dir, db, _) = testing::tracker_with_db(source.clone())?;

        let mut config = testing::test_config();
        config.sync.stale_after_seconds = Some(u64::MAX);
        let tracker = crate::Tracker::new(db, source, &config);
        tracker.ensure_catalog(1).await?;

        let summary = tracker.sync_all().await?;
        assert_eq!(summary.total, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_unchanged_sync_keeps_progress() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Returning Series", &[(1, &[1, 2, 3])]);
        let (_dir, tracker) = testing::tracker(source.clone())?;

        tracker.mark_episode_watched("u1", 1, 1, 1).await?;
        let state_before = tracker.watch_state("u1", 1)?;
        let progress_before = tracker.compute_progress("u1")?;

        let result = tracker.sync_show(1).await?;
        assert_eq!(result.outcome, SyncOutcome::Unchanged);
        assert_eq!(tracker.watch_state("u1", 1)?, state_before);
        assert_eq!(tracker.compute_progress("u1")?, progress_before);

        Ok(())
    }

    #[tokio::test]
    async fn test_growing_show_preserves_watch_state() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Returning Series", &[(1, &[1, 2, 3])]);
        let (_dir, tracker) = testing::tracker(source.clone())?;

        tracker.mark_season_watched("u1", 1, 1).await?;
        let state_before = tracker.watch_state("u1", 1)?;
        assert!(tracker.compute_progress("u1")?[0].is_completed);

        source.add_show(1, "Show", "Returning Series", &[(1, &[1, 2, 3]), (2, &[1, 2])]);
        let result = tracker.sync_show(1).await?;
        assert_eq!(result.outcome, SyncOutcome::Updated);
        assert_eq!((result.previous_episodes, result.current_episodes), (3, 5));
        assert_eq!((result.previous_seasons, result.current_seasons), (1, 2));

        assert_eq!(tracker.watch_state("u1", 1)?, state_before);

        let progress = tracker.compute_progress("u1")?;
        assert!(!progress[0].is_completed);
        assert_eq!(
            progress[0].next_episode.as_ref().map(|n| (n.season_number, n.episode_number)),
            Some((2, 1))
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_shrinking_show_keeps_orphans() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Ended", &[(1, &[1, 2]), (2, &[1])]);
        let (_dir, tracker) = testing::tracker(source.clone())?;

        tracker.mark_episode_watched("u1", 1, 2, 1).await?;
        source.add_show(1, "Show", "Ended", &[(1, &[1, 2])]);
        assert_eq!(tracker.sync_show(1).await?.outcome, SyncOutcome::Updated);

        let state = tracker.watch_state("u1", 1)?.expect("orphan kept");
        assert_eq!(state.watched_count(), 1);
        let progress = tracker.compute_progress("u1")?;
        assert_eq!(progress[0].watched_episodes, 1);
        assert_eq!(
            progress[0].next_episode.as_ref().map(|n| (n.season_number, n.episode_number)),
            Some((1, 1))
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_status_change_updates() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Returning Series", &[(1, &[1])]);
        let (_dir, tracker) = testing::tracker(source.clone())?;
        tracker.ensure_catalog(1).await?;

        source.add_show(1, "Show", "Ended", &[(1, &[1])]);
        assert_eq!(tracker.sync_show(1).await?.outcome, SyncOutcome::Updated);
        assert_eq!(tracker.ensure_catalog(1).await?.status, "Ended");

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_season_leaves_entry_untouched() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Returning Series", &[(1, &[1, 2])]);
        let (_dir, tracker) = testing::tracker(source.clone())?;
        let before = tracker.ensure_catalog(1).await?;

        source.add_show(1, "Show", "Returning Series", &[(1, &[1, 2]), (2, &[1])]);
        source.fail_season(1, 2);
        let result = tracker.sync_show(1).await?;
        assert_eq!(result.outcome, SyncOutcome::Error);
        assert!(result.error.is_some());
        assert_eq!(tracker.ensure_catalog(1).await?, before);

        source.heal_season(1, 2);
        assert_eq!(tracker.sync_show(1).await?.outcome, SyncOutcome::Updated);

        Ok(())
    }

    #[tokio::test]
    async fn test_resync_forces_overwrite() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Ended", &[(1, &[1])]);
        let (_dir, tracker) = testing::tracker(source)?;
        let before = tracker.ensure_catalog(1).await?;

        let result = tracker.resync_show(1).await?;
        assert_eq!(result.outcome, SyncOutcome::Updated);

        let after = tracker.ensure_catalog(1).await?;
        assert_eq!(after.created_at, before.created_at);
        assert!(after.synced_at >= before.synced_at);

        Ok(())
    }

    #[tokio::test]
    async fn test_sync_unknown_show() -> anyhow::Result<()> {
        let source = FakeSource::new();
        let (_dir, tracker) = testing::tracker(source)?;

        assert!(matches!(
            tracker.sync_show(99).await,
            Err(TrackerError::NotFound(Missing::Show(99)))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_sync_all_isolates_failures() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Stable", "Ended", &[(1, &[1])]);
        source.add_show(2, "Growing", "Returning Series", &[(1, &[1])]);
        source.add_show(3, "Flaky", "Ended", &[(1, &[1])]);
        let (_dir, tracker) = testing::tracker(source.clone())?;
        for show_id in 1..=3 {
            tracker.ensure_catalog(show_id).await?;
        }

        source.add_show(2, "Growing", "Returning Series", &[(1, &[1, 2])]);
        source.fail_season(3, 1);

        let summary = tracker.sync_all().await?;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.results[2].outcome, SyncOutcome::Error);

        source.set_missing_key(true);
        assert!(matches!(tracker.sync_all().await, Err(TrackerError::Configuration(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_backfill_materializes_referenced_entries() -> anyhow::Result<()> {
        let source = FakeSource::new();
        source.add_show(1, "Show", "Ended", &[(1, &[1, 2])]);
        source.add_movie(603, "The Matrix", 136);
        let (_dir, db, tracker) = testing::tracker_with_db(source)?;

        // Watch records written without going through the materializer
        WatchStateStore::new(db.clone()).insert_episode("u1", 1, 1, 1, Utc::now())?;
        WatchStateStore::new(db.clone()).insert_episode("u1", 2, 1, 1, Utc::now())?;
        MovieStore::new(db).insert_watched("u1", 603, Utc::now())?;
        assert_eq!(tracker.catalog_size()?, 0);

        let report = tracker.backfill().await?;
        assert_eq!(report.shows_missing, 2);
        assert_eq!(report.shows_created, 1);
        assert_eq!(report.movies_created, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(tracker.catalog_size()?, 1);

        Ok(())
    }
}
