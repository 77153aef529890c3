//! Periodic metric snapshotter.
//!
//! Once a minute (minute-aligned) the snapshotter collects the current
//! view for every known user and upserts a snapshot keyed on the floored
//! minute. Transient failures are logged and swallowed; the next tick
//! gets another chance. Snapshots older than the retention window are
//! pruned on the way through.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Timelike, Utc};
use tokio::sync::watch;

use crate::domain::errors::CoreResult;
use crate::domain::models::MetricSnapshot;
use crate::domain::ports::{JobRepository, SnapshotRepository};
use crate::services::metrics_collector::MetricsCollector;

/// Snapshots are retained this many days.
const RETENTION_DAYS: i64 = 30;

pub struct Snapshotter {
    collector: Arc<MetricsCollector>,
    snapshots: Arc<dyn SnapshotRepository>,
    jobs: Arc<dyn JobRepository>,
    interval: Duration,
}

impl Snapshotter {
    pub fn new(
        collector: Arc<MetricsCollector>,
        snapshots: Arc<dyn SnapshotRepository>,
        jobs: Arc<dyn JobRepository>,
        interval: Duration,
    ) -> Self {
        Self {
            collector,
            snapshots,
            jobs,
            interval,
        }
    }

    /// One sweep: snapshot every known user, then prune expired rows.
    /// Returns the number of snapshots written.
    pub async fn tick(&self) -> CoreResult<usize> {
        let users = self.jobs.distinct_users().await?;
        let now = Utc::now();
        let mut written = 0;

        for user in &users {
            match self.collector.collect_current_metrics(user).await {
                Ok(metrics) => {
                    let snapshot = MetricSnapshot::from_metrics(user, now, &metrics);
                    match self.snapshots.upsert(&snapshot).await {
                        Ok(()) => written += 1,
                        Err(e) => {
                            tracing::warn!(user, error = %e, "snapshot write failed, skipping")
                        }
                    }
                }
                Err(e) => tracing::warn!(user, error = %e, "metric collection failed, skipping"),
            }
        }

        let cutoff = now - chrono::Duration::days(RETENTION_DAYS);
        match self.snapshots.prune(cutoff).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "pruned expired snapshots"),
            Err(e) => tracing::warn!(error = %e, "snapshot prune failed"),
        }

        Ok(written)
    }

    /// Run until shutdown. The first tick waits for the next minute
    /// boundary so snapshot timestamps land on whole minutes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(until_next_minute()) => {}
            _ = shutdown.changed() => return,
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::warn!(error = %e, "snapshot sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

/// Time remaining until the next whole minute.
fn until_next_minute() -> Duration {
    let now = Utc::now();
    let seconds_into_minute = now.second() as u64;
    let subsec_ms = now.timestamp_subsec_millis() as u64;
    let elapsed_ms = seconds_into_minute * 1_000 + subsec_ms;
    Duration::from_millis(60_000u64.saturating_sub(elapsed_ms).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAgentStatusRepository, SqliteAlertRepository,
        SqliteDeadLetterRepository, SqliteJobRepository, SqliteMissionRepository,
        SqliteSnapshotRepository,
    };
    use crate::domain::models::{EnqueueOptions, Job};

    async fn snapshotter() -> (Snapshotter, Arc<SqliteJobRepository>, Arc<SqliteSnapshotRepository>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let jobs = Arc::new(SqliteJobRepository::new(pool.clone()));
        let snapshots = Arc::new(SqliteSnapshotRepository::new(pool.clone()));
        let collector = Arc::new(MetricsCollector::new(
            jobs.clone(),
            jobs.clone(),
            Arc::new(SqliteMissionRepository::new(pool.clone())),
            Arc::new(SqliteAgentStatusRepository::new(pool.clone())),
            Arc::new(SqliteDeadLetterRepository::new(pool.clone())),
            Arc::new(SqliteAlertRepository::new(pool)),
            snapshots.clone(),
        ));
        let snapshotter = Snapshotter::new(
            collector,
            snapshots.clone(),
            jobs.clone(),
            Duration::from_secs(60),
        );
        (snapshotter, jobs, snapshots)
    }

    #[tokio::test]
    async fn tick_writes_one_snapshot_per_user() {
        let (snapshotter, jobs, snapshots) = snapshotter().await;
        for user in ["u1", "u2"] {
            let job = Job::new("q", "t", serde_json::json!({}), EnqueueOptions::for_user(user));
            jobs.insert(&job).await.unwrap();
        }

        let written = snapshotter.tick().await.unwrap();
        assert_eq!(written, 2);

        let since = Utc::now() - chrono::Duration::minutes(2);
        assert_eq!(snapshots.list_since("u1", since).await.unwrap().len(), 1);
        assert_eq!(snapshots.list_since("u2", since).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_ticks_in_same_minute_keep_one_row() {
        let (snapshotter, jobs, snapshots) = snapshotter().await;
        let job = Job::new("q", "t", serde_json::json!({}), EnqueueOptions::for_user("u1"));
        jobs.insert(&job).await.unwrap();

        snapshotter.tick().await.unwrap();
        snapshotter.tick().await.unwrap();

        let since = Utc::now() - chrono::Duration::minutes(2);
        assert_eq!(snapshots.list_since("u1", since).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_users_means_no_snapshots() {
        let (snapshotter, _jobs, _snapshots) = snapshotter().await;
        assert_eq!(snapshotter.tick().await.unwrap(), 0);
    }

    #[test]
    fn next_minute_is_within_a_minute() {
        let wait = until_next_minute();
        assert!(wait <= Duration::from_secs(60));
        assert!(wait >= Duration::from_millis(1));
    }
}
