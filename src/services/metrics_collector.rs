//! Metrics collector: the current system view and time-series reads.
//!
//! Live queue state arrives through the `QueueStatsSource` seam; durable
//! history is read through the persistence gateway. Windows are fixed:
//! 5 minutes for rates and throughput, 60 minutes for job duration.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    Aggregates, DataPoint, JobStatus, MetricKind, Resolution, SystemMetrics, TimeRange, TimeSeries,
};
use crate::domain::ports::{
    AgentStatusRepository, AlertRepository, DeadLetterRepository, JobRepository, MissionRepository,
    QueueStatsSource, SnapshotRepository,
};

/// Window for error rate, throughput, and token/cost rates.
const RATE_WINDOW_MINUTES: i64 = 5;

/// Window for the average job duration.
const DURATION_WINDOW_MINUTES: i64 = 60;

pub struct MetricsCollector {
    queue_stats: Arc<dyn QueueStatsSource>,
    jobs: Arc<dyn JobRepository>,
    missions: Arc<dyn MissionRepository>,
    agents: Arc<dyn AgentStatusRepository>,
    dead_letters: Arc<dyn DeadLetterRepository>,
    alerts: Arc<dyn AlertRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
}

impl MetricsCollector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue_stats: Arc<dyn QueueStatsSource>,
        jobs: Arc<dyn JobRepository>,
        missions: Arc<dyn MissionRepository>,
        agents: Arc<dyn AgentStatusRepository>,
        dead_letters: Arc<dyn DeadLetterRepository>,
        alerts: Arc<dyn AlertRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
    ) -> Self {
        Self {
            queue_stats,
            jobs,
            missions,
            agents,
            dead_letters,
            alerts,
            snapshots,
        }
    }

    /// Gather the current view for one user. Sub-queries run concurrently.
    pub async fn collect_current_metrics(&self, user_id: &str) -> CoreResult<SystemMetrics> {
        let now = Utc::now();
        let rate_window = now - Duration::minutes(RATE_WINDOW_MINUTES);
        let duration_window = now - Duration::minutes(DURATION_WINDOW_MINUTES);

        let (
            queue_depth,
            active_jobs,
            completed_jobs,
            failed_jobs,
            agent_counts,
            dead_letter_count,
            tokens,
            cost,
            avg_duration,
            firing_counts,
        ) = tokio::join!(
            self.queue_stats.depth_for_user(user_id),
            self.queue_stats.active_for_user(user_id),
            self.jobs.count_since(user_id, JobStatus::Completed, rate_window),
            self.jobs.count_since(user_id, JobStatus::Failed, rate_window),
            self.agents.counts_for_user(user_id),
            self.dead_letters.count_unresolved_for_user(user_id),
            self.missions.tokens_since(user_id, rate_window),
            self.missions.cost_since(user_id, rate_window),
            self.jobs.avg_duration_ms_since(user_id, duration_window),
            self.alerts.firing_counts(user_id),
        );

        let completed_jobs = completed_jobs?;
        let failed_jobs = failed_jobs?;
        let agent_counts = agent_counts?;
        let (alerts_firing, alerts_resolved) = firing_counts?;

        let settled = completed_jobs + failed_jobs;
        let error_rate = if settled == 0 {
            0.0
        } else {
            failed_jobs as f64 / settled as f64
        };

        Ok(SystemMetrics {
            queue_depth: queue_depth?,
            active_jobs: active_jobs?,
            failed_jobs,
            completed_jobs,
            active_agents: agent_counts.active,
            idle_agents: agent_counts.idle,
            registered_agents: agent_counts.total,
            dead_letter_count: dead_letter_count?,
            jobs_per_minute: completed_jobs as f64 / RATE_WINDOW_MINUTES as f64,
            cost_per_hour: cost? as f64 * (60.0 / RATE_WINDOW_MINUTES as f64),
            tokens_per_minute: tokens? as f64 / RATE_WINDOW_MINUTES as f64,
            error_rate,
            avg_job_duration_ms: avg_duration?,
            alerts_firing,
            alerts_resolved,
        })
    }

    /// Read a down-sampled series from the minute snapshots.
    ///
    /// Buckets average the raw values they cover; minutes without a
    /// snapshot are omitted, never interpolated.
    pub async fn get_timeseries(
        &self,
        user_id: &str,
        metric: MetricKind,
        range: TimeRange,
        resolution: Resolution,
    ) -> CoreResult<TimeSeries> {
        if metric == MetricKind::BudgetUsage {
            return Err(CoreError::Validation(
                "budget_usage is not snapshot-backed".into(),
            ));
        }

        let since = Utc::now() - range.duration();
        let snapshots = self.snapshots.list_since(user_id, since).await?;

        let bucket_secs = resolution.seconds();
        let mut buckets: BTreeMap<i64, (f64, u64)> = BTreeMap::new();
        let mut current = 0.0;
        for snapshot in &snapshots {
            let value = snapshot.value(metric);
            current = value;
            let bucket = snapshot.timestamp.timestamp().div_euclid(bucket_secs) * bucket_secs;
            let slot = buckets.entry(bucket).or_insert((0.0, 0));
            slot.0 += value;
            slot.1 += 1;
        }

        let data_points: Vec<DataPoint> = buckets
            .into_iter()
            .map(|(bucket, (sum, count))| DataPoint {
                timestamp: DateTime::<Utc>::from_timestamp(bucket, 0).unwrap_or_else(Utc::now),
                value: sum / count as f64,
            })
            .collect();

        let aggregates = if data_points.is_empty() {
            Aggregates::default()
        } else {
            let values: Vec<f64> = data_points.iter().map(|p| p.value).collect();
            Aggregates {
                min: values.iter().copied().fold(f64::INFINITY, f64::min),
                max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                avg: values.iter().sum::<f64>() / values.len() as f64,
                current,
            }
        };

        Ok(TimeSeries {
            metric,
            data_points,
            aggregates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAgentStatusRepository, SqliteAlertRepository,
        SqliteDeadLetterRepository, SqliteJobRepository, SqliteMissionRepository,
        SqliteSnapshotRepository,
    };
    use crate::domain::models::{floor_to_minute, MetricSnapshot};

    struct Fixture {
        collector: MetricsCollector,
        jobs: Arc<SqliteJobRepository>,
        snapshots: Arc<SqliteSnapshotRepository>,
    }

    async fn fixture() -> Fixture {
        let pool = create_migrated_test_pool().await.unwrap();
        let jobs = Arc::new(SqliteJobRepository::new(pool.clone()));
        let snapshots = Arc::new(SqliteSnapshotRepository::new(pool.clone()));
        let collector = MetricsCollector::new(
            jobs.clone(),
            jobs.clone(),
            Arc::new(SqliteMissionRepository::new(pool.clone())),
            Arc::new(SqliteAgentStatusRepository::new(pool.clone())),
            Arc::new(SqliteDeadLetterRepository::new(pool.clone())),
            Arc::new(SqliteAlertRepository::new(pool)),
            snapshots.clone(),
        );
        Fixture {
            collector,
            jobs,
            snapshots,
        }
    }

    async fn settle_jobs(jobs: &SqliteJobRepository, user: &str, completed: usize, failed: usize) {
        use crate::domain::models::{EnqueueOptions, Job};
        for i in 0..(completed + failed) {
            let job = Job::new(
                "q",
                "t",
                serde_json::json!({}),
                EnqueueOptions::for_user(user),
            );
            jobs.insert(&job).await.unwrap();
            jobs.claim_next("q", "w", Utc::now()).await.unwrap().unwrap();
            if i < completed {
                jobs.mark_completed(job.id, Utc::now()).await.unwrap();
            } else {
                jobs.mark_failed(job.id, "x", Utc::now()).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn error_rate_over_window() {
        let f = fixture().await;
        settle_jobs(&f.jobs, "u1", 4, 6).await;

        let metrics = f.collector.collect_current_metrics("u1").await.unwrap();
        assert!((metrics.error_rate - 0.6).abs() < 0.001);
        assert_eq!(metrics.completed_jobs, 4);
        assert_eq!(metrics.failed_jobs, 6);
        assert!((metrics.jobs_per_minute - 0.8).abs() < 0.001);
    }

    #[tokio::test]
    async fn idle_system_has_zero_error_rate() {
        let f = fixture().await;
        let metrics = f.collector.collect_current_metrics("u1").await.unwrap();
        assert_eq!(metrics.error_rate, 0.0);
        assert_eq!(metrics.queue_depth, 0);
    }

    #[tokio::test]
    async fn minute_resolution_returns_raw_values() {
        let f = fixture().await;
        let base = floor_to_minute(Utc::now()) - Duration::minutes(10);
        for i in 0..5 {
            let snapshot = MetricSnapshot {
                timestamp: base + Duration::minutes(i),
                user_id: "u1".into(),
                queue_depth: (i as u64) * 10,
                active_jobs: 0,
                failed_jobs: 0,
                completed_jobs: 0,
                active_agents: 0,
                idle_agents: 0,
                jobs_per_minute: 0.0,
                cost_per_hour: 0.0,
                tokens_per_minute: 0.0,
                error_rate: 0.0,
            };
            f.snapshots.upsert(&snapshot).await.unwrap();
        }

        let series = f
            .collector
            .get_timeseries("u1", MetricKind::QueueDepth, TimeRange::Hour, Resolution::Minute)
            .await
            .unwrap();
        assert_eq!(series.data_points.len(), 5);
        let values: Vec<f64> = series.data_points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![0.0, 10.0, 20.0, 30.0, 40.0]);
        assert_eq!(series.aggregates.min, 0.0);
        assert_eq!(series.aggregates.max, 40.0);
        assert_eq!(series.aggregates.avg, 20.0);
        assert_eq!(series.aggregates.current, 40.0);
    }

    #[tokio::test]
    async fn five_minute_buckets_average() {
        let f = fixture().await;
        // Two snapshots inside one 5-minute bucket.
        let bucket_start = DateTime::<Utc>::from_timestamp(
            (Utc::now().timestamp() - 600).div_euclid(300) * 300,
            0,
        )
        .unwrap();
        for (offset, depth) in [(0i64, 10u64), (1, 30)] {
            let snapshot = MetricSnapshot {
                timestamp: bucket_start + Duration::minutes(offset),
                user_id: "u1".into(),
                queue_depth: depth,
                active_jobs: 0,
                failed_jobs: 0,
                completed_jobs: 0,
                active_agents: 0,
                idle_agents: 0,
                jobs_per_minute: 0.0,
                cost_per_hour: 0.0,
                tokens_per_minute: 0.0,
                error_rate: 0.0,
            };
            f.snapshots.upsert(&snapshot).await.unwrap();
        }

        let series = f
            .collector
            .get_timeseries(
                "u1",
                MetricKind::QueueDepth,
                TimeRange::Hour,
                Resolution::FiveMinutes,
            )
            .await
            .unwrap();
        assert_eq!(series.data_points.len(), 1);
        assert_eq!(series.data_points[0].value, 20.0);
    }

    #[tokio::test]
    async fn budget_usage_series_is_rejected() {
        let f = fixture().await;
        let err = f
            .collector
            .get_timeseries("u1", MetricKind::BudgetUsage, TimeRange::Hour, Resolution::Minute)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn missing_minutes_are_omitted() {
        let f = fixture().await;
        let base = floor_to_minute(Utc::now()) - Duration::minutes(30);
        for i in [0i64, 7, 19] {
            let snapshot = MetricSnapshot {
                timestamp: base + Duration::minutes(i),
                user_id: "u1".into(),
                queue_depth: 1,
                active_jobs: 0,
                failed_jobs: 0,
                completed_jobs: 0,
                active_agents: 0,
                idle_agents: 0,
                jobs_per_minute: 0.0,
                cost_per_hour: 0.0,
                tokens_per_minute: 0.0,
                error_rate: 0.0,
            };
            f.snapshots.upsert(&snapshot).await.unwrap();
        }

        let series = f
            .collector
            .get_timeseries("u1", MetricKind::QueueDepth, TimeRange::Hour, Resolution::Minute)
            .await
            .unwrap();
        assert_eq!(series.data_points.len(), 3);
    }
}
