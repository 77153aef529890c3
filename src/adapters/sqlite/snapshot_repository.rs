//! SQLite implementation of the SnapshotRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::MetricSnapshot;
use crate::domain::ports::SnapshotRepository;

#[derive(Clone)]
pub struct SqliteSnapshotRepository {
    pool: SqlitePool,
}

impl SqliteSnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotRepository for SqliteSnapshotRepository {
    async fn upsert(&self, snapshot: &MetricSnapshot) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO metric_snapshots (timestamp, user_id, queue_depth, active_jobs,
               failed_jobs, completed_jobs, active_agents, idle_agents, jobs_per_minute,
               cost_per_hour, tokens_per_minute, error_rate)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (timestamp, user_id) DO UPDATE SET
                   queue_depth = excluded.queue_depth,
                   active_jobs = excluded.active_jobs,
                   failed_jobs = excluded.failed_jobs,
                   completed_jobs = excluded.completed_jobs,
                   active_agents = excluded.active_agents,
                   idle_agents = excluded.idle_agents,
                   jobs_per_minute = excluded.jobs_per_minute,
                   cost_per_hour = excluded.cost_per_hour,
                   tokens_per_minute = excluded.tokens_per_minute,
                   error_rate = excluded.error_rate"#,
        )
        .bind(snapshot.timestamp.to_rfc3339())
        .bind(&snapshot.user_id)
        .bind(snapshot.queue_depth as i64)
        .bind(snapshot.active_jobs as i64)
        .bind(snapshot.failed_jobs as i64)
        .bind(snapshot.completed_jobs as i64)
        .bind(snapshot.active_agents as i64)
        .bind(snapshot.idle_agents as i64)
        .bind(snapshot.jobs_per_minute)
        .bind(snapshot.cost_per_hour)
        .bind(snapshot.tokens_per_minute)
        .bind(snapshot.error_rate)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> CoreResult<Vec<MetricSnapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            r#"SELECT * FROM metric_snapshots
               WHERE user_id = ? AND timestamp >= ?
               ORDER BY timestamp"#,
        )
        .bind(user_id)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MetricSnapshot::try_from).collect()
    }

    async fn prune(&self, before: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM metric_snapshots WHERE timestamp < ?")
            .bind(before.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    timestamp: String,
    user_id: String,
    queue_depth: i64,
    active_jobs: i64,
    failed_jobs: i64,
    completed_jobs: i64,
    active_agents: i64,
    idle_agents: i64,
    jobs_per_minute: f64,
    cost_per_hour: f64,
    tokens_per_minute: f64,
    error_rate: f64,
}

impl TryFrom<SnapshotRow> for MetricSnapshot {
    type Error = CoreError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(MetricSnapshot {
            timestamp: super::parse_datetime(&row.timestamp)?,
            user_id: row.user_id,
            queue_depth: row.queue_depth as u64,
            active_jobs: row.active_jobs as u64,
            failed_jobs: row.failed_jobs as u64,
            completed_jobs: row.completed_jobs as u64,
            active_agents: row.active_agents as u64,
            idle_agents: row.idle_agents as u64,
            jobs_per_minute: row.jobs_per_minute,
            cost_per_hour: row.cost_per_hour,
            tokens_per_minute: row.tokens_per_minute,
            error_rate: row.error_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::{floor_to_minute, SystemMetrics};

    #[tokio::test]
    async fn upsert_overwrites_same_minute() {
        let repo = SqliteSnapshotRepository::new(create_migrated_test_pool().await.unwrap());
        let now = Utc::now();

        let mut metrics = SystemMetrics {
            queue_depth: 5,
            ..Default::default()
        };
        repo.upsert(&MetricSnapshot::from_metrics("u1", now, &metrics))
            .await
            .unwrap();

        metrics.queue_depth = 9;
        repo.upsert(&MetricSnapshot::from_metrics("u1", now, &metrics))
            .await
            .unwrap();

        let since = now - chrono::Duration::minutes(2);
        let rows = repo.list_since("u1", since).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].queue_depth, 9);
        assert_eq!(rows[0].timestamp, floor_to_minute(now));
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let repo = SqliteSnapshotRepository::new(create_migrated_test_pool().await.unwrap());
        let now = Utc::now();
        let metrics = SystemMetrics::default();
        repo.upsert(&MetricSnapshot::from_metrics("u1", now, &metrics))
            .await
            .unwrap();
        repo.upsert(&MetricSnapshot::from_metrics("u2", now, &metrics))
            .await
            .unwrap();

        let since = now - chrono::Duration::minutes(2);
        assert_eq!(repo.list_since("u1", since).await.unwrap().len(), 1);
        assert_eq!(repo.list_since("u2", since).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn prune_removes_old_rows() {
        let repo = SqliteSnapshotRepository::new(create_migrated_test_pool().await.unwrap());
        let old = Utc::now() - chrono::Duration::days(40);
        let metrics = SystemMetrics::default();
        repo.upsert(&MetricSnapshot::from_metrics("u1", old, &metrics))
            .await
            .unwrap();
        repo.upsert(&MetricSnapshot::from_metrics("u1", Utc::now(), &metrics))
            .await
            .unwrap();

        let removed = repo.prune(Utc::now() - chrono::Duration::days(30)).await.unwrap();
        assert_eq!(removed, 1);
    }
}
