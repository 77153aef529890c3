//! SQLite implementation of the JobRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{Job, JobStatus, QueueMetrics};
use crate::domain::ports::{JobRepository, QueueStatsSource};

#[derive(Clone)]
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Distinguish "row gone" from "row in the wrong status" after a
    /// guarded UPDATE touched nothing.
    async fn classify_missed_update(&self, id: Uuid, expected: JobStatus) -> CoreError {
        match self.get(id).await {
            Ok(Some(job)) => CoreError::Consistency(format!(
                "job {} expected {} but found {}",
                id,
                expected.as_str(),
                job.status.as_str()
            )),
            Ok(None) => CoreError::JobNotFound(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &Job) -> CoreResult<()> {
        let payload_json = serde_json::to_string(&job.payload)?;

        sqlx::query(
            r#"INSERT INTO jobs (id, queue, job_type, payload, status, priority, attempts,
               max_attempts, backoff_base_ms, delayed_until, user_id, idempotency_key,
               error, mission_id, enqueued_at, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(job.id.to_string())
        .bind(&job.queue)
        .bind(&job.job_type)
        .bind(&payload_json)
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(job.attempts as i64)
        .bind(job.max_attempts as i64)
        .bind(job.backoff_base_ms as i64)
        .bind(job.delayed_until.map(|t| t.to_rfc3339()))
        .bind(&job.user_id)
        .bind(&job.idempotency_key)
        .bind(&job.error)
        .bind(job.mission_id.map(|m| m.to_string()))
        .bind(job.enqueued_at.to_rfc3339())
        .bind(job.started_at.map(|t| t.to_rfc3339()))
        .bind(job.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn claim_next(
        &self,
        queue: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Job>> {
        // A single UPDATE is atomic in SQLite, so two claimers can never
        // receive the same row.
        let now_str = now.to_rfc3339();
        let row: Option<JobRow> = sqlx::query_as(
            r#"UPDATE jobs
               SET status = 'active', started_at = ?, attempts = attempts + 1, error = NULL
               WHERE id = (
                   SELECT id FROM jobs
                   WHERE queue = ?
                     AND (status = 'waiting'
                          OR (status = 'delayed' AND delayed_until <= ?))
                   ORDER BY priority ASC, enqueued_at ASC
                   LIMIT 1
               )
               RETURNING *"#,
        )
        .bind(&now_str)
        .bind(queue)
        .bind(&now_str)
        .fetch_optional(&self.pool)
        .await?;

        let claimed = row.map(Job::try_from).transpose()?;
        if let Some(ref job) = claimed {
            tracing::debug!(job_id = %job.id, queue, worker_id, attempt = job.attempts, "claimed job");
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', completed_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.classify_missed_update(id, JobStatus::Active).await);
        }
        Ok(())
    }

    async fn mark_delayed(
        &self,
        id: Uuid,
        delayed_until: DateTime<Utc>,
        error: &str,
    ) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'delayed', delayed_until = ?, error = ? WHERE id = ? AND status = 'active'",
        )
        .bind(delayed_until.to_rfc3339())
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.classify_missed_update(id, JobStatus::Active).await);
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', completed_at = ?, error = ? WHERE id = ? AND status = 'active'",
        )
        .bind(now.to_rfc3339())
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.classify_missed_update(id, JobStatus::Active).await);
        }
        Ok(())
    }

    async fn mark_dead(&self, id: Uuid) -> CoreResult<()> {
        let result =
            sqlx::query("UPDATE jobs SET status = 'dead' WHERE id = ? AND status = 'failed'")
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(self.classify_missed_update(id, JobStatus::Failed).await);
        }
        Ok(())
    }

    async fn find_by_idempotency_key(
        &self,
        queue: &str,
        key: &str,
        since: DateTime<Utc>,
    ) -> CoreResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"SELECT * FROM jobs
               WHERE queue = ? AND idempotency_key = ?
                 AND status != 'dead' AND enqueued_at >= ?
               ORDER BY enqueued_at DESC LIMIT 1"#,
        )
        .bind(queue)
        .bind(key)
        .bind(since.to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn queue_metrics(&self, queue: &str) -> CoreResult<QueueMetrics> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs WHERE queue = ? GROUP BY status")
                .bind(queue)
                .fetch_all(&self.pool)
                .await?;

        let mut metrics = QueueMetrics::default();
        for (status, count) in rows {
            match JobStatus::from_str(&status) {
                Some(JobStatus::Waiting) => metrics.waiting = count as u64,
                Some(JobStatus::Active) => metrics.active = count as u64,
                Some(JobStatus::Completed) => metrics.completed = count as u64,
                Some(JobStatus::Failed) => metrics.failed = count as u64,
                Some(JobStatus::Delayed) => metrics.delayed = count as u64,
                _ => {}
            }
        }
        Ok(metrics)
    }

    async fn queue_names(&self) -> CoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT queue FROM jobs ORDER BY queue")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(q,)| q).collect())
    }

    async fn depth_for_user(&self, user_id: &str) -> CoreResult<u64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM jobs WHERE user_id = ? AND status IN ('waiting', 'delayed')",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 as u64)
    }

    async fn active_for_user(&self, user_id: &str) -> CoreResult<u64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE user_id = ? AND status = 'active'")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0 as u64)
    }

    async fn count_since(
        &self,
        user_id: &str,
        status: JobStatus,
        since: DateTime<Utc>,
    ) -> CoreResult<u64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM jobs WHERE user_id = ? AND status = ? AND completed_at >= ?",
        )
        .bind(user_id)
        .bind(status.as_str())
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 as u64)
    }

    async fn avg_duration_ms_since(&self, user_id: &str, since: DateTime<Utc>) -> CoreResult<f64> {
        let row: (Option<f64>,) = sqlx::query_as(
            r#"SELECT AVG((julianday(completed_at) - julianday(started_at)) * 86400000.0)
               FROM jobs
               WHERE user_id = ? AND status = 'completed'
                 AND completed_at >= ? AND started_at IS NOT NULL"#,
        )
        .bind(user_id)
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.unwrap_or(0.0).max(0.0))
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'dead') AND completed_at < ?",
        )
        .bind(before.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn distinct_users(&self) -> CoreResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT user_id FROM jobs ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(u,)| u).collect())
    }
}

#[async_trait]
impl QueueStatsSource for SqliteJobRepository {
    async fn queue_names(&self) -> CoreResult<Vec<String>> {
        <Self as JobRepository>::queue_names(self).await
    }

    async fn queue_metrics(&self, queue: &str) -> CoreResult<QueueMetrics> {
        <Self as JobRepository>::queue_metrics(self, queue).await
    }

    async fn depth_for_user(&self, user_id: &str) -> CoreResult<u64> {
        <Self as JobRepository>::depth_for_user(self, user_id).await
    }

    async fn active_for_user(&self, user_id: &str) -> CoreResult<u64> {
        <Self as JobRepository>::active_for_user(self, user_id).await
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    queue: String,
    job_type: String,
    payload: String,
    status: String,
    priority: i64,
    attempts: i64,
    max_attempts: i64,
    backoff_base_ms: i64,
    delayed_until: Option<String>,
    user_id: String,
    idempotency_key: Option<String>,
    error: Option<String>,
    mission_id: Option<String>,
    enqueued_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = CoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_str(&row.status)
            .ok_or_else(|| CoreError::Serialization(format!("invalid job status: {}", row.status)))?;

        Ok(Job {
            id: super::parse_uuid(&row.id)?,
            queue: row.queue,
            job_type: row.job_type,
            payload: super::parse_json(&row.payload)?,
            status,
            priority: row.priority as i32,
            attempts: row.attempts as u32,
            max_attempts: row.max_attempts as u32,
            backoff_base_ms: row.backoff_base_ms as u64,
            delayed_until: super::parse_optional_datetime(row.delayed_until)?,
            user_id: row.user_id,
            idempotency_key: row.idempotency_key,
            error: row.error,
            mission_id: super::parse_optional_uuid(row.mission_id)?,
            enqueued_at: super::parse_datetime(&row.enqueued_at)?,
            started_at: super::parse_optional_datetime(row.started_at)?,
            completed_at: super::parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::EnqueueOptions;

    async fn repo() -> SqliteJobRepository {
        SqliteJobRepository::new(create_migrated_test_pool().await.unwrap())
    }

    fn job(queue: &str, priority: i32) -> Job {
        Job::new(
            queue,
            "noop",
            serde_json::json!({"n": priority}),
            EnqueueOptions::for_user("u1").with_priority(priority),
        )
    }

    #[tokio::test]
    async fn insert_then_claim_round_trips_payload() {
        let repo = repo().await;
        let original = job("q", 0);
        repo.insert(&original).await.unwrap();

        let claimed = repo
            .claim_next("q", "w1", Utc::now())
            .await
            .unwrap()
            .expect("job should be claimable");
        assert_eq!(claimed.id, original.id);
        assert_eq!(claimed.payload, original.payload);
        assert_eq!(claimed.user_id, original.user_id);
        assert_eq!(claimed.job_type, original.job_type);
        assert_eq!(claimed.status, JobStatus::Active);
        assert_eq!(claimed.attempts, 1);
        assert!(claimed.started_at.is_some());
    }

    #[tokio::test]
    async fn claim_honors_priority_then_age() {
        let repo = repo().await;
        let low = job("q", 10);
        let high = job("q", 1);
        repo.insert(&low).await.unwrap();
        repo.insert(&high).await.unwrap();

        let first = repo.claim_next("q", "w1", Utc::now()).await.unwrap().unwrap();
        assert_eq!(first.id, high.id);
        let second = repo.claim_next("q", "w1", Utc::now()).await.unwrap().unwrap();
        assert_eq!(second.id, low.id);
        assert!(repo.claim_next("q", "w1", Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delayed_job_claimable_only_after_delay() {
        let repo = repo().await;
        let mut delayed = job("q", 0);
        delayed.status = JobStatus::Delayed;
        delayed.delayed_until = Some(Utc::now() + chrono::Duration::seconds(60));
        repo.insert(&delayed).await.unwrap();

        assert!(repo.claim_next("q", "w1", Utc::now()).await.unwrap().is_none());

        let later = Utc::now() + chrono::Duration::seconds(120);
        let claimed = repo.claim_next("q", "w1", later).await.unwrap().unwrap();
        assert_eq!(claimed.id, delayed.id);
    }

    #[tokio::test]
    async fn claims_are_exclusive_per_job() {
        let repo = repo().await;
        repo.insert(&job("q", 0)).await.unwrap();

        let first = repo.claim_next("q", "w1", Utc::now()).await.unwrap();
        let second = repo.claim_next("q", "w2", Utc::now()).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn mark_completed_requires_active_status() {
        let repo = repo().await;
        let j = job("q", 0);
        repo.insert(&j).await.unwrap();

        // Not yet claimed: completing a waiting job is a consistency error.
        let err = repo.mark_completed(j.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, CoreError::Consistency(_)));

        repo.claim_next("q", "w1", Utc::now()).await.unwrap().unwrap();
        repo.mark_completed(j.id, Utc::now()).await.unwrap();

        let stored = repo.get(j.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn mark_unknown_job_is_not_found() {
        let repo = repo().await;
        let err = repo.mark_completed(Uuid::new_v4(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, CoreError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn failed_then_dead_transition() {
        let repo = repo().await;
        let j = job("q", 0);
        repo.insert(&j).await.unwrap();
        repo.claim_next("q", "w1", Utc::now()).await.unwrap();
        repo.mark_failed(j.id, "boom", Utc::now()).await.unwrap();
        repo.mark_dead(j.id).await.unwrap();

        let stored = repo.get(j.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Dead);
        assert_eq!(stored.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn idempotency_lookup_skips_dead_jobs() {
        let repo = repo().await;
        let mut j = job("q", 0);
        j.idempotency_key = Some("key-1".into());
        repo.insert(&j).await.unwrap();

        let since = Utc::now() - chrono::Duration::hours(24);
        let found = repo.find_by_idempotency_key("q", "key-1", since).await.unwrap();
        assert_eq!(found.unwrap().id, j.id);

        repo.claim_next("q", "w1", Utc::now()).await.unwrap();
        repo.mark_failed(j.id, "x", Utc::now()).await.unwrap();
        repo.mark_dead(j.id).await.unwrap();
        let found = repo.find_by_idempotency_key("q", "key-1", since).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn queue_metrics_count_by_status() {
        let repo = repo().await;
        repo.insert(&job("q", 0)).await.unwrap();
        repo.insert(&job("q", 0)).await.unwrap();
        let running = job("q", 0);
        repo.insert(&running).await.unwrap();
        repo.claim_next("q", "w1", Utc::now()).await.unwrap();

        let metrics = JobRepository::queue_metrics(&repo, "q").await.unwrap();
        assert_eq!(metrics.active, 1);
        assert_eq!(metrics.waiting, 2);
        assert_eq!(metrics.depth(), 2);
    }

    #[tokio::test]
    async fn purge_terminal_removes_old_completed() {
        let repo = repo().await;
        let j = job("q", 0);
        repo.insert(&j).await.unwrap();
        repo.claim_next("q", "w1", Utc::now()).await.unwrap();
        repo.mark_completed(j.id, Utc::now()).await.unwrap();

        let removed = repo.purge_terminal(Utc::now() + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get(j.id).await.unwrap().is_none());
    }
}
