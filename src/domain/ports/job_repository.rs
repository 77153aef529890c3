//! Job repository port.
//!
//! The task queue is the only component that mutates job rows; everything
//! else holds read views.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::CoreResult;
use crate::domain::models::{Job, JobStatus, QueueMetrics};

/// Repository interface for Job persistence.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a freshly enqueued job.
    async fn insert(&self, job: &Job) -> CoreResult<()>;

    /// Get a job by ID.
    async fn get(&self, id: Uuid) -> CoreResult<Option<Job>>;

    /// Atomically claim the next runnable job in a queue.
    ///
    /// Selects the single highest-priority (lowest number, then oldest
    /// `enqueued_at`) job that is `waiting`, or `delayed` with
    /// `delayed_until <= now`; flips it to `active`, stamps `started_at`,
    /// increments `attempts`, and returns it. Concurrent callers must
    /// never receive the same job.
    async fn claim_next(
        &self,
        queue: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Job>>;

    /// Transition an active job to `completed`.
    ///
    /// Returns a consistency error if the row was not `active` — some
    /// other worker has touched it.
    async fn mark_completed(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<()>;

    /// Transition an active job to `delayed` for a later retry.
    async fn mark_delayed(
        &self,
        id: Uuid,
        delayed_until: DateTime<Utc>,
        error: &str,
    ) -> CoreResult<()>;

    /// Transition an active job to `failed`, recording the error.
    async fn mark_failed(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> CoreResult<()>;

    /// Transition a failed job to `dead` once its dead-letter entry exists.
    async fn mark_dead(&self, id: Uuid) -> CoreResult<()>;

    /// Find a recent non-dead job in a queue by idempotency key.
    async fn find_by_idempotency_key(
        &self,
        queue: &str,
        key: &str,
        since: DateTime<Utc>,
    ) -> CoreResult<Option<Job>>;

    /// Counts by status for one queue.
    async fn queue_metrics(&self, queue: &str) -> CoreResult<QueueMetrics>;

    /// Names of all queues that currently hold any job rows.
    async fn queue_names(&self) -> CoreResult<Vec<String>>;

    /// Waiting + delayed jobs across all queues for one user.
    async fn depth_for_user(&self, user_id: &str) -> CoreResult<u64>;

    /// Active jobs for one user.
    async fn active_for_user(&self, user_id: &str) -> CoreResult<u64>;

    /// Jobs that reached the given status for a user since `since`.
    async fn count_since(
        &self,
        user_id: &str,
        status: JobStatus,
        since: DateTime<Utc>,
    ) -> CoreResult<u64>;

    /// Mean wall-time of completed jobs for a user since `since`,
    /// in milliseconds. Zero when no jobs completed.
    async fn avg_duration_ms_since(&self, user_id: &str, since: DateTime<Utc>) -> CoreResult<f64>;

    /// Delete terminal jobs older than `before`. Returns rows removed.
    async fn purge_terminal(&self, before: DateTime<Utc>) -> CoreResult<u64>;

    /// Distinct owners of job rows; the snapshotter sweeps these.
    async fn distinct_users(&self) -> CoreResult<Vec<String>>;
}
