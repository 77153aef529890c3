//! Interface-segregation seams between the task queue and the metrics
//! collector.
//!
//! The collector reads queue state through [`QueueStatsSource`]; the queue
//! publishes lifecycle events into a [`TelemetrySink`]. Neither side names
//! the other's concrete type.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::CoreResult;
use crate::domain::models::QueueMetrics;

/// Read view over queue state, consumed by the metrics collector.
#[async_trait]
pub trait QueueStatsSource: Send + Sync {
    /// Names of all known queues.
    async fn queue_names(&self) -> CoreResult<Vec<String>>;

    /// Per-status counts for one queue.
    async fn queue_metrics(&self, queue: &str) -> CoreResult<QueueMetrics>;

    /// Waiting + delayed jobs across all queues for one user.
    async fn depth_for_user(&self, user_id: &str) -> CoreResult<u64>;

    /// Active jobs across all queues for one user.
    async fn active_for_user(&self, user_id: &str) -> CoreResult<u64>;
}

/// A job lifecycle event published by the task queue.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started {
        job_id: Uuid,
        queue: String,
        job_type: String,
        attempt: u32,
    },
    Completed {
        job_id: Uuid,
        queue: String,
        job_type: String,
        duration_ms: u64,
        mission_id: Option<Uuid>,
    },
    Retried {
        job_id: Uuid,
        queue: String,
        attempt: u32,
        backoff_ms: u64,
    },
    DeadLettered {
        job_id: Uuid,
        queue: String,
        error: String,
    },
}

/// Write-only sink for job lifecycle telemetry.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: JobEvent);
}

/// Sink that forwards events to structured logging.
#[derive(Debug, Clone, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn record(&self, event: JobEvent) {
        match event {
            JobEvent::Started {
                job_id,
                queue,
                job_type,
                attempt,
            } => {
                tracing::debug!(%job_id, queue, job_type, attempt, "job started");
            }
            JobEvent::Completed {
                job_id,
                queue,
                job_type,
                duration_ms,
                mission_id,
            } => {
                tracing::info!(
                    %job_id,
                    queue,
                    job_type,
                    duration_ms,
                    mission_id = mission_id.map(|m| m.to_string()),
                    "job completed"
                );
            }
            JobEvent::Retried {
                job_id,
                queue,
                attempt,
                backoff_ms,
            } => {
                tracing::warn!(%job_id, queue, attempt, backoff_ms, "job retry scheduled");
            }
            JobEvent::DeadLettered { job_id, queue, error } => {
                tracing::error!(%job_id, queue, error, "job dead-lettered");
            }
        }
    }
}
