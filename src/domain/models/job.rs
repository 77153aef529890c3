//! Job domain model.
//!
//! Jobs are the durable unit of queued work. Each job lives in exactly one
//! named queue and moves through a closed state machine driven by the task
//! queue; no other component writes job rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Enqueued and eligible to be claimed.
    Waiting,
    /// Claimed by a worker; owns exactly one worker slot.
    Active,
    /// Handler returned successfully.
    Completed,
    /// Retries exhausted or permanent failure.
    Failed,
    /// Scheduled for a later attempt; becomes claimable once
    /// `delayed_until` passes.
    Delayed,
    /// Parked in the dead-letter queue.
    Dead,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Waiting
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Delayed => "delayed",
            Self::Dead => "dead",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "waiting" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "delayed" => Some(Self::Delayed),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dead)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [JobStatus] {
        match self {
            Self::Waiting => &[Self::Active],
            Self::Active => &[Self::Completed, Self::Failed, Self::Delayed],
            Self::Delayed => &[Self::Active, Self::Waiting],
            Self::Failed => &[Self::Dead],
            Self::Completed => &[],
            Self::Dead => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Options accepted at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Lower runs first.
    pub priority: i32,
    /// Maximum delivery attempts before dead-lettering.
    pub max_attempts: u32,
    /// Base of the exponential backoff schedule.
    pub backoff_base_ms: u64,
    /// Initial delay before the job becomes claimable.
    pub delay_ms: Option<u64>,
    /// Owner of the job; all telemetry is attributed per user.
    pub user_id: String,
    /// Deduplication key: a matching non-dead job in the same queue within
    /// the last 24 hours short-circuits the insert.
    pub idempotency_key: Option<String>,
    /// Mission this job belongs to, when spawned by the mission executor.
    pub mission_id: Option<Uuid>,
}

impl EnqueueOptions {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            priority: 0,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            delay_ms: None,
            user_id: user_id.into(),
            idempotency_key: None,
            mission_id: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff_base_ms(mut self, base_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_mission(mut self, mission_id: Uuid) -> Self {
        self.mission_id = Some(mission_id);
        self
    }
}

/// Counts of jobs per status within one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

impl QueueMetrics {
    /// Jobs not yet picked up: waiting plus delayed.
    pub fn depth(&self) -> u64 {
        self.waiting + self.delayed
    }
}

/// A durable unit of queued work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub id: Uuid,
    /// Name of the queue this job belongs to.
    pub queue: String,
    /// Handler discriminator within the queue.
    pub job_type: String,
    /// Opaque payload; validated against the handler's payload type at
    /// enqueue time.
    pub payload: serde_json::Value,
    /// Current status.
    pub status: JobStatus,
    /// Lower runs first; ties broken by `enqueued_at`.
    pub priority: i32,
    /// Delivery attempts so far.
    pub attempts: u32,
    /// Attempts allowed before dead-lettering.
    pub max_attempts: u32,
    /// Base of the exponential backoff schedule.
    pub backoff_base_ms: u64,
    /// When a delayed job becomes claimable again.
    pub delayed_until: Option<DateTime<Utc>>,
    /// Owning user.
    pub user_id: String,
    /// Deduplication key, if any.
    pub idempotency_key: Option<String>,
    /// Last error recorded by a failed attempt.
    pub error: Option<String>,
    /// Mission this job belongs to, if it was spawned by the mission
    /// executor.
    pub mission_id: Option<Uuid>,
    /// When the job was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// When the current (or last) attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal or failed state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        queue: impl Into<String>,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Self {
        let now = Utc::now();
        let delayed_until = options
            .delay_ms
            .map(|ms| now + chrono::Duration::milliseconds(ms as i64));
        Self {
            id: Uuid::new_v4(),
            queue: queue.into(),
            job_type: job_type.into(),
            payload,
            status: if delayed_until.is_some() {
                JobStatus::Delayed
            } else {
                JobStatus::Waiting
            },
            priority: options.priority,
            attempts: 0,
            max_attempts: options.max_attempts.max(1),
            backoff_base_ms: options.backoff_base_ms,
            delayed_until,
            user_id: options.user_id,
            idempotency_key: options.idempotency_key,
            error: None,
            mission_id: options.mission_id,
            enqueued_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_mission(mut self, mission_id: Uuid) -> Self {
        self.mission_id = Some(mission_id);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether another attempt remains after a retryable failure.
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Compute the backoff before the next attempt:
    /// `min(base * 2^(attempts-1), 60_000)` milliseconds, before jitter.
    ///
    /// The task queue adds up to 10% random jitter on top; keeping the
    /// deterministic part here makes the schedule testable.
    pub fn backoff_ms(&self) -> u64 {
        let attempt = self.attempts.max(1);
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.backoff_base_ms.saturating_mul(1u64 << exp);
        raw.min(60_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_is_waiting() {
        let job = Job::new(
            "default",
            "noop",
            serde_json::json!({}),
            EnqueueOptions::for_user("u1"),
        );
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempts, 0);
        assert!(job.delayed_until.is_none());
    }

    #[test]
    fn delayed_job_starts_delayed() {
        let job = Job::new(
            "default",
            "noop",
            serde_json::json!({}),
            EnqueueOptions::for_user("u1").with_delay_ms(5_000),
        );
        assert_eq!(job.status, JobStatus::Delayed);
        assert!(job.delayed_until.unwrap() > Utc::now());
    }

    #[test]
    fn max_attempts_floor_is_one() {
        let job = Job::new(
            "default",
            "noop",
            serde_json::json!({}),
            EnqueueOptions::for_user("u1").with_max_attempts(0),
        );
        assert_eq!(job.max_attempts, 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut job = Job::new(
            "default",
            "noop",
            serde_json::json!({}),
            EnqueueOptions::for_user("u1").with_backoff_base_ms(100),
        );
        job.attempts = 1;
        assert_eq!(job.backoff_ms(), 100);
        job.attempts = 2;
        assert_eq!(job.backoff_ms(), 200);
        job.attempts = 3;
        assert_eq!(job.backoff_ms(), 400);
        job.attempts = 30;
        assert_eq!(job.backoff_ms(), 60_000);
    }

    #[test]
    fn terminal_states_admit_no_transitions() {
        assert!(JobStatus::Completed.valid_transitions().is_empty());
        assert!(JobStatus::Dead.valid_transitions().is_empty());
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Waiting));
    }

    #[test]
    fn active_can_complete_fail_or_delay() {
        assert!(JobStatus::Active.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Active.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Active.can_transition_to(JobStatus::Delayed));
        assert!(!JobStatus::Active.can_transition_to(JobStatus::Waiting));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            JobStatus::Waiting,
            JobStatus::Active,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Delayed,
            JobStatus::Dead,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::from_str("bogus"), None);
    }
}
