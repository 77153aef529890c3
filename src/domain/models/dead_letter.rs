//! Dead-letter entries: the parking lot for exhausted or rejected jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::Job;

/// Why a job landed in the dead-letter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// All retry attempts were used.
    RetriesExhausted,
    /// The handler signalled a permanent failure.
    Permanent,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetriesExhausted => "retries_exhausted",
            Self::Permanent => "permanent",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "retries_exhausted" => Some(Self::RetriesExhausted),
            "permanent" => Some(Self::Permanent),
            _ => None,
        }
    }
}

/// A parked job, held until an operator replays or purges it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    /// Full snapshot of the job as it failed; replay re-enqueues from this.
    pub job_snapshot: Job,
    pub failure_reason: FailureReason,
    pub last_error: Option<String>,
    pub entered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl DeadLetterEntry {
    pub fn new(job: Job, reason: FailureReason) -> Self {
        Self {
            id: Uuid::new_v4(),
            last_error: job.error.clone(),
            job_snapshot: job,
            failure_reason: reason,
            entered_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::job::EnqueueOptions;

    #[test]
    fn entry_captures_last_error_from_job() {
        let mut job = Job::new(
            "default",
            "noop",
            serde_json::json!({}),
            EnqueueOptions::for_user("u1"),
        );
        job.error = Some("downstream 503".into());
        let entry = DeadLetterEntry::new(job, FailureReason::RetriesExhausted);
        assert_eq!(entry.last_error.as_deref(), Some("downstream 503"));
        assert!(!entry.is_resolved());
    }
}
