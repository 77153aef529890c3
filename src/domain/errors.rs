//! Domain errors for the G-Pilot operations substrate.

use thiserror::Error;
use uuid::Uuid;

/// Core error taxonomy.
///
/// Retry policy is owned by the task queue and driven entirely by
/// [`CoreError::is_retryable`]; handlers never loop on their own.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input from a caller: bad plan, unknown queue, cyclic DAG,
    /// invalid payload shape. Surfaced synchronously, never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// I/O timeout, database contention, downstream 5xx. Retried with
    /// backoff up to the job's max attempts.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The handler has signalled that no retry can succeed
    /// (authentication failed, resource deleted). Dead-letters immediately.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// The job ran past its deadline. Retryable, but logged separately.
    #[error("Deadline exceeded after {0} ms")]
    DeadlineExceeded(u64),

    /// Queue overload or budget exhaustion. Surfaced to alerts; enqueues
    /// are still accepted.
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// An invariant violation was detected (e.g. two workers holding the
    /// same job). Fatal for the offending operation.
    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Mission not found: {0}")]
    MissionNotFound(Uuid),

    #[error("Webhook endpoint not found: {0}")]
    EndpointNotFound(Uuid),

    #[error("Alert rule not found: {0}")]
    RuleNotFound(Uuid),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Whether the queue should schedule another attempt for this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::DeadlineExceeded(_) | Self::Database(_)
        )
    }

    /// Whether this failure must abort without advancing the attempt
    /// counter. Consistency violations make no progress on corrupt state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Consistency(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_deadline_are_retryable() {
        assert!(CoreError::Transient("downstream 503".into()).is_retryable());
        assert!(CoreError::DeadlineExceeded(5000).is_retryable());
        assert!(CoreError::Database("locked".into()).is_retryable());
    }

    #[test]
    fn permanent_and_validation_are_not_retryable() {
        assert!(!CoreError::Permanent("auth revoked".into()).is_retryable());
        assert!(!CoreError::Validation("bad plan".into()).is_retryable());
        assert!(!CoreError::Capacity("budget".into()).is_retryable());
    }

    #[test]
    fn consistency_is_fatal_and_not_retryable() {
        let err = CoreError::Consistency("double claim".into());
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }
}
