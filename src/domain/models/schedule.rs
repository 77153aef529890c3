//! Recurring job schedules and the fixed cron vocabulary.
//!
//! Only the expressions in [`CRON_VOCABULARY`] are recognized; anything
//! else falls back to hourly with a logged warning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// The recognized cron expressions and their intervals.
pub const CRON_VOCABULARY: &[(&str, Duration)] = &[
    ("* * * * *", Duration::from_secs(60)),
    ("*/5 * * * *", Duration::from_secs(5 * 60)),
    ("*/15 * * * *", Duration::from_secs(15 * 60)),
    ("*/30 * * * *", Duration::from_secs(30 * 60)),
    ("0 * * * *", Duration::from_secs(60 * 60)),
    ("0 */6 * * *", Duration::from_secs(6 * 60 * 60)),
    ("0 0 * * *", Duration::from_secs(24 * 60 * 60)),
];

/// Interval used when an expression is not in the vocabulary.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Map a cron expression to its polling interval.
///
/// Unknown expressions warn and fall back to hourly rather than failing:
/// a stored schedule must keep firing even if its expression predates the
/// current vocabulary.
pub fn cron_to_interval(expression: &str) -> Duration {
    let trimmed = expression.trim();
    for (expr, interval) in CRON_VOCABULARY {
        if *expr == trimmed {
            return *interval;
        }
    }
    tracing::warn!(
        expression = trimmed,
        "unrecognized cron expression, defaulting to hourly"
    );
    FALLBACK_INTERVAL
}

/// A persisted recurring enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSchedule {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    /// Queue and type of the job each fire enqueues.
    pub queue: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub cron: String,
    pub is_active: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub fire_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSchedule {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        queue: impl Into<String>,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        cron: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            name: name.into(),
            queue: queue.into(),
            job_type: job_type.into(),
            payload,
            cron: cron.into(),
            is_active: true,
            last_fired_at: None,
            fire_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn interval(&self) -> Duration {
        cron_to_interval(&self.cron)
    }

    /// Whether the schedule is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        match self.last_fired_at {
            None => true,
            Some(last) => {
                let elapsed = (now - last).to_std().unwrap_or_default();
                elapsed >= self.interval()
            }
        }
    }

    pub fn record_fire(&mut self, now: DateTime<Utc>) {
        self.last_fired_at = Some(now);
        self.fire_count += 1;
        self.updated_at = now;
    }
}
