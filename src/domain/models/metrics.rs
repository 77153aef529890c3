//! Metric types: current system view, minute snapshots, time-series
//! queries, and the health score.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of one user's slice of the system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// Waiting + delayed jobs summed across all queues.
    pub queue_depth: u64,
    pub active_jobs: u64,
    /// Failures within the 5-minute window.
    pub failed_jobs: u64,
    /// Completions within the 5-minute window.
    pub completed_jobs: u64,
    pub active_agents: u64,
    pub idle_agents: u64,
    /// Total agents with a status row (any state).
    pub registered_agents: u64,
    pub dead_letter_count: u64,
    /// Completed jobs per minute, averaged over the 5-minute window.
    pub jobs_per_minute: f64,
    /// Credits per hour projected from the window.
    pub cost_per_hour: f64,
    /// Tokens per minute from missions completed in the window.
    pub tokens_per_minute: f64,
    /// failed / (completed + failed) over the window; 0 when idle.
    pub error_rate: f64,
    /// Mean job duration over the last 60 minutes, milliseconds.
    pub avg_job_duration_ms: f64,
    pub alerts_firing: u64,
    pub alerts_resolved: u64,
}

/// Coarse health classification derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl SystemMetrics {
    /// Health score in [0, 100], monotonic in goodness.
    pub fn health_score(&self) -> u8 {
        let mut score = 100.0;
        score -= 50.0 * self.error_rate.clamp(0.0, 1.0);
        if self.queue_depth > 100 {
            score -= 10.0;
        } else if self.queue_depth > 50 {
            score -= 5.0;
        }
        if self.failed_jobs > 10 {
            score -= 10.0;
        } else if self.failed_jobs > 5 {
            score -= 5.0;
        }
        if self.registered_agents == 0 {
            score -= 20.0;
        }
        score.clamp(0.0, 100.0).round() as u8
    }

    /// Value of one metric. `BudgetUsage` lives outside this view and
    /// reads as `None`.
    pub fn value(&self, metric: MetricKind) -> Option<f64> {
        match metric {
            MetricKind::QueueDepth => Some(self.queue_depth as f64),
            MetricKind::ActiveJobs => Some(self.active_jobs as f64),
            MetricKind::FailedJobs => Some(self.failed_jobs as f64),
            MetricKind::CompletedJobs => Some(self.completed_jobs as f64),
            MetricKind::ActiveAgents => Some(self.active_agents as f64),
            MetricKind::IdleAgents => Some(self.idle_agents as f64),
            MetricKind::JobsPerMinute => Some(self.jobs_per_minute),
            MetricKind::CostPerHour => Some(self.cost_per_hour),
            MetricKind::TokensPerMinute => Some(self.tokens_per_minute),
            MetricKind::ErrorRate => Some(self.error_rate),
            MetricKind::BudgetUsage => None,
        }
    }

    pub fn health_status(&self) -> HealthStatus {
        let score = self.health_score();
        if score >= 80 {
            HealthStatus::Healthy
        } else if score >= 50 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }
}

/// Metric columns a snapshot carries; also the vocabulary of alert rules
/// and time-series queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    QueueDepth,
    ActiveJobs,
    FailedJobs,
    CompletedJobs,
    ActiveAgents,
    IdleAgents,
    JobsPerMinute,
    CostPerHour,
    TokensPerMinute,
    ErrorRate,
    /// Not collected here; supplied by the wallet collaborator.
    BudgetUsage,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueDepth => "queue_depth",
            Self::ActiveJobs => "active_jobs",
            Self::FailedJobs => "failed_jobs",
            Self::CompletedJobs => "completed_jobs",
            Self::ActiveAgents => "active_agents",
            Self::IdleAgents => "idle_agents",
            Self::JobsPerMinute => "jobs_per_minute",
            Self::CostPerHour => "cost_per_hour",
            Self::TokensPerMinute => "tokens_per_minute",
            Self::ErrorRate => "error_rate",
            Self::BudgetUsage => "budget_usage",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queue_depth" => Some(Self::QueueDepth),
            "active_jobs" => Some(Self::ActiveJobs),
            "failed_jobs" => Some(Self::FailedJobs),
            "completed_jobs" => Some(Self::CompletedJobs),
            "active_agents" => Some(Self::ActiveAgents),
            "idle_agents" => Some(Self::IdleAgents),
            "jobs_per_minute" => Some(Self::JobsPerMinute),
            "cost_per_hour" => Some(Self::CostPerHour),
            "tokens_per_minute" => Some(Self::TokensPerMinute),
            "error_rate" => Some(Self::ErrorRate),
            "budget_usage" => Some(Self::BudgetUsage),
            _ => None,
        }
    }
}

/// One minute-resolution row of aggregate metrics for one user.
/// Unique on (timestamp, user_id); timestamps are floored to the minute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub queue_depth: u64,
    pub active_jobs: u64,
    pub failed_jobs: u64,
    pub completed_jobs: u64,
    pub active_agents: u64,
    pub idle_agents: u64,
    pub jobs_per_minute: f64,
    pub cost_per_hour: f64,
    pub tokens_per_minute: f64,
    pub error_rate: f64,
}

impl MetricSnapshot {
    /// Build a snapshot from a current view, flooring `now` to the minute.
    pub fn from_metrics(user_id: impl Into<String>, now: DateTime<Utc>, m: &SystemMetrics) -> Self {
        Self {
            timestamp: floor_to_minute(now),
            user_id: user_id.into(),
            queue_depth: m.queue_depth,
            active_jobs: m.active_jobs,
            failed_jobs: m.failed_jobs,
            completed_jobs: m.completed_jobs,
            active_agents: m.active_agents,
            idle_agents: m.idle_agents,
            jobs_per_minute: m.jobs_per_minute,
            cost_per_hour: m.cost_per_hour,
            tokens_per_minute: m.tokens_per_minute,
            error_rate: m.error_rate,
        }
    }

    /// Value of one metric column; `BudgetUsage` is not stored in
    /// snapshots and reads as zero.
    pub fn value(&self, metric: MetricKind) -> f64 {
        match metric {
            MetricKind::QueueDepth => self.queue_depth as f64,
            MetricKind::ActiveJobs => self.active_jobs as f64,
            MetricKind::FailedJobs => self.failed_jobs as f64,
            MetricKind::CompletedJobs => self.completed_jobs as f64,
            MetricKind::ActiveAgents => self.active_agents as f64,
            MetricKind::IdleAgents => self.idle_agents as f64,
            MetricKind::JobsPerMinute => self.jobs_per_minute,
            MetricKind::CostPerHour => self.cost_per_hour,
            MetricKind::TokensPerMinute => self.tokens_per_minute,
            MetricKind::ErrorRate => self.error_rate,
            MetricKind::BudgetUsage => 0.0,
        }
    }
}

/// Floor a timestamp to its minute boundary.
pub fn floor_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::minutes(1))
        .unwrap_or_else(|_| ts - Duration::seconds(ts.timestamp() % 60))
}

/// Query window for time-series reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl TimeRange {
    pub fn duration(&self) -> Duration {
        match self {
            Self::Hour => Duration::hours(1),
            Self::SixHours => Duration::hours(6),
            Self::Day => Duration::hours(24),
            Self::Week => Duration::days(7),
            Self::Month => Duration::days(30),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1h" => Some(Self::Hour),
            "6h" => Some(Self::SixHours),
            "24h" => Some(Self::Day),
            "7d" => Some(Self::Week),
            "30d" => Some(Self::Month),
            _ => None,
        }
    }
}

/// Bucket width for down-sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1m")]
    Minute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "1d")]
    Day,
}

impl Resolution {
    pub fn seconds(&self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::FiveMinutes => 300,
            Self::FifteenMinutes => 900,
            Self::Hour => 3_600,
            Self::Day => 86_400,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::Minute),
            "5m" => Some(Self::FiveMinutes),
            "15m" => Some(Self::FifteenMinutes),
            "1h" => Some(Self::Hour),
            "1d" => Some(Self::Day),
            _ => None,
        }
    }
}

/// One down-sampled point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Summary statistics over a queried series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregates {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub current: f64,
}

/// A queried time series: bucketed points plus aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub metric: MetricKind,
    pub data_points: Vec<DataPoint>,
    pub aggregates: Aggregates,
}
