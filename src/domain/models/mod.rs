//! Domain models for the operations substrate.

pub mod agent;
pub mod alert;
pub mod dead_letter;
pub mod job;
pub mod metrics;
pub mod mission;
pub mod schedule;
pub mod webhook;

pub use agent::{AgentState, AgentStatus, ExecutionReport, TokenUsage, TOKENS_PER_CREDIT};
pub use alert::{AlertCondition, AlertFiring, AlertRule, NotificationChannel};
pub use dead_letter::{DeadLetterEntry, FailureReason};
pub use job::{EnqueueOptions, Job, JobStatus, QueueMetrics};
pub use metrics::{
    floor_to_minute, Aggregates, DataPoint, HealthStatus, MetricKind, MetricSnapshot, Resolution,
    SystemMetrics, TimeRange, TimeSeries,
};
pub use mission::{Mission, MissionPlan, MissionStatus, StepOutcome, StepSpec};
pub use schedule::{cron_to_interval, JobSchedule, CRON_VOCABULARY, FALLBACK_INTERVAL};
pub use webhook::{
    DeliveryStatus, WebhookDelivery, WebhookEndpoint, WebhookEvent, RESPONSE_BODY_CAP,
};
