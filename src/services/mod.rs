//! Service layer: the queue, executors, telemetry, and the runtime that
//! composes them.

pub mod agent_executor;
pub mod alert_evaluator;
pub mod condition;
pub mod config;
pub mod job_context;
pub mod metrics_collector;
pub mod mission_executor;
pub mod rate_limit;
pub mod runtime;
pub mod schedule_service;
pub mod snapshotter;
pub mod task_queue;
pub mod webhook_dispatcher;
pub mod webhook_signature;

pub use agent_executor::{Agent, AgentExecutor, AgentOutput, FnAgent};
pub use alert_evaluator::AlertEvaluator;
pub use condition::{Condition, ConditionScope};
pub use config::{ApiConfig, Config, ConfigError, LogConfig};
pub use job_context::{JobContext, JobHandler, LogEntry, LogSink, TypedHandler};
pub use metrics_collector::MetricsCollector;
pub use mission_executor::{MissionConfig, MissionExecutor};
pub use rate_limit::TokenBucketLimiter;
pub use runtime::{exit_code, Collaborators, Runtime, MISSION_QUEUE, RUN_MISSION_JOB_TYPE};
pub use schedule_service::ScheduleService;
pub use snapshotter::Snapshotter;
pub use task_queue::{QueueConfig, TaskQueue};
pub use webhook_dispatcher::{
    DispatcherConfig, WebhookDispatcher, DELIVERY_FAILED_EVENT, DELIVER_JOB_TYPE, WEBHOOK_QUEUE,
};
pub use webhook_signature::{sign, verify, SIGNATURE_HEADER};
