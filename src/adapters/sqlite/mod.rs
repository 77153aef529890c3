//! SQLite implementations of the persistence ports.
//!
//! Every repository converts private `FromRow` structs into domain types;
//! driver rows never cross the adapter boundary.

pub mod agent_status_repository;
pub mod alert_repository;
pub mod connection;
pub mod dead_letter_repository;
pub mod job_repository;
pub mod migrations;
pub mod mission_repository;
pub mod schedule_repository;
pub mod snapshot_repository;
pub mod webhook_repository;

pub use agent_status_repository::SqliteAgentStatusRepository;
pub use alert_repository::SqliteAlertRepository;
pub use connection::{create_migrated_test_pool, create_pool, create_test_pool, PoolConfig};
pub use dead_letter_repository::SqliteDeadLetterRepository;
pub use job_repository::SqliteJobRepository;
pub use migrations::run_migrations;
pub use mission_repository::SqliteMissionRepository;
pub use schedule_repository::SqliteScheduleRepository;
pub use snapshot_repository::SqliteSnapshotRepository;
pub use webhook_repository::SqliteWebhookRepository;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};

pub(crate) fn parse_uuid(s: &str) -> CoreResult<Uuid> {
    Uuid::parse_str(s).map_err(|_| CoreError::Serialization(format!("invalid uuid: {s}")))
}

pub(crate) fn parse_optional_uuid(s: Option<String>) -> CoreResult<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

pub(crate) fn parse_datetime(s: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| CoreError::Serialization(format!("invalid timestamp: {s}")))
}

pub(crate) fn parse_optional_datetime(s: Option<String>) -> CoreResult<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_datetime).transpose()
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(s: &str) -> CoreResult<T> {
    serde_json::from_str(s).map_err(|e| CoreError::Serialization(format!("invalid json: {e}")))
}
