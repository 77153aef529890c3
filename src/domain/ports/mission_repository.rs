//! Mission repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::CoreResult;
use crate::domain::models::Mission;

/// Repository interface for Mission persistence. The mission executor is
/// the sole writer.
#[async_trait]
pub trait MissionRepository: Send + Sync {
    async fn insert(&self, mission: &Mission) -> CoreResult<()>;

    async fn get(&self, id: Uuid) -> CoreResult<Option<Mission>>;

    /// Persist status, result, audit, and cost fields.
    async fn update(&self, mission: &Mission) -> CoreResult<()>;

    /// Most recent missions for a user, newest first.
    async fn list_recent(&self, user_id: &str, limit: usize) -> CoreResult<Vec<Mission>>;

    /// Tokens consumed by missions a user completed since `since`.
    async fn tokens_since(&self, user_id: &str, since: DateTime<Utc>) -> CoreResult<u64>;

    /// Credits spent by missions a user completed since `since`.
    async fn cost_since(&self, user_id: &str, since: DateTime<Utc>) -> CoreResult<u64>;
}
