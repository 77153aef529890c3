//! Dead-letter repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::CoreResult;
use crate::domain::models::DeadLetterEntry;

/// Repository interface for the dead-letter queue.
#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    async fn insert(&self, entry: &DeadLetterEntry) -> CoreResult<()>;

    async fn get(&self, id: Uuid) -> CoreResult<Option<DeadLetterEntry>>;

    /// Unresolved entries, oldest first.
    async fn list_unresolved(&self, limit: usize) -> CoreResult<Vec<DeadLetterEntry>>;

    /// Stamp `resolved_at` after a replay or manual resolution.
    async fn resolve(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<()>;

    /// Unresolved entries owned by one user.
    async fn count_unresolved_for_user(&self, user_id: &str) -> CoreResult<u64>;

    /// Delete entries that entered before `before`. Returns rows removed.
    async fn purge(&self, before: DateTime<Utc>) -> CoreResult<u64>;
}
