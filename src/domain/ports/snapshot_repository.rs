//! Metric snapshot repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::CoreResult;
use crate::domain::models::MetricSnapshot;

/// Repository interface for minute-resolution metric snapshots. Rows are
/// unique on (timestamp, user_id); the snapshotter is the sole writer.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Insert or overwrite the snapshot for (timestamp, user).
    /// Last-write-wins is acceptable: the writer is single.
    async fn upsert(&self, snapshot: &MetricSnapshot) -> CoreResult<()>;

    /// Snapshots for a user at or after `since`, oldest first.
    async fn list_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> CoreResult<Vec<MetricSnapshot>>;

    /// Delete snapshots older than `before`. Returns rows removed.
    async fn prune(&self, before: DateTime<Utc>) -> CoreResult<u64>;
}
