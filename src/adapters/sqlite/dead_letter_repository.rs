//! SQLite implementation of the DeadLetterRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{DeadLetterEntry, FailureReason, Job};
use crate::domain::ports::DeadLetterRepository;

#[derive(Clone)]
pub struct SqliteDeadLetterRepository {
    pool: SqlitePool,
}

impl SqliteDeadLetterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterRepository for SqliteDeadLetterRepository {
    async fn insert(&self, entry: &DeadLetterEntry) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO dead_letters (id, user_id, job_id, job_snapshot, failure_reason,
               last_error, entered_at, resolved_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.job_snapshot.user_id)
        .bind(entry.job_snapshot.id.to_string())
        .bind(serde_json::to_string(&entry.job_snapshot)?)
        .bind(entry.failure_reason.as_str())
        .bind(&entry.last_error)
        .bind(entry.entered_at.to_rfc3339())
        .bind(entry.resolved_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<DeadLetterEntry>> {
        let row: Option<DeadLetterRow> = sqlx::query_as("SELECT * FROM dead_letters WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(DeadLetterEntry::try_from).transpose()
    }

    async fn list_unresolved(&self, limit: usize) -> CoreResult<Vec<DeadLetterEntry>> {
        let rows: Vec<DeadLetterRow> = sqlx::query_as(
            "SELECT * FROM dead_letters WHERE resolved_at IS NULL ORDER BY entered_at LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeadLetterEntry::try_from).collect()
    }

    async fn resolve(&self, id: Uuid, now: DateTime<Utc>) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE dead_letters SET resolved_at = ? WHERE id = ? AND resolved_at IS NULL",
        )
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Validation(format!(
                "dead-letter entry {id} missing or already resolved"
            )));
        }
        Ok(())
    }

    async fn count_unresolved_for_user(&self, user_id: &str) -> CoreResult<u64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM dead_letters WHERE user_id = ? AND resolved_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 as u64)
    }

    async fn purge(&self, before: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM dead_letters WHERE entered_at < ?")
            .bind(before.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    id: String,
    #[allow(dead_code)]
    user_id: String,
    #[allow(dead_code)]
    job_id: String,
    job_snapshot: String,
    failure_reason: String,
    last_error: Option<String>,
    entered_at: String,
    resolved_at: Option<String>,
}

impl TryFrom<DeadLetterRow> for DeadLetterEntry {
    type Error = CoreError;

    fn try_from(row: DeadLetterRow) -> Result<Self, Self::Error> {
        let job_snapshot: Job = super::parse_json(&row.job_snapshot)?;
        let failure_reason = FailureReason::from_str(&row.failure_reason).ok_or_else(|| {
            CoreError::Serialization(format!("invalid failure reason: {}", row.failure_reason))
        })?;

        Ok(DeadLetterEntry {
            id: super::parse_uuid(&row.id)?,
            job_snapshot,
            failure_reason,
            last_error: row.last_error,
            entered_at: super::parse_datetime(&row.entered_at)?,
            resolved_at: super::parse_optional_datetime(row.resolved_at)?,
        })
    }
}
