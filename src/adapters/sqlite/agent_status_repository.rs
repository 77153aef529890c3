//! SQLite implementation of the AgentStatusRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{AgentState, AgentStatus};
use crate::domain::ports::{AgentCounts, AgentStatusRepository};

#[derive(Clone)]
pub struct SqliteAgentStatusRepository {
    pool: SqlitePool,
}

impl SqliteAgentStatusRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentStatusRepository for SqliteAgentStatusRepository {
    async fn upsert(&self, status: &AgentStatus) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO agent_status (user_id, agent_name, state, current_job_id,
               started_at, last_active_at, total_executions, consecutive_failures, avg_duration_ms)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (user_id, agent_name) DO UPDATE SET
                   state = excluded.state,
                   current_job_id = excluded.current_job_id,
                   started_at = excluded.started_at,
                   last_active_at = excluded.last_active_at,
                   total_executions = excluded.total_executions,
                   consecutive_failures = excluded.consecutive_failures,
                   avg_duration_ms = excluded.avg_duration_ms"#,
        )
        .bind(&status.user_id)
        .bind(&status.agent_name)
        .bind(status.state.as_str())
        .bind(status.current_job_id.map(|id| id.to_string()))
        .bind(status.started_at.map(|t| t.to_rfc3339()))
        .bind(status.last_active_at.map(|t| t.to_rfc3339()))
        .bind(status.total_executions as i64)
        .bind(status.consecutive_failures as i64)
        .bind(status.avg_duration_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, user_id: &str, agent_name: &str) -> CoreResult<Option<AgentStatus>> {
        let row: Option<AgentStatusRow> =
            sqlx::query_as("SELECT * FROM agent_status WHERE user_id = ? AND agent_name = ?")
                .bind(user_id)
                .bind(agent_name)
                .fetch_optional(&self.pool)
                .await?;

        row.map(AgentStatus::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<AgentStatus>> {
        let rows: Vec<AgentStatusRow> =
            sqlx::query_as("SELECT * FROM agent_status WHERE user_id = ? ORDER BY agent_name")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(AgentStatus::try_from).collect()
    }

    async fn counts_for_user(&self, user_id: &str) -> CoreResult<AgentCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM agent_status WHERE user_id = ? GROUP BY state")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        let mut counts = AgentCounts::default();
        for (state, count) in rows {
            counts.total += count as u64;
            match AgentState::from_str(&state) {
                Some(AgentState::Active) => counts.active = count as u64,
                Some(AgentState::Idle) => counts.idle = count as u64,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn list_in_state(&self, user_id: &str, state: AgentState) -> CoreResult<Vec<AgentStatus>> {
        let rows: Vec<AgentStatusRow> = sqlx::query_as(
            "SELECT * FROM agent_status WHERE user_id = ? AND state = ? ORDER BY agent_name",
        )
        .bind(user_id)
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AgentStatus::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct AgentStatusRow {
    user_id: String,
    agent_name: String,
    state: String,
    current_job_id: Option<String>,
    started_at: Option<String>,
    last_active_at: Option<String>,
    total_executions: i64,
    consecutive_failures: i64,
    avg_duration_ms: f64,
}

impl TryFrom<AgentStatusRow> for AgentStatus {
    type Error = CoreError;

    fn try_from(row: AgentStatusRow) -> Result<Self, Self::Error> {
        let state = AgentState::from_str(&row.state)
            .ok_or_else(|| CoreError::Serialization(format!("invalid agent state: {}", row.state)))?;

        Ok(AgentStatus {
            user_id: row.user_id,
            agent_name: row.agent_name,
            state,
            current_job_id: super::parse_optional_uuid(row.current_job_id)?,
            started_at: super::parse_optional_datetime(row.started_at)?,
            last_active_at: super::parse_optional_datetime(row.last_active_at)?,
            total_executions: row.total_executions as u64,
            consecutive_failures: row.consecutive_failures as u32,
            avg_duration_ms: row.avg_duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use chrono::Utc;

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let repo = SqliteAgentStatusRepository::new(create_migrated_test_pool().await.unwrap());
        let mut status = AgentStatus::new("u1", "writer");
        status.begin(None, Utc::now());
        repo.upsert(&status).await.unwrap();

        status.complete(500, Utc::now());
        repo.upsert(&status).await.unwrap();

        let stored = repo.get("u1", "writer").await.unwrap().unwrap();
        assert_eq!(stored.state, AgentState::Idle);
        assert_eq!(stored.total_executions, 1);
        assert!((stored.avg_duration_ms - 500.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn counts_split_by_state() {
        let repo = SqliteAgentStatusRepository::new(create_migrated_test_pool().await.unwrap());
        let now = Utc::now();

        let mut active = AgentStatus::new("u1", "a");
        active.begin(None, now);
        repo.upsert(&active).await.unwrap();

        let mut idle = AgentStatus::new("u1", "b");
        idle.complete(10, now);
        repo.upsert(&idle).await.unwrap();

        let mut failed = AgentStatus::new("u1", "c");
        failed.fail(now);
        repo.upsert(&failed).await.unwrap();

        let counts = repo.counts_for_user("u1").await.unwrap();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.idle, 1);
        assert_eq!(counts.total, 3);

        // Other users see nothing.
        let other = repo.counts_for_user("u2").await.unwrap();
        assert_eq!(other.total, 0);
    }
}
