//! SQLite implementation of the MissionRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{Mission, MissionPlan, MissionStatus, StepOutcome};
use crate::domain::ports::MissionRepository;

#[derive(Clone)]
pub struct SqliteMissionRepository {
    pool: SqlitePool,
}

impl SqliteMissionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MissionRepository for SqliteMissionRepository {
    async fn insert(&self, mission: &Mission) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO missions (id, user_id, status, plan, result, audit,
               total_cost, agent_costs, total_tokens, failed_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(mission.id.to_string())
        .bind(&mission.user_id)
        .bind(mission.status.as_str())
        .bind(serde_json::to_string(&mission.plan)?)
        .bind(serde_json::to_string(&mission.result)?)
        .bind(serde_json::to_string(&mission.audit)?)
        .bind(mission.total_cost as i64)
        .bind(serde_json::to_string(&mission.agent_costs)?)
        .bind(mission.total_tokens as i64)
        .bind(&mission.failed_at)
        .bind(mission.created_at.to_rfc3339())
        .bind(mission.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Mission>> {
        let row: Option<MissionRow> = sqlx::query_as("SELECT * FROM missions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Mission::try_from).transpose()
    }

    async fn update(&self, mission: &Mission) -> CoreResult<()> {
        let result = sqlx::query(
            r#"UPDATE missions SET status = ?, result = ?, audit = ?, total_cost = ?,
               agent_costs = ?, total_tokens = ?, failed_at = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(mission.status.as_str())
        .bind(serde_json::to_string(&mission.result)?)
        .bind(serde_json::to_string(&mission.audit)?)
        .bind(mission.total_cost as i64)
        .bind(serde_json::to_string(&mission.agent_costs)?)
        .bind(mission.total_tokens as i64)
        .bind(&mission.failed_at)
        .bind(mission.updated_at.to_rfc3339())
        .bind(mission.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::MissionNotFound(mission.id));
        }
        Ok(())
    }

    async fn list_recent(&self, user_id: &str, limit: usize) -> CoreResult<Vec<Mission>> {
        let rows: Vec<MissionRow> = sqlx::query_as(
            "SELECT * FROM missions WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Mission::try_from).collect()
    }

    async fn tokens_since(&self, user_id: &str, since: DateTime<Utc>) -> CoreResult<u64> {
        let row: (Option<i64>,) = sqlx::query_as(
            r#"SELECT SUM(total_tokens) FROM missions
               WHERE user_id = ? AND status = 'COMPLETED' AND updated_at >= ?"#,
        )
        .bind(user_id)
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.unwrap_or(0).max(0) as u64)
    }

    async fn cost_since(&self, user_id: &str, since: DateTime<Utc>) -> CoreResult<u64> {
        let row: (Option<i64>,) = sqlx::query_as(
            r#"SELECT SUM(total_cost) FROM missions
               WHERE user_id = ? AND status = 'COMPLETED' AND updated_at >= ?"#,
        )
        .bind(user_id)
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.unwrap_or(0).max(0) as u64)
    }
}

#[derive(sqlx::FromRow)]
struct MissionRow {
    id: String,
    user_id: String,
    status: String,
    plan: String,
    result: String,
    audit: String,
    total_cost: i64,
    agent_costs: String,
    total_tokens: i64,
    failed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<MissionRow> for Mission {
    type Error = CoreError;

    fn try_from(row: MissionRow) -> Result<Self, Self::Error> {
        let status = MissionStatus::from_str(&row.status).ok_or_else(|| {
            CoreError::Serialization(format!("invalid mission status: {}", row.status))
        })?;
        let plan: MissionPlan = super::parse_json(&row.plan)?;
        let audit: Vec<StepOutcome> = super::parse_json(&row.audit)?;
        let agent_costs: HashMap<String, u64> = super::parse_json(&row.agent_costs)?;

        Ok(Mission {
            id: super::parse_uuid(&row.id)?,
            user_id: row.user_id,
            status,
            plan,
            result: super::parse_json(&row.result)?,
            audit,
            total_cost: row.total_cost as u64,
            agent_costs,
            total_tokens: row.total_tokens as u64,
            failed_at: row.failed_at,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::StepSpec;

    fn plan() -> MissionPlan {
        MissionPlan::new(vec![StepSpec {
            agent: "a".into(),
            input: serde_json::Value::Null,
            dependencies: vec![],
            condition: None,
            continue_on_error: false,
        }])
    }

    #[tokio::test]
    async fn insert_get_update_round_trip() {
        let repo = SqliteMissionRepository::new(create_migrated_test_pool().await.unwrap());
        let mut mission = Mission::new("u1", plan());
        repo.insert(&mission).await.unwrap();

        mission.status = MissionStatus::Running;
        mission.record_completed("a", serde_json::json!({"score": 1}), 2, 150, 200_000);
        mission.status = MissionStatus::Completed;
        repo.update(&mission).await.unwrap();

        let stored = repo.get(mission.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MissionStatus::Completed);
        assert_eq!(stored.total_cost, 2);
        assert_eq!(stored.total_tokens, 200_000);
        assert_eq!(stored.agent_costs.get("a"), Some(&2));
        assert_eq!(stored.audit.len(), 1);
    }

    #[tokio::test]
    async fn tokens_since_counts_only_completed() {
        let repo = SqliteMissionRepository::new(create_migrated_test_pool().await.unwrap());
        let mut done = Mission::new("u1", plan());
        done.record_completed("a", serde_json::Value::Null, 1, 10, 150_000);
        done.status = MissionStatus::Completed;
        repo.insert(&done).await.unwrap();
        repo.update(&done).await.unwrap();

        let mut failed = Mission::new("u1", plan());
        failed.record_completed("a", serde_json::Value::Null, 1, 10, 999_999);
        failed.status = MissionStatus::Failed;
        repo.insert(&failed).await.unwrap();
        repo.update(&failed).await.unwrap();

        let since = Utc::now() - chrono::Duration::minutes(5);
        assert_eq!(repo.tokens_since("u1", since).await.unwrap(), 150_000);
        assert_eq!(repo.cost_since("u1", since).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_unknown_mission_is_not_found() {
        let repo = SqliteMissionRepository::new(create_migrated_test_pool().await.unwrap());
        let mission = Mission::new("u1", plan());
        let err = repo.update(&mission).await.unwrap_err();
        assert!(matches!(err, CoreError::MissionNotFound(_)));
    }
}
