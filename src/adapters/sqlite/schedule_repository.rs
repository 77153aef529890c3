//! SQLite implementation of the ScheduleRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::JobSchedule;
use crate::domain::ports::ScheduleRepository;

#[derive(Clone)]
pub struct SqliteScheduleRepository {
    pool: SqlitePool,
}

impl SqliteScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleRepository {
    async fn insert(&self, schedule: &JobSchedule) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO job_schedules (id, user_id, name, queue, job_type, payload, cron,
               is_active, last_fired_at, fire_count, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(schedule.id.to_string())
        .bind(&schedule.user_id)
        .bind(&schedule.name)
        .bind(&schedule.queue)
        .bind(&schedule.job_type)
        .bind(serde_json::to_string(&schedule.payload)?)
        .bind(&schedule.cron)
        .bind(schedule.is_active)
        .bind(schedule.last_fired_at.map(|t| t.to_rfc3339()))
        .bind(schedule.fire_count as i64)
        .bind(schedule.created_at.to_rfc3339())
        .bind(schedule.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<JobSchedule>> {
        let row: Option<ScheduleRow> = sqlx::query_as("SELECT * FROM job_schedules WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobSchedule::try_from).transpose()
    }

    async fn update(&self, schedule: &JobSchedule) -> CoreResult<()> {
        let result = sqlx::query(
            r#"UPDATE job_schedules SET name = ?, queue = ?, job_type = ?, payload = ?, cron = ?,
               is_active = ?, last_fired_at = ?, fire_count = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&schedule.name)
        .bind(&schedule.queue)
        .bind(&schedule.job_type)
        .bind(serde_json::to_string(&schedule.payload)?)
        .bind(&schedule.cron)
        .bind(schedule.is_active)
        .bind(schedule.last_fired_at.map(|t| t.to_rfc3339()))
        .bind(schedule.fire_count as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(schedule.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Validation(format!(
                "job schedule {} not found",
                schedule.id
            )));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM job_schedules WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Validation(format!("job schedule {id} not found")));
        }
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<JobSchedule>> {
        let rows: Vec<ScheduleRow> =
            sqlx::query_as("SELECT * FROM job_schedules WHERE user_id = ? ORDER BY name")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(JobSchedule::try_from).collect()
    }

    async fn list_active(&self) -> CoreResult<Vec<JobSchedule>> {
        let rows: Vec<ScheduleRow> =
            sqlx::query_as("SELECT * FROM job_schedules WHERE is_active = 1 ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(JobSchedule::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: String,
    user_id: String,
    name: String,
    queue: String,
    job_type: String,
    payload: String,
    cron: String,
    is_active: bool,
    last_fired_at: Option<String>,
    fire_count: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ScheduleRow> for JobSchedule {
    type Error = CoreError;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        Ok(JobSchedule {
            id: super::parse_uuid(&row.id)?,
            user_id: row.user_id,
            name: row.name,
            queue: row.queue,
            job_type: row.job_type,
            payload: super::parse_json(&row.payload)?,
            cron: row.cron,
            is_active: row.is_active,
            last_fired_at: super::parse_optional_datetime(row.last_fired_at)?,
            fire_count: row.fire_count as u64,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
        })
    }
}
