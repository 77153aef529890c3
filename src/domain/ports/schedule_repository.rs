//! Job schedule repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::CoreResult;
use crate::domain::models::JobSchedule;

/// Repository interface for recurring job schedules.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn insert(&self, schedule: &JobSchedule) -> CoreResult<()>;

    async fn get(&self, id: Uuid) -> CoreResult<Option<JobSchedule>>;

    async fn update(&self, schedule: &JobSchedule) -> CoreResult<()>;

    async fn delete(&self, id: Uuid) -> CoreResult<()>;

    async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<JobSchedule>>;

    /// All active schedules across users, for the scheduler tick.
    async fn list_active(&self) -> CoreResult<Vec<JobSchedule>>;
}
