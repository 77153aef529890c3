//! Agent status repository port.

use async_trait::async_trait;

use crate::domain::errors::CoreResult;
use crate::domain::models::{AgentState, AgentStatus};

/// Counts of agents per liveness bucket for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentCounts {
    pub active: u64,
    pub idle: u64,
    pub total: u64,
}

/// Repository interface for AgentStatus rows; the agent executor is the
/// sole writer.
#[async_trait]
pub trait AgentStatusRepository: Send + Sync {
    /// Insert or replace the row for (user, agent).
    async fn upsert(&self, status: &AgentStatus) -> CoreResult<()>;

    async fn get(&self, user_id: &str, agent_name: &str) -> CoreResult<Option<AgentStatus>>;

    async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<AgentStatus>>;

    async fn counts_for_user(&self, user_id: &str) -> CoreResult<AgentCounts>;

    /// Agents currently in the given state for a user.
    async fn list_in_state(&self, user_id: &str, state: AgentState) -> CoreResult<Vec<AgentStatus>>;
}
