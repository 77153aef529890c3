//! Agent status and execution accounting.
//!
//! The substrate treats agents as opaque invocable units; the only state
//! kept per (user, agent) is the status row updated around every
//! invocation by the agent executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Smoothing factor for the per-agent duration moving average.
const DURATION_EWMA_ALPHA: f64 = 0.2;

/// Tokens that buy one credit.
pub const TOKENS_PER_CREDIT: u64 = 100_000;

/// Liveness state of an agent for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Active,
    Failed,
    Unknown,
}

impl Default for AgentState {
    fn default() -> Self {
        Self::Unknown
    }
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "active" => Some(Self::Active),
            "failed" => Some(Self::Failed),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Token counts reported by an agent invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Credits owed for this usage: `ceil(total / 100_000)`.
    pub fn credits(&self) -> u64 {
        self.total().div_ceil(TOKENS_PER_CREDIT)
    }
}

/// Result of one agent invocation, as returned by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub output: serde_json::Value,
    pub cost_credits: u64,
    pub duration_ms: u64,
    pub token_usage: Option<TokenUsage>,
}

/// One row per (user, agent), updated on every invocation transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub user_id: String,
    pub agent_name: String,
    pub state: AgentState,
    pub current_job_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub total_executions: u64,
    pub consecutive_failures: u32,
    pub avg_duration_ms: f64,
}

impl AgentStatus {
    pub fn new(user_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            agent_name: agent_name.into(),
            state: AgentState::Unknown,
            current_job_id: None,
            started_at: None,
            last_active_at: None,
            total_executions: 0,
            consecutive_failures: 0,
            avg_duration_ms: 0.0,
        }
    }

    /// Mark the agent busy with the given job.
    pub fn begin(&mut self, job_id: Option<Uuid>, now: DateTime<Utc>) {
        self.state = AgentState::Active;
        self.current_job_id = job_id;
        self.started_at = Some(now);
    }

    /// Record a successful invocation: back to idle, failures reset,
    /// duration folded into the moving average.
    pub fn complete(&mut self, duration_ms: u64, now: DateTime<Utc>) {
        self.state = AgentState::Idle;
        self.current_job_id = None;
        self.last_active_at = Some(now);
        self.total_executions += 1;
        self.consecutive_failures = 0;
        if self.avg_duration_ms == 0.0 {
            self.avg_duration_ms = duration_ms as f64;
        } else {
            self.avg_duration_ms = DURATION_EWMA_ALPHA * duration_ms as f64
                + (1.0 - DURATION_EWMA_ALPHA) * self.avg_duration_ms;
        }
    }

    /// Record a failed invocation.
    pub fn fail(&mut self, now: DateTime<Utc>) {
        self.state = AgentState::Failed;
        self.current_job_id = None;
        self.last_active_at = Some(now);
        self.total_executions += 1;
        self.consecutive_failures += 1;
    }
}
