//! Agent registry and executor.
//!
//! Agents are opaque invocable units keyed by name. The executor looks up
//! the handler, runs it under the invocation context, and is the only
//! writer of AgentStatus rows: active on entry, idle or failed on exit,
//! with cost and duration bookkeeping.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{AgentStatus, ExecutionReport, TokenUsage};
use crate::domain::ports::AgentStatusRepository;
use crate::services::job_context::JobContext;

/// Raw result of one agent invocation, before cost accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutput {
    pub output: serde_json::Value,
    /// Token counts when the agent surfaces them; absent usage costs
    /// zero credits and is logged as a warning.
    pub token_usage: Option<TokenUsage>,
}

impl AgentOutput {
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            token_usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = Some(usage);
        self
    }
}

/// An in-process agent implementation.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn run(&self, input: serde_json::Value, ctx: &JobContext) -> CoreResult<AgentOutput>;
}

/// Adapter turning a plain async function into an [`Agent`].
pub struct FnAgent<F> {
    f: F,
}

impl<F> FnAgent<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Agent for FnAgent<F>
where
    F: Fn(serde_json::Value, JobContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = CoreResult<AgentOutput>> + Send,
{
    async fn run(&self, input: serde_json::Value, ctx: &JobContext) -> CoreResult<AgentOutput> {
        (self.f)(input, ctx.clone()).await
    }
}

/// Registry plus executor with status bookkeeping.
pub struct AgentExecutor {
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
    statuses: Arc<dyn AgentStatusRepository>,
}

impl AgentExecutor {
    pub fn new(statuses: Arc<dyn AgentStatusRepository>) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            statuses,
        }
    }

    /// Register an agent under a name. Registering twice is an error.
    pub fn register(&self, name: impl Into<String>, agent: Arc<dyn Agent>) -> CoreResult<()> {
        let name = name.into();
        let mut agents = self
            .agents
            .write()
            .map_err(|_| CoreError::Consistency("agent registry poisoned".into()))?;
        if agents.contains_key(&name) {
            return Err(CoreError::Validation(format!(
                "agent '{name}' already registered"
            )));
        }
        agents.insert(name, agent);
        Ok(())
    }

    /// Register a plain async function as an agent.
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F) -> CoreResult<()>
    where
        F: Fn(serde_json::Value, JobContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CoreResult<AgentOutput>> + Send + 'static,
    {
        self.register(name, Arc::new(FnAgent::new(f)))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.agents.read().map(|a| a.contains_key(name)).unwrap_or(false)
    }

    fn lookup(&self, name: &str) -> CoreResult<Arc<dyn Agent>> {
        self.agents
            .read()
            .map_err(|_| CoreError::Consistency("agent registry poisoned".into()))?
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::Validation(format!("unknown agent '{name}'")))
    }

    /// Invoke an agent with status and cost bookkeeping.
    pub async fn execute(
        &self,
        agent_name: &str,
        input: serde_json::Value,
        ctx: &JobContext,
    ) -> CoreResult<ExecutionReport> {
        let agent = self.lookup(agent_name)?;

        let mut status = self
            .statuses
            .get(&ctx.user_id, agent_name)
            .await?
            .unwrap_or_else(|| AgentStatus::new(&ctx.user_id, agent_name));
        status.begin(Some(ctx.job_id), Utc::now());
        self.statuses.upsert(&status).await?;

        let started = std::time::Instant::now();
        let result = agent.run(input, ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(agent_output) => {
                status.complete(duration_ms, Utc::now());
                self.statuses.upsert(&status).await?;

                let cost_credits = match agent_output.token_usage {
                    Some(usage) => usage.credits(),
                    None => {
                        ctx.log(format!(
                            "agent '{agent_name}' reported no token usage; cost recorded as 0"
                        ));
                        tracing::warn!(
                            agent = agent_name,
                            user_id = %ctx.user_id,
                            "no token usage reported, cost recorded as 0"
                        );
                        0
                    }
                };

                Ok(ExecutionReport {
                    output: agent_output.output,
                    cost_credits,
                    duration_ms,
                    token_usage: agent_output.token_usage,
                })
            }
            Err(err) => {
                status.fail(Utc::now());
                self.statuses.upsert(&status).await?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteAgentStatusRepository};
    use crate::domain::models::AgentState;

    async fn executor() -> AgentExecutor {
        let pool = create_migrated_test_pool().await.unwrap();
        AgentExecutor::new(Arc::new(SqliteAgentStatusRepository::new(pool)))
    }

    fn ctx() -> JobContext {
        JobContext::detached("u1", 5_000).0
    }

    #[tokio::test]
    async fn unknown_agent_is_a_validation_error() {
        let exec = executor().await;
        let err = exec
            .execute("ghost", serde_json::Value::Null, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let exec = executor().await;
        exec.register_fn("a", |_i, _c| async move { Ok(AgentOutput::new(serde_json::Value::Null)) })
            .unwrap();
        let err = exec
            .register_fn("a", |_i, _c| async move { Ok(AgentOutput::new(serde_json::Value::Null)) })
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn success_records_cost_and_idle_status() {
        let exec = executor().await;
        exec.register_fn("writer", |input, _c| async move {
            Ok(AgentOutput::new(input).with_usage(TokenUsage::new(150_000, 50_000)))
        })
        .unwrap();

        let report = exec
            .execute("writer", serde_json::json!({"topic": "x"}), &ctx())
            .await
            .unwrap();
        assert_eq!(report.cost_credits, 2);
        assert_eq!(report.output, serde_json::json!({"topic": "x"}));
        assert_eq!(report.token_usage.unwrap().total(), 200_000);

        let status = exec.statuses.get("u1", "writer").await.unwrap().unwrap();
        assert_eq!(status.state, AgentState::Idle);
        assert_eq!(status.total_executions, 1);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_active_at.is_some());
    }

    #[tokio::test]
    async fn missing_usage_costs_zero_and_warns_via_sink() {
        let exec = executor().await;
        exec.register_fn("cheap", |_i, _c| async move {
            Ok(AgentOutput::new(serde_json::json!("done")))
        })
        .unwrap();

        let context = ctx();
        let report = exec
            .execute("cheap", serde_json::Value::Null, &context)
            .await
            .unwrap();
        assert_eq!(report.cost_credits, 0);
        assert!(report.token_usage.is_none());

        let logs = context.sink().drain();
        assert!(logs.iter().any(|l| l.line.contains("no token usage")));
    }

    #[tokio::test]
    async fn failure_bumps_consecutive_failures() {
        let exec = executor().await;
        exec.register_fn("brittle", |_i, _c| async move {
            Err(CoreError::Transient("llm 500".into()))
        })
        .unwrap();

        for _ in 0..2 {
            let _ = exec.execute("brittle", serde_json::Value::Null, &ctx()).await;
        }
        let status = exec.statuses.get("u1", "brittle").await.unwrap().unwrap();
        assert_eq!(status.state, AgentState::Failed);
        assert_eq!(status.consecutive_failures, 2);

        // A success resets the streak.
        let exec2 = exec;
        exec2
            .register_fn("steady", |_i, _c| async move {
                Ok(AgentOutput::new(serde_json::Value::Null))
            })
            .unwrap();
        exec2
            .execute("steady", serde_json::Value::Null, &ctx())
            .await
            .unwrap();
        let steady = exec2.statuses.get("u1", "steady").await.unwrap().unwrap();
        assert_eq!(steady.consecutive_failures, 0);
    }
}
