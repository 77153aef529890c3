//! DAG mission executor.
//!
//! Consumes a validated mission plan, groups steps into dependency
//! levels, runs each level's steps concurrently under the parallelism
//! cap, evaluates guard conditions against completed outputs, and
//! accumulates per-agent cost. Fail-fast by default; a step marked
//! `continue_on_error` lets its dependents proceed seeing `null`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{Mission, MissionPlan, MissionStatus, StepSpec};
use crate::domain::ports::MissionRepository;
use crate::services::agent_executor::AgentExecutor;
use crate::services::condition::{Condition, ConditionScope};
use crate::services::job_context::JobContext;

/// Tuning for the executor, fed from the runtime config.
#[derive(Debug, Clone)]
pub struct MissionConfig {
    /// Concurrent steps per level.
    pub parallelism_cap: usize,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self { parallelism_cap: 8 }
    }
}

/// The mission executor; sole writer of mission rows.
pub struct MissionExecutor {
    missions: Arc<dyn MissionRepository>,
    agents: Arc<AgentExecutor>,
    config: MissionConfig,
}

impl MissionExecutor {
    pub fn new(
        missions: Arc<dyn MissionRepository>,
        agents: Arc<AgentExecutor>,
        config: MissionConfig,
    ) -> Self {
        Self {
            missions,
            agents,
            config,
        }
    }

    /// Validate a plan and persist the PENDING mission row.
    ///
    /// Planning errors (cycle, duplicate agent, unknown agent) surface
    /// synchronously; nothing is persisted for an invalid plan.
    pub async fn submit(&self, user_id: &str, plan: MissionPlan) -> CoreResult<Mission> {
        plan.validate()?;
        for step in &plan.steps {
            if !self.agents.is_registered(&step.agent) {
                return Err(CoreError::Validation(format!(
                    "unknown agent '{}' in mission plan",
                    step.agent
                )));
            }
        }

        let mission = Mission::new(user_id, plan);
        self.missions.insert(&mission).await?;
        tracing::info!(mission_id = %mission.id, user_id, steps = mission.plan.steps.len(), "mission submitted");
        Ok(mission)
    }

    /// Drive a PENDING mission to its terminal state. Invoked by the
    /// mission job handler; never retried past the first level, so a
    /// mission found in any other state is a permanent error.
    pub async fn run(&self, mission_id: Uuid, ctx: &JobContext) -> CoreResult<Mission> {
        let mut mission = self
            .missions
            .get(mission_id)
            .await?
            .ok_or(CoreError::MissionNotFound(mission_id))?;

        if mission.status != MissionStatus::Pending {
            return Err(CoreError::Permanent(format!(
                "mission {} is {} and cannot be re-run",
                mission_id,
                mission.status.as_str()
            )));
        }

        mission.status = MissionStatus::Running;
        self.missions.update(&mission).await?;

        let levels = mission.plan.levels()?;
        let mut outputs: HashMap<String, serde_json::Value> = HashMap::new();
        let mut skipped: HashSet<String> = HashSet::new();
        let mut aborted = false;

        for level in &levels {
            if aborted {
                for agent in level {
                    mission.record_skipped(agent, "mission already failed");
                    skipped.insert(agent.clone());
                }
                continue;
            }

            let mut to_run: Vec<StepSpec> = Vec::new();
            for agent in level {
                let step = mission
                    .plan
                    .step(agent)
                    .cloned()
                    .ok_or_else(|| CoreError::Consistency(format!("step '{agent}' vanished")))?;

                // Skip inheritance: a step whose dependencies were all
                // skipped is itself skipped.
                if !step.dependencies.is_empty()
                    && step.dependencies.iter().all(|d| skipped.contains(d))
                {
                    mission.record_skipped(agent, "all dependencies skipped");
                    skipped.insert(agent.clone());
                    continue;
                }

                if let Some(ref source) = step.condition {
                    match Condition::parse(source) {
                        Err(e) => {
                            mission.record_skipped(agent, e.to_string());
                            skipped.insert(agent.clone());
                            continue;
                        }
                        Ok(condition) => {
                            let scope = ConditionScope::new(&outputs, &step.dependencies);
                            if !condition.evaluate(&scope) {
                                mission.record_skipped(
                                    agent,
                                    format!("condition not met: {source}"),
                                );
                                skipped.insert(agent.clone());
                                continue;
                            }
                        }
                    }
                }

                to_run.push(step);
            }

            let settled = self.dispatch_level(&to_run, ctx).await?;

            for (step, result) in settled {
                match result {
                    Ok(report) => {
                        outputs.insert(step.agent.clone(), report.output.clone());
                        mission.record_completed(
                            &step.agent,
                            report.output,
                            report.cost_credits,
                            report.duration_ms,
                            report.token_usage.map(|u| u.total()).unwrap_or(0),
                        );
                    }
                    Err(err) => {
                        mission.record_failed(&step.agent, err.to_string());
                        if step.continue_on_error {
                            // Dependents observe the failed step as null.
                            outputs.insert(step.agent.clone(), serde_json::Value::Null);
                        } else {
                            aborted = true;
                        }
                    }
                }
            }

            self.missions.update(&mission).await?;
        }

        mission.result = serde_json::to_value(&outputs)?;
        // Status reflects the worst step outcome: a tolerated
        // (continue-on-error) failure still fails the mission, it just
        // lets dependents run first.
        mission.status = if mission.failed_at.is_some() {
            MissionStatus::Failed
        } else {
            MissionStatus::Completed
        };
        self.missions.update(&mission).await?;

        tracing::info!(
            mission_id = %mission.id,
            status = mission.status.as_str(),
            total_cost = mission.total_cost,
            "mission finished"
        );
        Ok(mission)
    }

    /// Run one level's steps concurrently, bounded by the cap. Dependents
    /// never observe partial-level outputs: this waits for every step to
    /// settle before returning.
    async fn dispatch_level(
        &self,
        steps: &[StepSpec],
        ctx: &JobContext,
    ) -> CoreResult<Vec<(StepSpec, CoreResult<crate::domain::models::ExecutionReport>)>> {
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism_cap.max(1)));
        let mut handles = Vec::with_capacity(steps.len());

        for step in steps {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| CoreError::Consistency("level semaphore closed".into()))?;
            let agents = Arc::clone(&self.agents);
            let step = step.clone();
            let step_ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = agents.execute(&step.agent, step.input.clone(), &step_ctx).await;
                (step, result)
            }));
        }

        let mut settled = Vec::with_capacity(handles.len());
        for joined in futures::future::join_all(handles).await {
            let (step, result) =
                joined.map_err(|e| CoreError::Transient(format!("step task failed: {e}")))?;
            settled.push((step, result));
        }
        Ok(settled)
    }
}
