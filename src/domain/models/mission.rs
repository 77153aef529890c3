//! Mission domain model.
//!
//! A mission is a user-submitted plan of steps forming a DAG keyed by
//! agent name. The mission executor owns the mission row; it is immutable
//! once a terminal status is set.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};

/// Status of a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl Default for MissionStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One step of a mission plan: a single agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Agent to invoke; unique within the plan.
    pub agent: String,
    /// Input handed to the agent.
    #[serde(default)]
    pub input: serde_json::Value,
    /// Agent names this step depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Optional guard expression evaluated against completed-step outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// When true, a failure of this step does not fail the mission;
    /// dependents observe its output as `null`.
    #[serde(default)]
    pub continue_on_error: bool,
}

/// A declarative mission plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionPlan {
    pub steps: Vec<StepSpec>,
}

impl MissionPlan {
    pub fn new(steps: Vec<StepSpec>) -> Self {
        Self { steps }
    }

    /// Validate the plan: non-empty, unique agent names, known
    /// dependencies, no self-dependencies, acyclic.
    pub fn validate(&self) -> CoreResult<()> {
        if self.steps.is_empty() {
            return Err(CoreError::Validation("mission plan has no steps".into()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.agent.trim().is_empty() {
                return Err(CoreError::Validation("step agent name is empty".into()));
            }
            if !seen.insert(step.agent.as_str()) {
                return Err(CoreError::Validation(format!(
                    "duplicate agent '{}' in mission plan",
                    step.agent
                )));
            }
        }

        for step in &self.steps {
            for dep in &step.dependencies {
                if dep == &step.agent {
                    return Err(CoreError::Validation(format!(
                        "step '{}' depends on itself",
                        step.agent
                    )));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(CoreError::Validation(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.agent, dep
                    )));
                }
            }
        }

        self.levels()?;
        Ok(())
    }

    /// Group steps into dependency levels via Kahn's algorithm.
    ///
    /// Level 0 holds steps with no dependencies; each later level holds
    /// steps whose dependencies all sit in earlier levels. Steps within a
    /// level are mutually independent. A remaining node after the queue
    /// drains means a cycle.
    pub fn levels(&self) -> CoreResult<Vec<Vec<String>>> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for step in &self.steps {
            in_degree.entry(step.agent.as_str()).or_insert(0);
            for dep in &step.dependencies {
                *in_degree.entry(step.agent.as_str()).or_insert(0) += 1;
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(step.agent.as_str());
            }
        }

        let mut queue: VecDeque<&str> = Vec::from_iter(
            self.steps
                .iter()
                .filter(|s| in_degree.get(s.agent.as_str()) == Some(&0))
                .map(|s| s.agent.as_str()),
        )
        .into();

        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut resolved = 0usize;

        while !queue.is_empty() {
            let mut level: Vec<String> = Vec::with_capacity(queue.len());
            let mut next: VecDeque<&str> = VecDeque::new();
            while let Some(name) = queue.pop_front() {
                level.push(name.to_string());
                resolved += 1;
                for &dependent in dependents.get(name).map(Vec::as_slice).unwrap_or(&[]) {
                    let degree = in_degree
                        .get_mut(dependent)
                        .ok_or_else(|| CoreError::Validation("corrupt plan graph".into()))?;
                    *degree -= 1;
                    if *degree == 0 {
                        next.push_back(dependent);
                    }
                }
            }
            level.sort();
            levels.push(level);
            queue = next;
        }

        if resolved != self.steps.len() {
            return Err(CoreError::Validation(
                "mission plan contains a dependency cycle".into(),
            ));
        }
        Ok(levels)
    }

    pub fn step(&self, agent: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.agent == agent)
    }
}

/// What happened to a single step; the ordered list forms the mission audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed {
        agent: String,
        output: serde_json::Value,
        cost_credits: u64,
        duration_ms: u64,
    },
    Failed {
        agent: String,
        error: String,
    },
    Skipped {
        agent: String,
        reason: String,
    },
}

impl StepOutcome {
    pub fn agent(&self) -> &str {
        match self {
            Self::Completed { agent, .. } => agent,
            Self::Failed { agent, .. } => agent,
            Self::Skipped { agent, .. } => agent,
        }
    }
}

/// A mission: one DAG execution with cost attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: Uuid,
    pub user_id: String,
    pub status: MissionStatus,
    pub plan: MissionPlan,
    /// Aggregated step outputs, keyed by agent name. `null` until the
    /// mission finishes.
    pub result: serde_json::Value,
    /// Ordered per-step outcomes, including skip reasons.
    pub audit: Vec<StepOutcome>,
    /// Sum of `agent_costs` values; the two are kept in lockstep.
    pub total_cost: u64,
    /// Credits attributed per agent.
    pub agent_costs: HashMap<String, u64>,
    /// Language-model tokens consumed across all steps.
    pub total_tokens: u64,
    /// Agent name of the first permanently failed step, if any.
    pub failed_at: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mission {
    pub fn new(user_id: impl Into<String>, plan: MissionPlan) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            status: MissionStatus::Pending,
            plan,
            result: serde_json::Value::Null,
            audit: Vec::new(),
            total_cost: 0,
            agent_costs: HashMap::new(),
            total_tokens: 0,
            failed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a completed step: audit entry plus cost and token
    /// attribution.
    pub fn record_completed(
        &mut self,
        agent: &str,
        output: serde_json::Value,
        cost_credits: u64,
        duration_ms: u64,
        tokens: u64,
    ) {
        *self.agent_costs.entry(agent.to_string()).or_insert(0) += cost_credits;
        self.total_cost += cost_credits;
        self.total_tokens += tokens;
        self.audit.push(StepOutcome::Completed {
            agent: agent.to_string(),
            output,
            cost_credits,
            duration_ms,
        });
        self.updated_at = Utc::now();
    }

    pub fn record_failed(&mut self, agent: &str, error: impl Into<String>) {
        self.audit.push(StepOutcome::Failed {
            agent: agent.to_string(),
            error: error.into(),
        });
        if self.failed_at.is_none() {
            self.failed_at = Some(agent.to_string());
        }
        self.updated_at = Utc::now();
    }

    pub fn record_skipped(&mut self, agent: &str, reason: impl Into<String>) {
        self.audit.push(StepOutcome::Skipped {
            agent: agent.to_string(),
            reason: reason.into(),
        });
        self.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(agent: &str, deps: &[&str]) -> StepSpec {
        StepSpec {
            agent: agent.to_string(),
            input: serde_json::Value::Null,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            condition: None,
            continue_on_error: false,
        }
    }

    #[test]
    fn single_step_sits_at_level_zero() {
        let plan = MissionPlan::new(vec![step("a", &[])]);
        plan.validate().unwrap();
        assert_eq!(plan.levels().unwrap(), vec![vec!["a".to_string()]]);
    }

    #[test]
    fn diamond_plan_levels() {
        let plan = MissionPlan::new(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ]);
        let levels = plan.levels().unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec!["a"]);
        assert_eq!(levels[1], vec!["b", "c"]);
        assert_eq!(levels[2], vec!["d"]);
    }

    #[test]
    fn cycle_is_a_validation_error() {
        let plan = MissionPlan::new(vec![step("a", &["b"]), step("b", &["a"])]);
        let err = plan.validate().unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn duplicate_agent_rejected() {
        let plan = MissionPlan::new(vec![step("a", &[]), step("a", &[])]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn unknown_dependency_rejected() {
        let plan = MissionPlan::new(vec![step("a", &["ghost"])]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn self_dependency_rejected() {
        let plan = MissionPlan::new(vec![step("a", &["a"])]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn empty_plan_rejected() {
        let plan = MissionPlan::new(vec![]);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn cost_sum_stays_in_lockstep() {
        let plan = MissionPlan::new(vec![step("a", &[]), step("b", &["a"])]);
        let mut mission = Mission::new("u1", plan);
        mission.record_completed("a", serde_json::json!({"ok": true}), 2, 120, 200_000);
        mission.record_completed("b", serde_json::json!({"ok": true}), 3, 80, 300_000);
        assert_eq!(mission.total_cost, 5);
        assert_eq!(mission.total_tokens, 500_000);
        assert_eq!(
            mission.total_cost,
            mission.agent_costs.values().copied().sum::<u64>()
        );
    }

    #[test]
    fn first_failure_pins_failed_at() {
        let plan = MissionPlan::new(vec![step("a", &[]), step("b", &[])]);
        let mut mission = Mission::new("u1", plan);
        mission.record_failed("a", "boom");
        mission.record_failed("b", "boom");
        assert_eq!(mission.failed_at.as_deref(), Some("a"));
        assert_eq!(mission.audit.len(), 2);
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            MissionStatus::Pending,
            MissionStatus::Running,
            MissionStatus::Completed,
            MissionStatus::Failed,
        ] {
            assert_eq!(MissionStatus::from_str(status.as_str()), Some(status));
        }
    }
}
