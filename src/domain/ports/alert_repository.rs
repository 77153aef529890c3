//! Alert rule and firing repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::CoreResult;
use crate::domain::models::{AlertFiring, AlertRule};

/// Repository interface for alert rules and their firings. The evaluator
/// owns `is_firing` and all firing rows.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    // Rules

    async fn insert_rule(&self, rule: &AlertRule) -> CoreResult<()>;

    async fn get_rule(&self, id: Uuid) -> CoreResult<Option<AlertRule>>;

    async fn update_rule(&self, rule: &AlertRule) -> CoreResult<()>;

    async fn delete_rule(&self, id: Uuid) -> CoreResult<()>;

    async fn list_rules(&self, user_id: &str) -> CoreResult<Vec<AlertRule>>;

    /// Active rules across all users, for the evaluation sweep.
    async fn list_active_rules(&self) -> CoreResult<Vec<AlertRule>>;

    /// Flip the firing flag and stamp `last_fired_at` when firing.
    async fn set_firing(
        &self,
        rule_id: Uuid,
        is_firing: bool,
        fired_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()>;

    // Firings

    async fn insert_firing(&self, firing: &AlertFiring) -> CoreResult<()>;

    /// The open (unresolved) firing for a rule, if one exists.
    async fn get_open_firing(&self, rule_id: Uuid) -> CoreResult<Option<AlertFiring>>;

    /// Close the open firing for a rule by stamping `resolved_at`.
    async fn close_open_firing(&self, rule_id: Uuid, now: DateTime<Utc>) -> CoreResult<()>;

    /// Record which channels were notified for a firing.
    async fn set_notifications_sent(&self, firing_id: Uuid, channels: &[String]) -> CoreResult<()>;

    /// Firing history for a user, newest first.
    async fn list_firings(&self, user_id: &str, limit: usize) -> CoreResult<Vec<AlertFiring>>;

    /// (open, resolved) firing counts for a user.
    async fn firing_counts(&self, user_id: &str) -> CoreResult<(u64, u64)>;
}
