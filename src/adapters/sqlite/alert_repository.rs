//! SQLite implementation of the AlertRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{AlertCondition, AlertFiring, AlertRule, MetricKind, NotificationChannel};
use crate::domain::ports::AlertRepository;

#[derive(Clone)]
pub struct SqliteAlertRepository {
    pool: SqlitePool,
}

impl SqliteAlertRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertRepository for SqliteAlertRepository {
    async fn insert_rule(&self, rule: &AlertRule) -> CoreResult<()> {
        let channels: Vec<&str> = rule.channels.iter().map(|c| c.as_str()).collect();
        let webhook_ids: Vec<String> = rule.webhook_ids.iter().map(|id| id.to_string()).collect();

        sqlx::query(
            r#"INSERT INTO alert_rules (id, user_id, name, metric, condition, threshold,
               window_minutes, channels, webhook_ids, is_active, is_firing, last_fired_at,
               created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(rule.id.to_string())
        .bind(&rule.user_id)
        .bind(&rule.name)
        .bind(rule.metric.as_str())
        .bind(rule.condition.as_str())
        .bind(rule.threshold)
        .bind(rule.window_minutes as i64)
        .bind(serde_json::to_string(&channels)?)
        .bind(serde_json::to_string(&webhook_ids)?)
        .bind(rule.is_active)
        .bind(rule.is_firing)
        .bind(rule.last_fired_at.map(|t| t.to_rfc3339()))
        .bind(rule.created_at.to_rfc3339())
        .bind(rule.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_rule(&self, id: Uuid) -> CoreResult<Option<AlertRule>> {
        let row: Option<AlertRuleRow> = sqlx::query_as("SELECT * FROM alert_rules WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(AlertRule::try_from).transpose()
    }

    async fn update_rule(&self, rule: &AlertRule) -> CoreResult<()> {
        let channels: Vec<&str> = rule.channels.iter().map(|c| c.as_str()).collect();
        let webhook_ids: Vec<String> = rule.webhook_ids.iter().map(|id| id.to_string()).collect();

        let result = sqlx::query(
            r#"UPDATE alert_rules SET name = ?, metric = ?, condition = ?, threshold = ?,
               window_minutes = ?, channels = ?, webhook_ids = ?, is_active = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&rule.name)
        .bind(rule.metric.as_str())
        .bind(rule.condition.as_str())
        .bind(rule.threshold)
        .bind(rule.window_minutes as i64)
        .bind(serde_json::to_string(&channels)?)
        .bind(serde_json::to_string(&webhook_ids)?)
        .bind(rule.is_active)
        .bind(Utc::now().to_rfc3339())
        .bind(rule.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::RuleNotFound(rule.id));
        }
        Ok(())
    }

    async fn delete_rule(&self, id: Uuid) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::RuleNotFound(id));
        }
        Ok(())
    }

    async fn list_rules(&self, user_id: &str) -> CoreResult<Vec<AlertRule>> {
        let rows: Vec<AlertRuleRow> =
            sqlx::query_as("SELECT * FROM alert_rules WHERE user_id = ? ORDER BY created_at")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(AlertRule::try_from).collect()
    }

    async fn list_active_rules(&self) -> CoreResult<Vec<AlertRule>> {
        let rows: Vec<AlertRuleRow> =
            sqlx::query_as("SELECT * FROM alert_rules WHERE is_active = 1 ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(AlertRule::try_from).collect()
    }

    async fn set_firing(
        &self,
        rule_id: Uuid,
        is_firing: bool,
        fired_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        let result = if let Some(at) = fired_at {
            sqlx::query(
                "UPDATE alert_rules SET is_firing = ?, last_fired_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(is_firing)
            .bind(at.to_rfc3339())
            .bind(Utc::now().to_rfc3339())
            .bind(rule_id.to_string())
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query("UPDATE alert_rules SET is_firing = ?, updated_at = ? WHERE id = ?")
                .bind(is_firing)
                .bind(Utc::now().to_rfc3339())
                .bind(rule_id.to_string())
                .execute(&self.pool)
                .await?
        };

        if result.rows_affected() == 0 {
            return Err(CoreError::RuleNotFound(rule_id));
        }
        Ok(())
    }

    async fn insert_firing(&self, firing: &AlertFiring) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO alert_firings (id, rule_id, user_id, metric_value, message,
               triggered_at, resolved_at, notifications_sent)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(firing.id.to_string())
        .bind(firing.rule_id.to_string())
        .bind(&firing.user_id)
        .bind(firing.metric_value)
        .bind(&firing.message)
        .bind(firing.triggered_at.to_rfc3339())
        .bind(firing.resolved_at.map(|t| t.to_rfc3339()))
        .bind(serde_json::to_string(&firing.notifications_sent)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_open_firing(&self, rule_id: Uuid) -> CoreResult<Option<AlertFiring>> {
        let row: Option<AlertFiringRow> = sqlx::query_as(
            "SELECT * FROM alert_firings WHERE rule_id = ? AND resolved_at IS NULL",
        )
        .bind(rule_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(AlertFiring::try_from).transpose()
    }

    async fn close_open_firing(&self, rule_id: Uuid, now: DateTime<Utc>) -> CoreResult<()> {
        sqlx::query(
            "UPDATE alert_firings SET resolved_at = ? WHERE rule_id = ? AND resolved_at IS NULL",
        )
        .bind(now.to_rfc3339())
        .bind(rule_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_notifications_sent(&self, firing_id: Uuid, channels: &[String]) -> CoreResult<()> {
        sqlx::query("UPDATE alert_firings SET notifications_sent = ? WHERE id = ?")
            .bind(serde_json::to_string(channels)?)
            .bind(firing_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_firings(&self, user_id: &str, limit: usize) -> CoreResult<Vec<AlertFiring>> {
        let rows: Vec<AlertFiringRow> = sqlx::query_as(
            "SELECT * FROM alert_firings WHERE user_id = ? ORDER BY triggered_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AlertFiring::try_from).collect()
    }

    async fn firing_counts(&self, user_id: &str) -> CoreResult<(u64, u64)> {
        let row: (i64, i64) = sqlx::query_as(
            r#"SELECT
                   COUNT(CASE WHEN resolved_at IS NULL THEN 1 END),
                   COUNT(CASE WHEN resolved_at IS NOT NULL THEN 1 END)
               FROM alert_firings WHERE user_id = ?"#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.0 as u64, row.1 as u64))
    }
}

#[derive(sqlx::FromRow)]
struct AlertRuleRow {
    id: String,
    user_id: String,
    name: String,
    metric: String,
    condition: String,
    threshold: f64,
    window_minutes: i64,
    channels: String,
    webhook_ids: String,
    is_active: bool,
    is_firing: bool,
    last_fired_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<AlertRuleRow> for AlertRule {
    type Error = CoreError;

    fn try_from(row: AlertRuleRow) -> Result<Self, Self::Error> {
        let metric = MetricKind::from_str(&row.metric)
            .ok_or_else(|| CoreError::Serialization(format!("invalid metric: {}", row.metric)))?;
        let condition = AlertCondition::from_str(&row.condition).ok_or_else(|| {
            CoreError::Serialization(format!("invalid condition: {}", row.condition))
        })?;

        let channel_names: Vec<String> = super::parse_json(&row.channels)?;
        let channels = channel_names
            .iter()
            .filter_map(|c| NotificationChannel::from_str(c))
            .collect();

        let webhook_strings: Vec<String> = super::parse_json(&row.webhook_ids)?;
        let webhook_ids = webhook_strings
            .iter()
            .map(|s| super::parse_uuid(s))
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(AlertRule {
            id: super::parse_uuid(&row.id)?,
            user_id: row.user_id,
            name: row.name,
            metric,
            condition,
            threshold: row.threshold,
            window_minutes: row.window_minutes as u32,
            channels,
            webhook_ids,
            is_active: row.is_active,
            is_firing: row.is_firing,
            last_fired_at: super::parse_optional_datetime(row.last_fired_at)?,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AlertFiringRow {
    id: String,
    rule_id: String,
    user_id: String,
    metric_value: f64,
    message: String,
    triggered_at: String,
    resolved_at: Option<String>,
    notifications_sent: String,
}

impl TryFrom<AlertFiringRow> for AlertFiring {
    type Error = CoreError;

    fn try_from(row: AlertFiringRow) -> Result<Self, Self::Error> {
        Ok(AlertFiring {
            id: super::parse_uuid(&row.id)?,
            rule_id: super::parse_uuid(&row.rule_id)?,
            user_id: row.user_id,
            metric_value: row.metric_value,
            message: row.message,
            triggered_at: super::parse_datetime(&row.triggered_at)?,
            resolved_at: super::parse_optional_datetime(row.resolved_at)?,
            notifications_sent: super::parse_json(&row.notifications_sent)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    fn rule() -> AlertRule {
        AlertRule::new("u1", "high errors", MetricKind::ErrorRate, AlertCondition::Gt, 0.5)
            .with_channels(vec![NotificationChannel::Webhook, NotificationChannel::InApp])
    }

    #[tokio::test]
    async fn rule_round_trips() {
        let repo = SqliteAlertRepository::new(create_migrated_test_pool().await.unwrap());
        let r = rule();
        repo.insert_rule(&r).await.unwrap();

        let stored = repo.get_rule(r.id).await.unwrap().unwrap();
        assert_eq!(stored.metric, MetricKind::ErrorRate);
        assert_eq!(stored.condition, AlertCondition::Gt);
        assert_eq!(stored.channels.len(), 2);
        assert!(stored.is_active);
        assert!(!stored.is_firing);
    }

    #[tokio::test]
    async fn only_one_open_firing_per_rule() {
        let repo = SqliteAlertRepository::new(create_migrated_test_pool().await.unwrap());
        let r = rule();
        repo.insert_rule(&r).await.unwrap();

        let first = AlertFiring::open(&r, 0.6);
        repo.insert_firing(&first).await.unwrap();

        // A second open firing for the same rule violates the partial
        // unique index.
        let second = AlertFiring::open(&r, 0.7);
        assert!(repo.insert_firing(&second).await.is_err());

        repo.close_open_firing(r.id, Utc::now()).await.unwrap();
        assert!(repo.get_open_firing(r.id).await.unwrap().is_none());

        // Closed episode makes room for a fresh one.
        repo.insert_firing(&AlertFiring::open(&r, 0.8)).await.unwrap();
    }

    #[tokio::test]
    async fn firing_counts_split_open_and_resolved() {
        let repo = SqliteAlertRepository::new(create_migrated_test_pool().await.unwrap());
        let r = rule();
        repo.insert_rule(&r).await.unwrap();

        repo.insert_firing(&AlertFiring::open(&r, 0.6)).await.unwrap();
        repo.close_open_firing(r.id, Utc::now()).await.unwrap();
        repo.insert_firing(&AlertFiring::open(&r, 0.9)).await.unwrap();

        let (open, resolved) = repo.firing_counts("u1").await.unwrap();
        assert_eq!(open, 1);
        assert_eq!(resolved, 1);
    }

    #[tokio::test]
    async fn set_firing_flips_flag_and_stamp() {
        let repo = SqliteAlertRepository::new(create_migrated_test_pool().await.unwrap());
        let r = rule();
        repo.insert_rule(&r).await.unwrap();

        let now = Utc::now();
        repo.set_firing(r.id, true, Some(now)).await.unwrap();
        let stored = repo.get_rule(r.id).await.unwrap().unwrap();
        assert!(stored.is_firing);
        assert!(stored.last_fired_at.is_some());

        repo.set_firing(r.id, false, None).await.unwrap();
        let stored = repo.get_rule(r.id).await.unwrap().unwrap();
        assert!(!stored.is_firing);
        // last_fired_at keeps the previous stamp.
        assert!(stored.last_fired_at.is_some());
    }
}
