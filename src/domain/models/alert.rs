//! Alert rules and firings.
//!
//! Rules are user-authored thresholds over the metric vocabulary; the
//! evaluator owns `is_firing` and the firing records. A rule has at most
//! one open firing at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metrics::MetricKind;

/// Comparison applied between the observed value and the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl AlertCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Eq => "eq",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "eq" => Some(Self::Eq),
            _ => None,
        }
    }

    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Gte => value >= threshold,
            Self::Lt => value < threshold,
            Self::Lte => value <= threshold,
            Self::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

/// Where a firing gets announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Webhook,
    Email,
    InApp,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Email => "email",
            Self::InApp => "in_app",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "webhook" => Some(Self::Webhook),
            "email" => Some(Self::Email),
            "in_app" => Some(Self::InApp),
            _ => None,
        }
    }
}

/// A user-authored threshold rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub metric: MetricKind,
    pub condition: AlertCondition,
    pub threshold: f64,
    /// Advisory pacing hint; the collector's own windows are fixed.
    pub window_minutes: u32,
    pub channels: Vec<NotificationChannel>,
    /// Endpoints to notify when `channels` includes `Webhook`.
    pub webhook_ids: Vec<Uuid>,
    pub is_active: bool,
    /// Managed exclusively by the evaluator.
    pub is_firing: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRule {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        metric: MetricKind,
        condition: AlertCondition,
        threshold: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            name: name.into(),
            metric,
            condition,
            threshold,
            window_minutes: 5,
            channels: vec![NotificationChannel::InApp],
            webhook_ids: Vec::new(),
            is_active: true,
            is_firing: false,
            last_fired_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_channels(mut self, channels: Vec<NotificationChannel>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_webhooks(mut self, webhook_ids: Vec<Uuid>) -> Self {
        self.webhook_ids = webhook_ids;
        self
    }

    /// Whether the rule should be firing for the observed value.
    pub fn should_fire(&self, value: f64) -> bool {
        self.condition.holds(value, self.threshold)
    }
}

/// One open-or-closed alert episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertFiring {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub user_id: String,
    pub metric_value: f64,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Channels that were successfully notified.
    pub notifications_sent: Vec<String>,
}

impl AlertFiring {
    pub fn open(rule: &AlertRule, metric_value: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            user_id: rule.user_id.clone(),
            metric_value,
            message: format!(
                "{}: {} {} {} (observed {})",
                rule.name,
                rule.metric.as_str(),
                rule.condition.as_str(),
                rule.threshold,
                metric_value
            ),
            triggered_at: Utc::now(),
            resolved_at: None,
            notifications_sent: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditions_compare_as_named() {
        assert!(AlertCondition::Gt.holds(0.6, 0.5));
        assert!(!AlertCondition::Gt.holds(0.5, 0.5));
        assert!(AlertCondition::Gte.holds(0.5, 0.5));
        assert!(AlertCondition::Lt.holds(0.4, 0.5));
        assert!(AlertCondition::Lte.holds(0.5, 0.5));
        assert!(AlertCondition::Eq.holds(0.5, 0.5));
        assert!(!AlertCondition::Eq.holds(0.50001, 0.5));
    }

    #[test]
    fn firing_message_names_rule_and_value() {
        let rule = AlertRule::new("u1", "high errors", MetricKind::ErrorRate, AlertCondition::Gt, 0.5);
        let firing = AlertFiring::open(&rule, 0.6);
        assert!(firing.message.contains("high errors"));
        assert!(firing.message.contains("error_rate"));
        assert!(firing.is_open());
    }

    #[test]
    fn should_fire_tracks_condition() {
        let rule = AlertRule::new("u1", "deep queue", MetricKind::QueueDepth, AlertCondition::Gte, 100.0);
        assert!(rule.should_fire(100.0));
        assert!(rule.should_fire(250.0));
        assert!(!rule.should_fire(99.0));
    }
}
