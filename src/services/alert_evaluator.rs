//! Threshold alert evaluator.
//!
//! Each tick sweeps every active rule, compares the observed metric
//! against the threshold, and drives the firing state machine: a
//! false→true transition opens a firing and notifies every configured
//! channel; true→false closes it. A rule has at most one open firing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::domain::errors::CoreResult;
use crate::domain::models::{
    AlertFiring, AlertRule, MetricKind, NotificationChannel, SystemMetrics, WebhookEvent,
};
use crate::domain::ports::{AlertRepository, Notifier, WalletProvider};
use crate::services::metrics_collector::MetricsCollector;
use crate::services::webhook_dispatcher::WebhookDispatcher;

/// Event type announced to webhook channels when a rule starts firing.
pub const ALERT_TRIGGERED_EVENT: &str = "alert.triggered";

pub struct AlertEvaluator {
    alerts: Arc<dyn AlertRepository>,
    collector: Arc<MetricsCollector>,
    wallet: Arc<dyn WalletProvider>,
    notifier: Arc<dyn Notifier>,
    dispatcher: Arc<WebhookDispatcher>,
}

impl AlertEvaluator {
    pub fn new(
        alerts: Arc<dyn AlertRepository>,
        collector: Arc<MetricsCollector>,
        wallet: Arc<dyn WalletProvider>,
        notifier: Arc<dyn Notifier>,
        dispatcher: Arc<WebhookDispatcher>,
    ) -> Self {
        Self {
            alerts,
            collector,
            wallet,
            notifier,
            dispatcher,
        }
    }

    /// Evaluate every active rule once. Metrics are collected once per
    /// user and shared across that user's rules. Returns the number of
    /// state transitions (fires + resolves).
    pub async fn tick(&self) -> CoreResult<usize> {
        let rules = self.alerts.list_active_rules().await?;
        let mut metrics_by_user: HashMap<String, SystemMetrics> = HashMap::new();
        let mut transitions = 0;

        for rule in rules {
            if !metrics_by_user.contains_key(&rule.user_id) {
                match self.collector.collect_current_metrics(&rule.user_id).await {
                    Ok(m) => {
                        metrics_by_user.insert(rule.user_id.clone(), m);
                    }
                    Err(e) => {
                        tracing::warn!(user_id = %rule.user_id, error = %e, "metric collection failed, skipping user's rules");
                        continue;
                    }
                }
            }
            let metrics = &metrics_by_user[&rule.user_id];

            let value = match self.observe(&rule, metrics).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(rule_id = %rule.id, error = %e, "metric observation failed");
                    continue;
                }
            };

            if self.evaluate_rule(&rule, value).await? {
                transitions += 1;
            }
        }

        Ok(transitions)
    }

    async fn observe(&self, rule: &AlertRule, metrics: &SystemMetrics) -> CoreResult<f64> {
        match rule.metric {
            MetricKind::BudgetUsage => self.wallet.budget_usage(&rule.user_id).await,
            other => Ok(metrics.value(other).unwrap_or(0.0)),
        }
    }

    /// Drive one rule's firing state. Returns true when a transition
    /// happened.
    async fn evaluate_rule(&self, rule: &AlertRule, value: f64) -> CoreResult<bool> {
        let should_fire = rule.should_fire(value);

        if should_fire && !rule.is_firing {
            let now = Utc::now();
            self.alerts.set_firing(rule.id, true, Some(now)).await?;

            let firing = AlertFiring::open(rule, value);
            self.alerts.insert_firing(&firing).await?;
            tracing::warn!(
                rule_id = %rule.id,
                rule = %rule.name,
                metric = rule.metric.as_str(),
                value,
                threshold = rule.threshold,
                "alert firing"
            );

            let sent = self.notify_channels(rule, &firing).await;
            if !sent.is_empty() {
                self.alerts.set_notifications_sent(firing.id, &sent).await?;
            }
            Ok(true)
        } else if !should_fire && rule.is_firing {
            self.alerts.set_firing(rule.id, false, None).await?;
            self.alerts.close_open_firing(rule.id, Utc::now()).await?;
            tracing::info!(rule_id = %rule.id, rule = %rule.name, value, "alert resolved");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Invoke every configured channel; one channel's failure never
    /// blocks the others. Returns the channels that succeeded.
    async fn notify_channels(&self, rule: &AlertRule, firing: &AlertFiring) -> Vec<String> {
        let mut sent = Vec::new();

        for channel in &rule.channels {
            let outcome = match channel {
                NotificationChannel::Webhook => {
                    let event = WebhookEvent::new(
                        ALERT_TRIGGERED_EVENT,
                        serde_json::json!({
                            "rule_id": rule.id,
                            "rule_name": rule.name,
                            "metric": rule.metric.as_str(),
                            "value": firing.metric_value,
                            "threshold": rule.threshold,
                            "message": firing.message,
                        }),
                        &rule.user_id,
                    );
                    self.dispatcher
                        .dispatch_to(&event, &rule.webhook_ids)
                        .await
                        .map(|_| ())
                }
                other => self.notifier.notify(*other, rule, firing).await,
            };

            match outcome {
                Ok(()) => sent.push(channel.as_str().to_string()),
                Err(e) => tracing::warn!(
                    rule_id = %rule.id,
                    channel = channel.as_str(),
                    error = %e,
                    "notification channel failed"
                ),
            }
        }

        sent
    }

    /// Run until shutdown, sweeping at the configured cadence.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::warn!(error = %e, "alert sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAgentStatusRepository, SqliteAlertRepository,
        SqliteDeadLetterRepository, SqliteJobRepository, SqliteMissionRepository,
        SqliteSnapshotRepository, SqliteWebhookRepository,
    };
    use crate::domain::models::{AlertCondition, EnqueueOptions, Job};
    use crate::domain::ports::{
        JobRepository, NullNotifier, PlaintextVault, TracingTelemetrySink, WalletProvider,
    };
    use crate::services::task_queue::{QueueConfig, TaskQueue};
    use crate::services::webhook_dispatcher::DispatcherConfig;
    use async_trait::async_trait;

    struct FixedWallet(f64);

    #[async_trait]
    impl WalletProvider for FixedWallet {
        async fn budget_usage(&self, _user_id: &str) -> CoreResult<f64> {
            Ok(self.0)
        }
    }

    struct Fixture {
        evaluator: AlertEvaluator,
        alerts: Arc<SqliteAlertRepository>,
        jobs: Arc<SqliteJobRepository>,
    }

    async fn fixture_with_wallet(wallet: Arc<dyn WalletProvider>) -> Fixture {
        let pool = create_migrated_test_pool().await.unwrap();
        let jobs = Arc::new(SqliteJobRepository::new(pool.clone()));
        let alerts = Arc::new(SqliteAlertRepository::new(pool.clone()));
        let collector = Arc::new(MetricsCollector::new(
            jobs.clone(),
            jobs.clone(),
            Arc::new(SqliteMissionRepository::new(pool.clone())),
            Arc::new(SqliteAgentStatusRepository::new(pool.clone())),
            Arc::new(SqliteDeadLetterRepository::new(pool.clone())),
            alerts.clone(),
            Arc::new(SqliteSnapshotRepository::new(pool.clone())),
        ));
        let queue = Arc::new(TaskQueue::new(
            jobs.clone(),
            Arc::new(SqliteDeadLetterRepository::new(pool.clone())),
            Arc::new(TracingTelemetrySink),
            QueueConfig::default(),
        ));
        let dispatcher = Arc::new(WebhookDispatcher::new(
            Arc::new(SqliteWebhookRepository::new(pool)),
            Arc::new(PlaintextVault),
            queue,
            DispatcherConfig::default(),
        ));
        let evaluator = AlertEvaluator::new(
            alerts.clone(),
            collector,
            wallet,
            Arc::new(NullNotifier),
            dispatcher,
        );
        Fixture {
            evaluator,
            alerts,
            jobs,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with_wallet(Arc::new(FixedWallet(0.0))).await
    }

    async fn settle_jobs(jobs: &SqliteJobRepository, completed: usize, failed: usize) {
        for i in 0..(completed + failed) {
            let job = Job::new("q", "t", serde_json::json!({}), EnqueueOptions::for_user("u1"));
            jobs.insert(&job).await.unwrap();
            jobs.claim_next("q", "w", Utc::now()).await.unwrap().unwrap();
            if i < completed {
                jobs.mark_completed(job.id, Utc::now()).await.unwrap();
            } else {
                jobs.mark_failed(job.id, "x", Utc::now()).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn rule_fires_then_resolves() {
        let f = fixture().await;
        // 6 failures, 4 successes: error rate 0.6 > 0.5.
        settle_jobs(&f.jobs, 4, 6).await;

        let rule = AlertRule::new("u1", "high errors", MetricKind::ErrorRate, AlertCondition::Gt, 0.5);
        f.alerts.insert_rule(&rule).await.unwrap();

        assert_eq!(f.evaluator.tick().await.unwrap(), 1);
        let stored = f.alerts.get_rule(rule.id).await.unwrap().unwrap();
        assert!(stored.is_firing);
        assert!(stored.last_fired_at.is_some());
        let firing = f.alerts.get_open_firing(rule.id).await.unwrap().unwrap();
        assert!((firing.metric_value - 0.6).abs() < 0.001);

        // Steady state: no further transitions while still firing.
        assert_eq!(f.evaluator.tick().await.unwrap(), 0);

        // Ten more successes dilute the rate to 6/20 = 0.3, under the
        // threshold.
        settle_jobs(&f.jobs, 10, 0).await;
        assert_eq!(f.evaluator.tick().await.unwrap(), 1);
        let stored = f.alerts.get_rule(rule.id).await.unwrap().unwrap();
        assert!(!stored.is_firing);
        assert!(f.alerts.get_open_firing(rule.id).await.unwrap().is_none());

        let history = f.alerts.list_firings("u1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].resolved_at.is_some());
    }

    #[tokio::test]
    async fn firing_rule_does_not_duplicate_firings() {
        let f = fixture().await;
        settle_jobs(&f.jobs, 0, 6).await;

        let rule = AlertRule::new("u1", "errors", MetricKind::ErrorRate, AlertCondition::Gt, 0.5);
        f.alerts.insert_rule(&rule).await.unwrap();

        f.evaluator.tick().await.unwrap();
        f.evaluator.tick().await.unwrap();
        f.evaluator.tick().await.unwrap();

        let history = f.alerts.list_firings("u1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn inactive_rules_are_ignored() {
        let f = fixture().await;
        settle_jobs(&f.jobs, 0, 6).await;

        let mut rule = AlertRule::new("u1", "errors", MetricKind::ErrorRate, AlertCondition::Gt, 0.5);
        rule.is_active = false;
        f.alerts.insert_rule(&rule).await.unwrap();

        assert_eq!(f.evaluator.tick().await.unwrap(), 0);
        assert!(!f.alerts.get_rule(rule.id).await.unwrap().unwrap().is_firing);
    }

    #[tokio::test]
    async fn budget_usage_reads_from_wallet() {
        let f = fixture_with_wallet(Arc::new(FixedWallet(0.93))).await;
        // The user must exist in the jobs table for metric collection.
        let job = Job::new("q", "t", serde_json::json!({}), EnqueueOptions::for_user("u1"));
        f.jobs.insert(&job).await.unwrap();

        let rule = AlertRule::new("u1", "budget", MetricKind::BudgetUsage, AlertCondition::Gte, 0.9);
        f.alerts.insert_rule(&rule).await.unwrap();

        assert_eq!(f.evaluator.tick().await.unwrap(), 1);
        assert!(f.alerts.get_rule(rule.id).await.unwrap().unwrap().is_firing);
    }

    #[tokio::test]
    async fn queue_depth_rule_fires_on_backlog() {
        let f = fixture().await;
        for _ in 0..3 {
            let job = Job::new("q", "t", serde_json::json!({}), EnqueueOptions::for_user("u1"));
            f.jobs.insert(&job).await.unwrap();
        }

        let rule = AlertRule::new("u1", "backlog", MetricKind::QueueDepth, AlertCondition::Gte, 3.0);
        f.alerts.insert_rule(&rule).await.unwrap();

        assert_eq!(f.evaluator.tick().await.unwrap(), 1);
        assert!(f.alerts.get_rule(rule.id).await.unwrap().unwrap().is_firing);
    }
}
