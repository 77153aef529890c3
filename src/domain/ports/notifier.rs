//! Notification channel port.
//!
//! Email and in-app sinks live outside the core; the evaluator talks to
//! them through this interface only. One channel failing must never block
//! the others, so the evaluator calls each implementation independently.

use async_trait::async_trait;

use crate::domain::errors::CoreResult;
use crate::domain::models::{AlertFiring, AlertRule, NotificationChannel};

/// Opaque collaborator that announces alert firings on one channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a firing notification on the given channel.
    async fn notify(
        &self,
        channel: NotificationChannel,
        rule: &AlertRule,
        firing: &AlertFiring,
    ) -> CoreResult<()>;
}

/// No-op notifier for tests and deployments without external sinks.
#[derive(Debug, Clone, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(
        &self,
        channel: NotificationChannel,
        rule: &AlertRule,
        _firing: &AlertFiring,
    ) -> CoreResult<()> {
        tracing::debug!(
            channel = channel.as_str(),
            rule = %rule.name,
            "notification dropped (null notifier)"
        );
        Ok(())
    }
}
