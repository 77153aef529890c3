//! Webhook dispatcher: signed, retrying HTTP fan-out.
//!
//! `dispatch` creates one pending delivery per subscribed endpoint and
//! enqueues a delivery job on the `webhooks` queue; the queue owns the
//! retry schedule. `deliver` performs a single attempt: sign, POST,
//! record the outcome, and classify the failure for the queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    DeliveryStatus, EnqueueOptions, WebhookDelivery, WebhookEndpoint, WebhookEvent,
};
use crate::domain::ports::{SecretVault, WebhookRepository};
use crate::services::rate_limit::TokenBucketLimiter;
use crate::services::task_queue::TaskQueue;
use crate::services::webhook_signature::{sign, SIGNATURE_HEADER};

/// Queue that carries delivery jobs.
pub const WEBHOOK_QUEUE: &str = "webhooks";

/// Job type for a single delivery.
pub const DELIVER_JOB_TYPE: &str = "deliver";

/// Emitted when a delivery exhausts its attempts.
pub const DELIVERY_FAILED_EVENT: &str = "delivery.failed";

/// Payload of a delivery job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverPayload {
    pub delivery_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Per-request timeout for the POST.
    pub timeout_ms: u64,
    /// Attempts per delivery before it is failed.
    pub max_attempts: u32,
    /// Base of the queue's backoff schedule for delivery jobs.
    pub backoff_base_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_attempts: 5,
            backoff_base_ms: 2_000,
        }
    }
}

pub struct WebhookDispatcher {
    repo: Arc<dyn WebhookRepository>,
    vault: Arc<dyn SecretVault>,
    queue: Arc<TaskQueue>,
    http: reqwest::Client,
    config: DispatcherConfig,
    rotation_limiter: TokenBucketLimiter,
}

impl WebhookDispatcher {
    pub fn new(
        repo: Arc<dyn WebhookRepository>,
        vault: Arc<dyn SecretVault>,
        queue: Arc<TaskQueue>,
        config: DispatcherConfig,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            repo,
            vault,
            queue,
            http,
            config,
            rotation_limiter: TokenBucketLimiter::hourly(1),
        }
    }

    /// Fan an event out to every active endpoint subscribed to its type.
    /// Returns the delivery ids created.
    pub async fn dispatch(&self, event: &WebhookEvent) -> CoreResult<Vec<Uuid>> {
        let endpoints = self
            .repo
            .list_subscribed(&event.user_id, &event.event_type)
            .await?;
        self.fan_out(event, &endpoints).await
    }

    /// Deliver an event to explicitly named endpoints, regardless of
    /// their event subscriptions. Used by alert rules that pin webhooks.
    pub async fn dispatch_to(
        &self,
        event: &WebhookEvent,
        endpoint_ids: &[Uuid],
    ) -> CoreResult<Vec<Uuid>> {
        let mut endpoints = Vec::with_capacity(endpoint_ids.len());
        for id in endpoint_ids {
            match self.repo.get_endpoint(*id).await? {
                Some(ep) if ep.is_active => endpoints.push(ep),
                Some(_) => tracing::debug!(endpoint_id = %id, "skipping inactive endpoint"),
                None => tracing::warn!(endpoint_id = %id, "endpoint referenced but missing"),
            }
        }
        self.fan_out(event, &endpoints).await
    }

    async fn fan_out(
        &self,
        event: &WebhookEvent,
        endpoints: &[WebhookEndpoint],
    ) -> CoreResult<Vec<Uuid>> {
        let mut delivery_ids = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let delivery = WebhookDelivery::new(endpoint.id, event, self.config.max_attempts);
            self.repo.insert_delivery(&delivery).await?;

            self.queue
                .enqueue(
                    WEBHOOK_QUEUE,
                    DELIVER_JOB_TYPE,
                    serde_json::to_value(DeliverPayload {
                        delivery_id: delivery.id,
                    })?,
                    EnqueueOptions::for_user(&endpoint.user_id)
                        .with_max_attempts(self.config.max_attempts)
                        .with_backoff_base_ms(self.config.backoff_base_ms),
                )
                .await?;

            delivery_ids.push(delivery.id);
        }

        tracing::debug!(
            event_type = %event.event_type,
            deliveries = delivery_ids.len(),
            "event fanned out"
        );
        Ok(delivery_ids)
    }

    /// One delivery attempt; the queue schedules retries around it.
    pub async fn deliver(&self, delivery_id: Uuid) -> CoreResult<serde_json::Value> {
        let mut delivery = self.repo.get_delivery(delivery_id).await?.ok_or_else(|| {
            CoreError::Permanent(format!("webhook delivery {delivery_id} not found"))
        })?;

        // At-least-once: a redelivered job for an already-sent delivery
        // is a no-op, not an error.
        if delivery.status.is_terminal() {
            return Ok(serde_json::json!({"status": delivery.status.as_str()}));
        }

        let endpoint = self
            .repo
            .get_endpoint(delivery.endpoint_id)
            .await?
            .ok_or_else(|| {
                CoreError::Permanent(format!("endpoint {} deleted", delivery.endpoint_id))
            })?;
        if !endpoint.is_active {
            return Err(CoreError::Permanent(format!(
                "endpoint {} deactivated",
                endpoint.id
            )));
        }

        delivery.status = DeliveryStatus::Retrying;
        delivery.attempts += 1;
        self.repo.update_delivery(&delivery).await?;

        let body = serde_json::to_string(&delivery.payload)?;
        let secret = self.vault.decrypt(&endpoint.secret).await?;
        let signature = sign(&body, &secret, Utc::now().timestamp());

        let response = self
            .http
            .post(&endpoint.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "gpilot-webhooks/1.0")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                delivery.status = DeliveryStatus::Sent;
                delivery.response_code = Some(resp.status().as_u16());
                let text = resp.text().await.unwrap_or_default();
                delivery.set_response_body(&text);
                delivery.error = None;
                delivery.sent_at = Some(Utc::now());
                self.repo.update_delivery(&delivery).await?;
                tracing::info!(delivery_id = %delivery.id, endpoint = %endpoint.url, "webhook delivered");
                Ok(serde_json::json!({"status": "sent", "attempts": delivery.attempts}))
            }
            Ok(resp) => {
                let code = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                delivery.response_code = Some(code);
                delivery.set_response_body(&text);
                delivery.error = Some(format!("endpoint returned {code}"));
                self.settle_failed_attempt(delivery, &endpoint).await
            }
            Err(e) => {
                delivery.response_code = None;
                delivery.error = Some(e.to_string());
                self.settle_failed_attempt(delivery, &endpoint).await
            }
        }
    }

    /// Record a failed attempt and classify it for the queue: transient
    /// while attempts remain, permanent (and `failed`) once exhausted.
    async fn settle_failed_attempt(
        &self,
        mut delivery: WebhookDelivery,
        endpoint: &WebhookEndpoint,
    ) -> CoreResult<serde_json::Value> {
        let error = delivery.error.clone().unwrap_or_else(|| "delivery failed".into());

        if delivery.attempts >= delivery.max_attempts {
            delivery.status = DeliveryStatus::Failed;
            self.repo.update_delivery(&delivery).await?;
            tracing::warn!(
                delivery_id = %delivery.id,
                endpoint = %endpoint.url,
                attempts = delivery.attempts,
                error,
                "webhook delivery exhausted"
            );
            self.announce_failure(&delivery, endpoint).await;
            Err(CoreError::Permanent(format!(
                "delivery exhausted after {} attempts: {error}",
                delivery.attempts
            )))
        } else {
            delivery.status = DeliveryStatus::Retrying;
            self.repo.update_delivery(&delivery).await?;
            Err(CoreError::Transient(error))
        }
    }

    /// Tell `delivery.failed` subscribers about a dead delivery. Never
    /// recursive: failures of `delivery.failed` deliveries are not
    /// re-announced.
    async fn announce_failure(&self, delivery: &WebhookDelivery, endpoint: &WebhookEndpoint) {
        if delivery.event_type == DELIVERY_FAILED_EVENT {
            return;
        }
        let event = WebhookEvent::new(
            DELIVERY_FAILED_EVENT,
            serde_json::json!({
                "delivery_id": delivery.id,
                "endpoint_id": endpoint.id,
                "event_type": delivery.event_type,
                "attempts": delivery.attempts,
                "error": delivery.error,
            }),
            &endpoint.user_id,
        );
        if let Err(e) = self.dispatch(&event).await {
            tracing::warn!(delivery_id = %delivery.id, error = %e, "failure announcement lost");
        }
    }

    // Endpoint management

    /// Create an endpoint with a vault-generated secret. The plaintext
    /// secret is returned exactly once, for the subscriber to store.
    pub async fn create_endpoint(
        &self,
        user_id: &str,
        url: &str,
        events: Vec<String>,
    ) -> CoreResult<(WebhookEndpoint, String)> {
        if url.trim().is_empty() {
            return Err(CoreError::Validation("endpoint url is empty".into()));
        }
        let plaintext = self.vault.generate();
        let stored = self.vault.encrypt(&plaintext).await?;
        let endpoint = WebhookEndpoint::new(user_id, url, stored, events);
        self.repo.insert_endpoint(&endpoint).await?;
        Ok((endpoint, plaintext))
    }

    /// Rotate an endpoint's secret; rate-limited to one rotation per
    /// user per hour.
    pub async fn rotate_secret(&self, endpoint_id: Uuid) -> CoreResult<String> {
        let mut endpoint = self
            .repo
            .get_endpoint(endpoint_id)
            .await?
            .ok_or(CoreError::EndpointNotFound(endpoint_id))?;

        if !self.rotation_limiter.try_acquire(&endpoint.user_id) {
            return Err(CoreError::Capacity(format!(
                "secret rotation for user {} is limited to one per hour",
                endpoint.user_id
            )));
        }

        let plaintext = self.vault.generate();
        endpoint.secret = self.vault.encrypt(&plaintext).await?;
        endpoint.updated_at = Utc::now();
        self.repo.update_endpoint(&endpoint).await?;
        tracing::info!(endpoint_id = %endpoint_id, "webhook secret rotated");
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteDeadLetterRepository, SqliteJobRepository,
        SqliteWebhookRepository,
    };
    use crate::domain::ports::{PlaintextVault, TracingTelemetrySink};
    use crate::services::task_queue::QueueConfig;
    use crate::services::webhook_signature::verify;

    async fn setup() -> (Arc<WebhookDispatcher>, Arc<SqliteWebhookRepository>, Arc<TaskQueue>, Arc<SqliteJobRepository>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let jobs = Arc::new(SqliteJobRepository::new(pool.clone()));
        let queue = Arc::new(TaskQueue::new(
            jobs.clone(),
            Arc::new(SqliteDeadLetterRepository::new(pool.clone())),
            Arc::new(TracingTelemetrySink),
            QueueConfig {
                poll_interval_ms: 20,
                default_concurrency: 1,
                default_timeout_ms: 15_000,
                shutdown_grace_ms: 2_000,
            },
        ));
        let repo = Arc::new(SqliteWebhookRepository::new(pool));
        let dispatcher = Arc::new(WebhookDispatcher::new(
            repo.clone(),
            Arc::new(PlaintextVault),
            queue.clone(),
            DispatcherConfig {
                timeout_ms: 5_000,
                max_attempts: 5,
                backoff_base_ms: 20,
            },
        ));

        let handler = dispatcher.clone();
        queue
            .register(
                WEBHOOK_QUEUE,
                DELIVER_JOB_TYPE,
                move |p: DeliverPayload, _ctx| {
                    let handler = handler.clone();
                    async move { handler.deliver(p.delivery_id).await }
                },
            )
            .unwrap();

        (dispatcher, repo, queue, jobs)
    }

    #[tokio::test]
    async fn successful_delivery_is_signed_and_marked_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_header("user-agent", "gpilot-webhooks/1.0")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let (dispatcher, repo, _queue, _jobs) = setup().await;
        let (_endpoint, secret) = dispatcher
            .create_endpoint("u1", &format!("{}/hook", server.url()), vec!["mission.completed".into()])
            .await
            .unwrap();

        let event = WebhookEvent::new("mission.completed", serde_json::json!({"id": "m1"}), "u1");
        let ids = dispatcher.dispatch(&event).await.unwrap();
        assert_eq!(ids.len(), 1);

        dispatcher.deliver(ids[0]).await.unwrap();
        mock.assert_async().await;

        let delivery = repo.get_delivery(ids[0]).await.unwrap().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Sent);
        assert_eq!(delivery.response_code, Some(200));
        assert_eq!(delivery.response_body.as_deref(), Some("ok"));
        assert!(delivery.sent_at.is_some());
        assert_eq!(delivery.attempts, 1);

        // The signature scheme round-trips over the stored payload.
        let body = serde_json::to_string(&delivery.payload).unwrap();
        let header = sign(&body, &secret, Utc::now().timestamp());
        verify(&body, &header, &secret, Utc::now().timestamp(), 300).unwrap();
    }

    #[tokio::test]
    async fn unsubscribed_event_creates_no_delivery() {
        let (dispatcher, _repo, _queue, _jobs) = setup().await;
        dispatcher
            .create_endpoint("u1", "https://example.com/hook", vec!["other.event".into()])
            .await
            .unwrap();

        let event = WebhookEvent::new("mission.completed", serde_json::json!({}), "u1");
        let ids = dispatcher.dispatch(&event).await.unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn failing_endpoint_exhausts_to_failed_and_dlq() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .expect_at_least(5)
            .create_async()
            .await;

        let (dispatcher, repo, queue, jobs) = setup().await;
        dispatcher
            .create_endpoint("u1", &format!("{}/hook", server.url()), vec!["x".into()])
            .await
            .unwrap();

        let event = WebhookEvent::new("x", serde_json::json!({}), "u1");
        let ids = dispatcher.dispatch(&event).await.unwrap();

        queue.start_workers(WEBHOOK_QUEUE, Some(1)).await;
        let deadline = std::time::Instant::now() + Duration::from_secs(20);
        loop {
            let delivery = repo.get_delivery(ids[0]).await.unwrap().unwrap();
            if delivery.status == DeliveryStatus::Failed {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "delivery never exhausted");
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        queue.stop_workers(WEBHOOK_QUEUE).await;
        mock.assert_async().await;

        let delivery = repo.get_delivery(ids[0]).await.unwrap().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.attempts, 5);
        assert_eq!(delivery.response_code, Some(500));

        // The delivery job itself landed in failed status.
        let metrics = <SqliteJobRepository as crate::domain::ports::JobRepository>::queue_metrics(
            &jobs,
            WEBHOOK_QUEUE,
        )
        .await
        .unwrap();
        assert_eq!(metrics.failed, 1);
    }

    #[tokio::test]
    async fn redelivery_of_sent_delivery_is_noop() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let (dispatcher, _repo, _queue, _jobs) = setup().await;
        dispatcher
            .create_endpoint("u1", &format!("{}/hook", server.url()), vec!["x".into()])
            .await
            .unwrap();

        let event = WebhookEvent::new("x", serde_json::json!({}), "u1");
        let ids = dispatcher.dispatch(&event).await.unwrap();
        dispatcher.deliver(ids[0]).await.unwrap();
        dispatcher.deliver(ids[0]).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rotation_is_rate_limited_per_user() {
        let (dispatcher, _repo, _queue, _jobs) = setup().await;
        let (endpoint, first_secret) = dispatcher
            .create_endpoint("u1", "https://example.com/hook", vec!["x".into()])
            .await
            .unwrap();

        let rotated = dispatcher.rotate_secret(endpoint.id).await.unwrap();
        assert_ne!(rotated, first_secret);

        let err = dispatcher.rotate_secret(endpoint.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Capacity(_)));
    }
}
