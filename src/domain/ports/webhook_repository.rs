//! Webhook endpoint and delivery repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::CoreResult;
use crate::domain::models::{WebhookDelivery, WebhookEndpoint};

/// Repository interface for webhook endpoints and deliveries. The
/// dispatcher is the sole writer of delivery rows.
#[async_trait]
pub trait WebhookRepository: Send + Sync {
    // Endpoints

    async fn insert_endpoint(&self, endpoint: &WebhookEndpoint) -> CoreResult<()>;

    async fn get_endpoint(&self, id: Uuid) -> CoreResult<Option<WebhookEndpoint>>;

    async fn update_endpoint(&self, endpoint: &WebhookEndpoint) -> CoreResult<()>;

    async fn delete_endpoint(&self, id: Uuid) -> CoreResult<()>;

    async fn list_endpoints(&self, user_id: &str) -> CoreResult<Vec<WebhookEndpoint>>;

    /// Active endpoints of a user subscribed to an event type.
    async fn list_subscribed(
        &self,
        user_id: &str,
        event_type: &str,
    ) -> CoreResult<Vec<WebhookEndpoint>>;

    // Deliveries

    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> CoreResult<()>;

    async fn get_delivery(&self, id: Uuid) -> CoreResult<Option<WebhookDelivery>>;

    async fn update_delivery(&self, delivery: &WebhookDelivery) -> CoreResult<()>;

    /// Delivery log for an endpoint, newest first.
    async fn list_deliveries(
        &self,
        endpoint_id: Uuid,
        limit: usize,
    ) -> CoreResult<Vec<WebhookDelivery>>;

    /// Delete deliveries created before `before`. Returns rows removed.
    async fn prune_deliveries(&self, before: DateTime<Utc>) -> CoreResult<u64>;
}
