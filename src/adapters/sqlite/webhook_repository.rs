//! SQLite implementation of the WebhookRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{DeliveryStatus, WebhookDelivery, WebhookEndpoint};
use crate::domain::ports::WebhookRepository;

#[derive(Clone)]
pub struct SqliteWebhookRepository {
    pool: SqlitePool,
}

impl SqliteWebhookRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookRepository for SqliteWebhookRepository {
    async fn insert_endpoint(&self, endpoint: &WebhookEndpoint) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO webhook_endpoints (id, user_id, url, secret, events, is_active,
               created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(endpoint.id.to_string())
        .bind(&endpoint.user_id)
        .bind(&endpoint.url)
        .bind(&endpoint.secret)
        .bind(serde_json::to_string(&endpoint.events)?)
        .bind(endpoint.is_active)
        .bind(endpoint.created_at.to_rfc3339())
        .bind(endpoint.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_endpoint(&self, id: Uuid) -> CoreResult<Option<WebhookEndpoint>> {
        let row: Option<EndpointRow> = sqlx::query_as("SELECT * FROM webhook_endpoints WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(WebhookEndpoint::try_from).transpose()
    }

    async fn update_endpoint(&self, endpoint: &WebhookEndpoint) -> CoreResult<()> {
        let result = sqlx::query(
            r#"UPDATE webhook_endpoints SET url = ?, secret = ?, events = ?, is_active = ?,
               updated_at = ? WHERE id = ?"#,
        )
        .bind(&endpoint.url)
        .bind(&endpoint.secret)
        .bind(serde_json::to_string(&endpoint.events)?)
        .bind(endpoint.is_active)
        .bind(Utc::now().to_rfc3339())
        .bind(endpoint.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::EndpointNotFound(endpoint.id));
        }
        Ok(())
    }

    async fn delete_endpoint(&self, id: Uuid) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM webhook_endpoints WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::EndpointNotFound(id));
        }
        Ok(())
    }

    async fn list_endpoints(&self, user_id: &str) -> CoreResult<Vec<WebhookEndpoint>> {
        let rows: Vec<EndpointRow> =
            sqlx::query_as("SELECT * FROM webhook_endpoints WHERE user_id = ? ORDER BY created_at")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(WebhookEndpoint::try_from).collect()
    }

    async fn list_subscribed(
        &self,
        user_id: &str,
        event_type: &str,
    ) -> CoreResult<Vec<WebhookEndpoint>> {
        // Subscription sets are small JSON arrays; filter in memory rather
        // than teaching SQLite about their shape.
        let endpoints = self.list_endpoints(user_id).await?;
        Ok(endpoints
            .into_iter()
            .filter(|e| e.subscribes_to(event_type))
            .collect())
    }

    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO webhook_deliveries (id, endpoint_id, event_type, payload, status,
               attempts, max_attempts, response_code, response_body, error, sent_at, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(delivery.id.to_string())
        .bind(delivery.endpoint_id.to_string())
        .bind(&delivery.event_type)
        .bind(serde_json::to_string(&delivery.payload)?)
        .bind(delivery.status.as_str())
        .bind(delivery.attempts as i64)
        .bind(delivery.max_attempts as i64)
        .bind(delivery.response_code.map(|c| c as i64))
        .bind(&delivery.response_body)
        .bind(&delivery.error)
        .bind(delivery.sent_at.map(|t| t.to_rfc3339()))
        .bind(delivery.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_delivery(&self, id: Uuid) -> CoreResult<Option<WebhookDelivery>> {
        let row: Option<DeliveryRow> =
            sqlx::query_as("SELECT * FROM webhook_deliveries WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(WebhookDelivery::try_from).transpose()
    }

    async fn update_delivery(&self, delivery: &WebhookDelivery) -> CoreResult<()> {
        let result = sqlx::query(
            r#"UPDATE webhook_deliveries SET status = ?, attempts = ?, response_code = ?,
               response_body = ?, error = ?, sent_at = ? WHERE id = ?"#,
        )
        .bind(delivery.status.as_str())
        .bind(delivery.attempts as i64)
        .bind(delivery.response_code.map(|c| c as i64))
        .bind(&delivery.response_body)
        .bind(&delivery.error)
        .bind(delivery.sent_at.map(|t| t.to_rfc3339()))
        .bind(delivery.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Validation(format!(
                "webhook delivery {} not found",
                delivery.id
            )));
        }
        Ok(())
    }

    async fn list_deliveries(
        &self,
        endpoint_id: Uuid,
        limit: usize,
    ) -> CoreResult<Vec<WebhookDelivery>> {
        let rows: Vec<DeliveryRow> = sqlx::query_as(
            r#"SELECT * FROM webhook_deliveries WHERE endpoint_id = ?
               ORDER BY created_at DESC LIMIT ?"#,
        )
        .bind(endpoint_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WebhookDelivery::try_from).collect()
    }

    async fn prune_deliveries(&self, before: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM webhook_deliveries WHERE created_at < ?")
            .bind(before.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct EndpointRow {
    id: String,
    user_id: String,
    url: String,
    secret: String,
    events: String,
    is_active: bool,
    created_at: String,
    updated_at: String,
}

impl TryFrom<EndpointRow> for WebhookEndpoint {
    type Error = CoreError;

    fn try_from(row: EndpointRow) -> Result<Self, Self::Error> {
        Ok(WebhookEndpoint {
            id: super::parse_uuid(&row.id)?,
            user_id: row.user_id,
            url: row.url,
            secret: row.secret,
            events: super::parse_json(&row.events)?,
            is_active: row.is_active,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    id: String,
    endpoint_id: String,
    event_type: String,
    payload: String,
    status: String,
    attempts: i64,
    max_attempts: i64,
    response_code: Option<i64>,
    response_body: Option<String>,
    error: Option<String>,
    sent_at: Option<String>,
    created_at: String,
}

impl TryFrom<DeliveryRow> for WebhookDelivery {
    type Error = CoreError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        let status = DeliveryStatus::from_str(&row.status).ok_or_else(|| {
            CoreError::Serialization(format!("invalid delivery status: {}", row.status))
        })?;

        Ok(WebhookDelivery {
            id: super::parse_uuid(&row.id)?,
            endpoint_id: super::parse_uuid(&row.endpoint_id)?,
            event_type: row.event_type,
            payload: super::parse_json(&row.payload)?,
            status,
            attempts: row.attempts as u32,
            max_attempts: row.max_attempts as u32,
            response_code: row.response_code.map(|c| c as u16),
            response_body: row.response_body,
            error: row.error,
            sent_at: super::parse_optional_datetime(row.sent_at)?,
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::WebhookEvent;

    #[tokio::test]
    async fn endpoint_round_trips() {
        let repo = SqliteWebhookRepository::new(create_migrated_test_pool().await.unwrap());
        let ep = WebhookEndpoint::new(
            "u1",
            "https://example.com/hook",
            "whsec_abc",
            vec!["mission.completed".into()],
        );
        repo.insert_endpoint(&ep).await.unwrap();

        let stored = repo.get_endpoint(ep.id).await.unwrap().unwrap();
        assert_eq!(stored.url, "https://example.com/hook");
        assert_eq!(stored.secret, "whsec_abc");
        assert_eq!(stored.events, vec!["mission.completed".to_string()]);
    }

    #[tokio::test]
    async fn subscription_filter_honors_type_and_active() {
        let repo = SqliteWebhookRepository::new(create_migrated_test_pool().await.unwrap());
        let subscribed = WebhookEndpoint::new("u1", "https://a.example", "s", vec!["x".into()]);
        let other_type = WebhookEndpoint::new("u1", "https://b.example", "s", vec!["y".into()]);
        let mut inactive = WebhookEndpoint::new("u1", "https://c.example", "s", vec!["x".into()]);
        inactive.is_active = false;

        repo.insert_endpoint(&subscribed).await.unwrap();
        repo.insert_endpoint(&other_type).await.unwrap();
        repo.insert_endpoint(&inactive).await.unwrap();

        let matched = repo.list_subscribed("u1", "x").await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, subscribed.id);
    }

    #[tokio::test]
    async fn delivery_status_update_round_trips() {
        let repo = SqliteWebhookRepository::new(create_migrated_test_pool().await.unwrap());
        let ep = WebhookEndpoint::new("u1", "https://a.example", "s", vec!["x".into()]);
        repo.insert_endpoint(&ep).await.unwrap();

        let event = WebhookEvent::new("x", serde_json::json!({"k": 1}), "u1");
        let mut delivery = WebhookDelivery::new(ep.id, &event, 5);
        repo.insert_delivery(&delivery).await.unwrap();

        delivery.status = DeliveryStatus::Sent;
        delivery.attempts = 1;
        delivery.response_code = Some(200);
        delivery.sent_at = Some(Utc::now());
        repo.update_delivery(&delivery).await.unwrap();

        let stored = repo.get_delivery(delivery.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Sent);
        assert_eq!(stored.response_code, Some(200));
        assert!(stored.sent_at.is_some());
    }
}
