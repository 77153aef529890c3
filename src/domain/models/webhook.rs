//! Webhook endpoints, events, and delivery records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response bodies stored on a delivery are truncated to this size.
pub const RESPONSE_BODY_CAP: usize = 1024;

/// A subscriber URL owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub user_id: String,
    pub url: String,
    /// Stored through the secret vault; never returned by the API.
    pub secret: String,
    /// Event types this endpoint subscribes to.
    pub events: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    pub fn new(
        user_id: impl Into<String>,
        url: impl Into<String>,
        secret: impl Into<String>,
        events: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            url: url.into(),
            secret: secret.into(),
            events,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.is_active && self.events.iter().any(|e| e == event_type)
    }
}

/// A domain event fanning out to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Deduplication id embedded in the body for receivers.
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn new(
        event_type: impl Into<String>,
        data: serde_json::Value,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            data,
            user_id: user_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// The wire body POSTed to receivers.
    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "type": self.event_type,
            "data": self.data,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

/// Status of a single delivery attempt chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    Sent,
    Failed,
}

impl Default for DeliveryStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "retrying" => Some(Self::Retrying),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

/// One event fanned out to one endpoint, retried until sent or exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub event_type: String,
    /// The exact body to POST; signing covers these bytes.
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub response_code: Option<u16>,
    /// First KiB of the last response body.
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WebhookDelivery {
    pub fn new(endpoint_id: Uuid, event: &WebhookEvent, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint_id,
            event_type: event.event_type.clone(),
            payload: event.body(),
            status: DeliveryStatus::Pending,
            attempts: 0,
            max_attempts,
            response_code: None,
            response_body: None,
            error: None,
            sent_at: None,
            created_at: Utc::now(),
        }
    }

    /// Truncate and store a response body, capped at [`RESPONSE_BODY_CAP`].
    pub fn set_response_body(&mut self, body: &str) {
        let mut end = body.len().min(RESPONSE_BODY_CAP);
        while end > 0 && !body.is_char_boundary(end) {
            end -= 1;
        }
        self.response_body = Some(body[..end].to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_endpoint_subscribes_to_nothing() {
        let mut ep = WebhookEndpoint::new("u1", "https://example.com/hook", "s", vec!["a".into()]);
        assert!(ep.subscribes_to("a"));
        assert!(!ep.subscribes_to("b"));
        ep.is_active = false;
        assert!(!ep.subscribes_to("a"));
    }

    #[test]
    fn event_body_carries_type_data_and_timestamp() {
        let event = WebhookEvent::new("mission.completed", serde_json::json!({"id": "m1"}), "u1");
        let body = event.body();
        assert_eq!(body["type"], "mission.completed");
        assert_eq!(body["data"]["id"], "m1");
        assert!(body["timestamp"].is_string());
        assert!(body["id"].is_string());
    }

    #[test]
    fn response_body_is_capped_at_one_kib() {
        let event = WebhookEvent::new("x", serde_json::json!({}), "u1");
        let mut delivery = WebhookDelivery::new(Uuid::new_v4(), &event, 5);
        delivery.set_response_body(&"y".repeat(4096));
        assert_eq!(delivery.response_body.as_ref().unwrap().len(), RESPONSE_BODY_CAP);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let event = WebhookEvent::new("x", serde_json::json!({}), "u1");
        let mut delivery = WebhookDelivery::new(Uuid::new_v4(), &event, 5);
        // Multibyte characters straddling the cap must not split.
        delivery.set_response_body(&"é".repeat(1024));
        let stored = delivery.response_body.unwrap();
        assert!(stored.len() <= RESPONSE_BODY_CAP);
        assert!(stored.chars().all(|c| c == 'é'));
    }

    #[test]
    fn sent_and_failed_are_terminal() {
        assert!(DeliveryStatus::Sent.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert!(!DeliveryStatus::Retrying.is_terminal());
        assert!(!DeliveryStatus::Pending.is_terminal());
    }
}
