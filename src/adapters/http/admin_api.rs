//! Administrative HTTP API.
//!
//! JSON over axum. Authentication is out of scope for the core: the
//! authenticated user id arrives in the `x-user-id` header, placed
//! there by the deployment's auth layer. Endpoint secrets are never
//! included in read responses; creation and rotation return the
//! plaintext exactly once.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::domain::errors::CoreError;
use crate::domain::models::{
    AlertCondition, AlertRule, EnqueueOptions, MetricKind, MissionPlan, NotificationChannel,
    Resolution, TimeRange, WebhookEndpoint,
};
use crate::domain::ports::{
    AlertRepository, DeadLetterRepository, MissionRepository, WebhookRepository,
};
use crate::services::runtime::Runtime;

#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<Runtime>,
}

/// Build the admin router.
pub fn router(runtime: Arc<Runtime>) -> Router {
    let enable_cors = runtime.config.api.enable_cors;
    let mut router = Router::new()
        .route("/jobs", post(enqueue_job))
        .route("/queues/{queue}/metrics", get(queue_metrics))
        .route("/missions", post(submit_mission))
        .route("/missions/{id}", get(get_mission))
        .route("/metrics/overview", get(metrics_overview))
        .route("/metrics/timeseries", get(metrics_timeseries))
        .route("/alerts/rules", post(create_rule).get(list_rules))
        .route("/alerts/rules/{id}", delete(delete_rule))
        .route("/alerts/firings", get(list_firings))
        .route("/webhooks/endpoints", post(create_endpoint).get(list_endpoints))
        .route("/webhooks/endpoints/{id}/rotate", post(rotate_endpoint_secret))
        .route("/webhooks/deliveries", get(list_deliveries))
        .route("/dlq", get(list_dead_letters))
        .route("/dlq/{id}/replay", post(replay_dead_letter))
        .with_state(ApiState { runtime })
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        router = router.layer(CorsLayer::new().allow_origin(Any).allow_headers(Any));
    }
    router
}

/// Bind and serve until the socket closes.
pub async fn serve(runtime: Arc<Runtime>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", runtime.config.api.host, runtime.config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr, "admin API listening");
    axum::serve(listener, router(runtime)).await?;
    Ok(())
}

// Error plumbing

struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::JobNotFound(_)
            | CoreError::MissionNotFound(_)
            | CoreError::EndpointNotFound(_)
            | CoreError::RuleNotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Capacity(_) => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({"error": self.0.to_string()}));
        (status, body).into_response()
    }
}

fn require_user(headers: &HeaderMap) -> Result<String, Response> {
    match headers.get("x-user-id").and_then(|v| v.to_str().ok()) {
        Some(user) if !user.is_empty() => Ok(user.to_string()),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "missing x-user-id header"})),
        )
            .into_response()),
    }
}

/// A read view of an endpoint with the secret withheld.
fn redact_endpoint(endpoint: &WebhookEndpoint) -> serde_json::Value {
    serde_json::json!({
        "id": endpoint.id,
        "userId": endpoint.user_id,
        "url": endpoint.url,
        "events": endpoint.events,
        "isActive": endpoint.is_active,
        "createdAt": endpoint.created_at,
        "updatedAt": endpoint.updated_at,
    })
}

// Jobs

#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    queue: String,
    #[serde(rename = "type")]
    job_type: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    backoff_base_ms: Option<u64>,
    #[serde(default)]
    delay_ms: Option<u64>,
    #[serde(default)]
    idempotency_key: Option<String>,
}

async fn enqueue_job(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<EnqueueRequest>,
) -> Result<Response, ApiError> {
    let user = match require_user(&headers) {
        Ok(u) => u,
        Err(resp) => return Ok(resp),
    };

    let mut options = EnqueueOptions::for_user(user);
    if let Some(priority) = req.priority {
        options = options.with_priority(priority);
    }
    if let Some(max_attempts) = req.max_attempts {
        options = options.with_max_attempts(max_attempts);
    }
    if let Some(base) = req.backoff_base_ms {
        options = options.with_backoff_base_ms(base);
    }
    if let Some(delay) = req.delay_ms {
        options = options.with_delay_ms(delay);
    }
    if let Some(key) = req.idempotency_key {
        options = options.with_idempotency_key(key);
    }

    let job_id = state
        .runtime
        .queue
        .enqueue(&req.queue, &req.job_type, req.payload, options)
        .await?;
    Ok(Json(serde_json::json!({"jobId": job_id})).into_response())
}

async fn queue_metrics(
    State(state): State<ApiState>,
    Path(queue): Path<String>,
) -> Result<Response, ApiError> {
    let metrics = state.runtime.queue.get_queue_metrics(&queue).await?;
    Ok(Json(metrics).into_response())
}

// Missions

async fn submit_mission(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(plan): Json<MissionPlan>,
) -> Result<Response, ApiError> {
    let user = match require_user(&headers) {
        Ok(u) => u,
        Err(resp) => return Ok(resp),
    };
    let mission_id = state.runtime.submit_mission(&user, plan).await?;
    Ok(Json(serde_json::json!({"missionId": mission_id})).into_response())
}

async fn get_mission(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let user = match require_user(&headers) {
        Ok(u) => u,
        Err(resp) => return Ok(resp),
    };
    let mission = state
        .runtime
        .missions
        .get(id)
        .await?
        .filter(|m| m.user_id == user)
        .ok_or(CoreError::MissionNotFound(id))?;
    Ok(Json(mission).into_response())
}

// Metrics

async fn metrics_overview(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = match require_user(&headers) {
        Ok(u) => u,
        Err(resp) => return Ok(resp),
    };
    let metrics = state.runtime.collector.collect_current_metrics(&user).await?;
    let score = metrics.health_score();
    let status = metrics.health_status().as_str();
    Ok(Json(serde_json::json!({
        "metrics": metrics,
        "health": {"score": score, "status": status},
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
struct TimeseriesQuery {
    metric: String,
    #[serde(default = "default_range")]
    range: String,
    #[serde(default = "default_resolution")]
    resolution: String,
}

fn default_range() -> String {
    "1h".to_string()
}

fn default_resolution() -> String {
    "1m".to_string()
}

async fn metrics_timeseries(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<TimeseriesQuery>,
) -> Result<Response, ApiError> {
    let user = match require_user(&headers) {
        Ok(u) => u,
        Err(resp) => return Ok(resp),
    };

    let metric = MetricKind::from_str(&query.metric)
        .ok_or_else(|| CoreError::Validation(format!("unknown metric '{}'", query.metric)))?;
    let range = TimeRange::from_str(&query.range)
        .ok_or_else(|| CoreError::Validation(format!("unknown range '{}'", query.range)))?;
    let resolution = Resolution::from_str(&query.resolution).ok_or_else(|| {
        CoreError::Validation(format!("unknown resolution '{}'", query.resolution))
    })?;

    let series = state
        .runtime
        .collector
        .get_timeseries(&user, metric, range, resolution)
        .await?;
    Ok(Json(serde_json::json!({
        "dataPoints": series.data_points,
        "aggregates": series.aggregates,
    }))
    .into_response())
}

// Alerts

#[derive(Debug, Deserialize)]
struct CreateRuleRequest {
    name: String,
    metric: String,
    condition: String,
    threshold: f64,
    #[serde(default)]
    window_minutes: Option<u32>,
    #[serde(default)]
    channels: Vec<String>,
    #[serde(default)]
    webhook_ids: Vec<Uuid>,
}

async fn create_rule(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<CreateRuleRequest>,
) -> Result<Response, ApiError> {
    let user = match require_user(&headers) {
        Ok(u) => u,
        Err(resp) => return Ok(resp),
    };

    let metric = MetricKind::from_str(&req.metric)
        .ok_or_else(|| CoreError::Validation(format!("unknown metric '{}'", req.metric)))?;
    let condition = AlertCondition::from_str(&req.condition)
        .ok_or_else(|| CoreError::Validation(format!("unknown condition '{}'", req.condition)))?;
    let channels: Vec<NotificationChannel> = req
        .channels
        .iter()
        .map(|c| {
            NotificationChannel::from_str(c)
                .ok_or_else(|| CoreError::Validation(format!("unknown channel '{c}'")))
        })
        .collect::<Result<_, _>>()?;

    let mut rule = AlertRule::new(user, req.name, metric, condition, req.threshold)
        .with_webhooks(req.webhook_ids);
    if !channels.is_empty() {
        rule = rule.with_channels(channels);
    }
    if let Some(window) = req.window_minutes {
        rule.window_minutes = window;
    }

    state.runtime.alerts.insert_rule(&rule).await?;
    Ok(Json(rule).into_response())
}

async fn list_rules(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = match require_user(&headers) {
        Ok(u) => u,
        Err(resp) => return Ok(resp),
    };
    let rules = state.runtime.alerts.list_rules(&user).await?;
    Ok(Json(rules).into_response())
}

async fn delete_rule(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let user = match require_user(&headers) {
        Ok(u) => u,
        Err(resp) => return Ok(resp),
    };
    let rule = state
        .runtime
        .alerts
        .get_rule(id)
        .await?
        .filter(|r| r.user_id == user)
        .ok_or(CoreError::RuleNotFound(id))?;
    state.runtime.alerts.delete_rule(rule.id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn list_firings(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = match require_user(&headers) {
        Ok(u) => u,
        Err(resp) => return Ok(resp),
    };
    let firings = state.runtime.alerts.list_firings(&user, 100).await?;
    Ok(Json(firings).into_response())
}

// Webhooks

#[derive(Debug, Deserialize)]
struct CreateEndpointRequest {
    url: String,
    #[serde(default)]
    events: Vec<String>,
}

async fn create_endpoint(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<CreateEndpointRequest>,
) -> Result<Response, ApiError> {
    let user = match require_user(&headers) {
        Ok(u) => u,
        Err(resp) => return Ok(resp),
    };
    let (endpoint, secret) = state
        .runtime
        .dispatcher
        .create_endpoint(&user, &req.url, req.events)
        .await?;

    // The plaintext secret appears in this response only; reads redact.
    let mut body = redact_endpoint(&endpoint);
    body["secret"] = serde_json::Value::String(secret);
    Ok(Json(body).into_response())
}

async fn list_endpoints(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = match require_user(&headers) {
        Ok(u) => u,
        Err(resp) => return Ok(resp),
    };
    let endpoints = state.runtime.webhooks.list_endpoints(&user).await?;
    let redacted: Vec<_> = endpoints.iter().map(redact_endpoint).collect();
    Ok(Json(redacted).into_response())
}

async fn rotate_endpoint_secret(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let user = match require_user(&headers) {
        Ok(u) => u,
        Err(resp) => return Ok(resp),
    };
    let endpoint = state
        .runtime
        .webhooks
        .get_endpoint(id)
        .await?
        .filter(|e| e.user_id == user)
        .ok_or(CoreError::EndpointNotFound(id))?;

    let secret = state.runtime.dispatcher.rotate_secret(endpoint.id).await?;
    Ok(Json(serde_json::json!({"secret": secret})).into_response())
}

#[derive(Debug, Deserialize)]
struct DeliveriesQuery {
    #[serde(rename = "endpointId")]
    endpoint_id: Uuid,
}

async fn list_deliveries(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<DeliveriesQuery>,
) -> Result<Response, ApiError> {
    let user = match require_user(&headers) {
        Ok(u) => u,
        Err(resp) => return Ok(resp),
    };
    // Deliveries hang off an endpoint; ownership is checked there.
    state
        .runtime
        .webhooks
        .get_endpoint(query.endpoint_id)
        .await?
        .filter(|e| e.user_id == user)
        .ok_or(CoreError::EndpointNotFound(query.endpoint_id))?;

    let deliveries = state
        .runtime
        .webhooks
        .list_deliveries(query.endpoint_id, 100)
        .await?;
    Ok(Json(deliveries).into_response())
}

// Dead letters

async fn list_dead_letters(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let entries = state.runtime.dead_letters.list_unresolved(100).await?;
    Ok(Json(entries).into_response())
}

async fn replay_dead_letter(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let job_id = state.runtime.queue.replay_dead_letter(id).await?;
    Ok(Json(serde_json::json!({"jobId": job_id})).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_user_header_is_rejected() {
        let headers = HeaderMap::new();
        assert!(require_user(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", "u1".parse().unwrap());
        assert_eq!(require_user(&headers).unwrap(), "u1");
    }

    #[test]
    fn redacted_endpoint_has_no_secret() {
        let endpoint = WebhookEndpoint::new("u1", "https://x.example", "whsec_hidden", vec![]);
        let body = redact_endpoint(&endpoint);
        assert!(body.get("secret").is_none());
        assert_eq!(body["url"], "https://x.example");
    }
}
