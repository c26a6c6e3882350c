//! Axum router wiring (§6 "Axum router wiring"). One handler per endpoint,
//! a shared `Arc<GatewayCore>` application state, `tower_http::trace::TraceLayer`
//! + `tower_http::cors::CorsLayer`.

use std::sync::Arc;

use axum::extract::{Query as AxumQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use gateway_core::atoms::error::DispatchError;
use gateway_core::atoms::types::{CircuitState, Query, SessionKey};
use gateway_core::GatewayCore;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub fn build_router(core: Arc<GatewayCore>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/route", post(route))
        .route("/health", get(health))
        .route("/quotas/status", get(quotas_status))
        .layer(axum::middleware::from_fn_with_state(core.clone(), auth))
        .layer(axum::middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(core)
}

/// Stamps every response with a fresh correlation id so a caller can match a
/// `5xx`/`429` back to the server's own log lines for that request.
async fn request_id(request: axum::extract::Request, next: axum::middleware::Next) -> Response {
    let id = Uuid::new_v4();
    let mut response = next.run(request).await;
    if let Ok(value) = axum::http::HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Public paths that bypass bearer auth, enumerated (§6 "Auth").
fn is_public_path(path: &str) -> bool {
    matches!(path, "/health" | "/")
}

async fn auth(
    State(core): State<Arc<GatewayCore>>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let path = request.uri().path();
    if is_public_path(path) {
        return next.run(request).await;
    }
    let Some(expected) = core.dispatcher.config().auth.bearer_token.as_deref() else {
        return next.run(request).await;
    };
    let authorized = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected);
    if authorized {
        next.run(request).await
    } else {
        error_response(DispatchError::Unauthorized)
    }
}

// ── POST /chat ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequestBody {
    content: String,
    #[serde(rename = "sessionKey", default)]
    session_key: Option<String>,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
}

async fn chat(State(core): State<Arc<GatewayCore>>, Json(body): Json<ChatRequestBody>) -> Response {
    if body.content.trim().is_empty() {
        return error_response(DispatchError::InvalidRequest("content must not be empty".into()));
    }
    let query = Query {
        content: body.content,
        session_key: body.session_key.map(SessionKey),
        project_id: body.project_id,
        requested_agent: body.agent,
        requested_model: body.model,
    };
    match core.dispatcher.dispatch(query, None).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(err),
    }
}

// ── POST /route ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RouteRequestBody {
    query: String,
}

async fn route(State(core): State<Arc<GatewayCore>>, Json(body): Json<RouteRequestBody>) -> Response {
    let decision = core.dispatcher.route_preview(&body.query);
    (StatusCode::OK, Json(decision)).into_response()
}

// ── GET /health ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    subsystems: serde_json::Value,
}

async fn health(State(core): State<Arc<GatewayCore>>) -> Response {
    let states = core.dispatcher.breaker_states();
    let open_count = states.iter().filter(|(_, s)| *s == CircuitState::Open).count();
    let status = if open_count == 0 {
        "ok"
    } else if open_count < states.len() {
        "degraded"
    } else {
        "critical"
    };
    let subsystems: serde_json::Map<String, serde_json::Value> = states
        .into_iter()
        .map(|(tier, state)| (tier.as_str().to_string(), serde_json::json!(format!("{state:?}").to_lowercase())))
        .collect();
    (StatusCode::OK, Json(HealthBody { status, subsystems: serde_json::Value::Object(subsystems) })).into_response()
}

// ── GET /quotas/status ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct QuotaQuery {
    project_id: Option<String>,
}

#[derive(Serialize)]
struct QuotaStatusBody {
    project_id: Option<String>,
    daily_spend: f64,
    daily_limit: f64,
    daily_percent: f64,
    daily_remaining: f64,
    monthly_spend: f64,
    monthly_limit: f64,
    monthly_percent: f64,
    monthly_remaining: f64,
}

async fn quotas_status(State(core): State<Arc<GatewayCore>>, AxumQuery(q): AxumQuery<QuotaQuery>) -> Response {
    let limits = core.dispatcher.config().limits_for_project(q.project_id.as_deref());
    let daily_spend = match core.dispatcher.ledger().spend_in_current_day(q.project_id.as_deref()) {
        Ok(v) => v,
        Err(e) => return error_response(DispatchError::Internal(e.to_string())),
    };
    let monthly_spend = match core.dispatcher.ledger().spend_in_current_month(q.project_id.as_deref()) {
        Ok(v) => v,
        Err(e) => return error_response(DispatchError::Internal(e.to_string())),
    };
    let body = QuotaStatusBody {
        project_id: q.project_id,
        daily_spend,
        daily_limit: limits.daily_usd,
        daily_percent: percent(daily_spend, limits.daily_usd),
        daily_remaining: (limits.daily_usd - daily_spend).max(0.0),
        monthly_spend,
        monthly_limit: limits.monthly_usd,
        monthly_percent: percent(monthly_spend, limits.monthly_usd),
        monthly_remaining: (limits.monthly_usd - monthly_spend).max(0.0),
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn percent(spend: f64, limit: f64) -> f64 {
    if limit <= 0.0 {
        0.0
    } else {
        (spend / limit * 100.0).clamp(0.0, 100.0)
    }
}

// ── Error rendering (§7 "user-visible failure behavior") ────────────────

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_s: Option<u64>,
}

fn error_response(err: DispatchError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let retry_after_s = match &err {
        DispatchError::RateLimitedUpstream { retry_after_s } => *retry_after_s,
        _ => None,
    };
    let body = ErrorBody { error: err.kind(), detail: err.to_string(), retry_after_s };
    (status, Json(body)).into_response()
}
