//! API request handlers

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::config::SiteConfig;
use crate::pipeline::{Mode, SharedState};

/// State handed to every handler.
#[derive(Debug, Clone)]
pub struct ApiState {
    pub app_state: SharedState,
    pub site: SiteConfig,
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub mode: Mode,
    pub topic: String,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// GET /health
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let app_state = state.app_state.lock();
    Json(HealthResponse {
        status: "ok",
        mode: app_state.mode(),
        topic: state.site.topic(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: app_state.uptime_secs(),
        last_message_at: app_state.last_message_at,
    })
}

// ============================================================================
// Models
// ============================================================================

/// GET /api/v1/models
pub async fn list_models(State(state): State<ApiState>) -> Response {
    let snapshots = state.app_state.lock().handler.snapshot();
    ApiResponse::ok(snapshots)
}

/// GET /api/v1/models/:key
pub async fn get_model(State(state): State<ApiState>, Path(key): Path<String>) -> Response {
    let snapshot = state
        .app_state
        .lock()
        .handler
        .snapshot()
        .into_iter()
        .find(|s| s.key == key);
    match snapshot {
        Some(s) => ApiResponse::ok(s),
        None => ApiErrorResponse::not_found(format!("No model for key '{key}'")),
    }
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub reset: Vec<String>,
}

/// POST /api/v1/models/:key/reset
pub async fn reset_model(State(state): State<ApiState>, Path(key): Path<String>) -> Response {
    let found = state.app_state.lock().handler.reset(&key);
    if found {
        info!(key = %key, "Model reset via API");
        ApiResponse::ok(ResetResponse { reset: vec![key] })
    } else {
        ApiErrorResponse::not_found(format!("No model for key '{key}'"))
    }
}

/// POST /api/v1/models/reset
pub async fn reset_all_models(State(state): State<ApiState>) -> Response {
    let keys = {
        let mut app_state = state.app_state.lock();
        app_state.handler.reset_all();
        app_state
            .handler
            .snapshot()
            .into_iter()
            .map(|s| s.key)
            .collect::<Vec<_>>()
    };
    info!(models = keys.len(), "All models reset via API");
    ApiResponse::ok(ResetResponse { reset: keys })
}

// ============================================================================
// Stats
// ============================================================================

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<ApiState>) -> Response {
    let stats = state.app_state.lock().stats.clone();
    ApiResponse::ok(stats)
}
