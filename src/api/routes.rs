//! API route definitions
//!
//! - /api/v1/models - per-key model snapshots
//! - /api/v1/models/:key - one snapshot
//! - /api/v1/models/:key/reset - drop one key back to building
//! - /api/v1/models/reset - reset every key
//! - /api/v1/stats - pipeline counters

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{self, ApiState};

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/models", get(handlers::list_models))
        .route("/models/reset", post(handlers::reset_all_models))
        .route("/models/:key", get(handlers::get_model))
        .route("/models/:key/reset", post(handlers::reset_model))
        .route("/stats", get(handlers::get_stats))
        .with_state(state)
}

/// Health endpoint at root level
pub fn health_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .with_state(state)
}
