//! API routes for edgelinkd
//!
//! Read-only: every handler reads the cache's current value and never
//! waits on poll activity.

use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use edgelink_common::{Reading, VERSION};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

type AppStateArc = Arc<AppState>;

/// Liveness body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Body of a 404 for an unknown device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotFoundResponse {
    pub error: String,
    pub device_id: String,
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/healthz", get(health_check))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "edgelink".to_string(),
        version: VERSION.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Reading Routes
// ============================================================================

pub fn reading_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/readings", get(list_readings))
        .route("/readings/:device_id", get(get_reading))
        // Path used by earlier deployments
        .route("/api/readings/:device_id", get(get_reading))
}

async fn get_reading(
    State(state): State<AppStateArc>,
    Path(device_id): Path<String>,
) -> Result<Json<Reading>, (StatusCode, Json<NotFoundResponse>)> {
    match state.cache.latest(&device_id) {
        Some(reading) => Ok(Json(reading.as_ref().clone())),
        None => {
            debug!(device = %device_id, "no cached reading");
            Err((
                StatusCode::NOT_FOUND,
                Json(NotFoundResponse {
                    error: "not found".to_string(),
                    device_id,
                }),
            ))
        }
    }
}

async fn list_readings(State(state): State<AppStateArc>) -> Json<Vec<Reading>> {
    let readings = state
        .cache
        .snapshot()
        .iter()
        .map(|r| r.as_ref().clone())
        .collect();
    Json(readings)
}

// ============================================================================
// Metrics Routes
// ============================================================================

pub fn metrics_routes() -> Router<AppStateArc> {
    Router::new().route("/metrics", get(export_metrics))
}

async fn export_metrics(State(state): State<AppStateArc>) -> Response {
    match state.metrics.export() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("metrics export failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
