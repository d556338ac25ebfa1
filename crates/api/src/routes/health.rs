use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the durable run archive is reachable.
    pub archive_healthy: bool,
    /// Execution loops currently in flight.
    pub runs_in_flight: usize,
}

/// GET /health -- returns service and archive health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let archive_healthy = state.engine.store().archive().health_check().await.is_ok();
    let runs_in_flight = state.engine.registry().in_flight().await;

    let status = if archive_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        archive_healthy,
        runs_in_flight,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
