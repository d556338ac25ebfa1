//! Handlers for the `/runs` resource.
//!
//! Every endpoint is scoped to the organization in the `x-org-id` header.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use qarun_core::error::CoreError;
use qarun_core::run::{BrowserKind, NewRun};
use qarun_core::status::RunStatus;
use qarun_core::types::{DbId, RunId, Timestamp};
use qarun_engine::CancelOptions;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::org::OrgContext;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

/// Body of `POST /runs`.
#[derive(Debug, Deserialize, Validate)]
pub struct StartRunRequest {
    #[validate(range(min = 1))]
    pub project_id: DbId,
    #[validate(range(min = 1))]
    pub suite_id: DbId,
    #[validate(range(min = 1))]
    pub test_id: Option<DbId>,
    pub schedule_id: Option<DbId>,
    #[serde(default)]
    pub browser: BrowserKind,
    #[validate(length(min = 1, max = 255))]
    pub branch: Option<String>,
    #[serde(default)]
    pub env_overrides: BTreeMap<String, String>,
    #[validate(range(min = 1, max = 1000))]
    pub priority: Option<i32>,
}

/// Body of `PUT /runs/{id}/priority`.
#[derive(Debug, Deserialize)]
pub struct PrioritizeRequest {
    pub priority: i32,
}

/// Response of `GET /runs/{id}/status`.
#[derive(Debug, Serialize)]
pub struct RunStatusResponse {
    pub id: RunId,
    pub status: RunStatus,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

/// POST /api/v1/runs
///
/// Queue a new run in `pending` status. Returns 201 with the created run;
/// the dispatcher starts it in priority order.
pub async fn start_run(
    org: OrgContext,
    State(state): State<AppState>,
    Json(input): Json<StartRunRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate().map_err(CoreError::from)?;

    let run = state
        .engine
        .start_run(NewRun {
            org_id: org.org_id,
            project_id: input.project_id,
            suite_id: input.suite_id,
            test_id: input.test_id,
            schedule_id: input.schedule_id,
            browser: input.browser,
            branch: input.branch,
            env_overrides: input.env_overrides,
            priority: input.priority,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: run })))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/runs/{id}
pub async fn get_run(
    org: OrgContext,
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> AppResult<impl IntoResponse> {
    let run = state.engine.get_run(org.org_id, run_id).await?;
    Ok(Json(DataResponse { data: run }))
}

/// GET /api/v1/runs/{id}/status
pub async fn get_status(
    org: OrgContext,
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> AppResult<impl IntoResponse> {
    let run = state.engine.get_run(org.org_id, run_id).await?;
    Ok(Json(DataResponse {
        data: RunStatusResponse {
            id: run.id,
            status: run.status,
            started_at: run.started_at,
            completed_at: run.completed_at,
            duration_ms: run.duration_ms,
            error: run.error,
        },
    }))
}

/// GET /api/v1/runs/{id}/progress
pub async fn get_progress(
    org: OrgContext,
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> AppResult<impl IntoResponse> {
    let progress = state.engine.get_progress(org.org_id, run_id).await?;
    Ok(Json(DataResponse { data: progress }))
}

/// GET /api/v1/runs/{id}/results
pub async fn get_results(
    org: OrgContext,
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> AppResult<impl IntoResponse> {
    let results = state.engine.get_results(org.org_id, run_id).await?;
    Ok(Json(DataResponse { data: results }))
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

/// POST /api/v1/runs/{id}/cancel
///
/// Optional JSON body: `{ "force": bool, "save_partial_results": bool }`.
/// Without `force` the request blocks for up to the cancel grace period
/// while the run winds down.
pub async fn cancel_run(
    org: OrgContext,
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let options = if body.iter().all(u8::is_ascii_whitespace) {
        CancelOptions::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid cancel options: {e}")))?
    };

    let outcome = state.engine.cancel(org.org_id, run_id, options).await?;
    Ok(Json(DataResponse { data: outcome }))
}

/// POST /api/v1/runs/{id}/pause
pub async fn pause_run(
    org: OrgContext,
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> AppResult<impl IntoResponse> {
    let run = state.engine.pause(org.org_id, run_id).await?;
    Ok(Json(DataResponse { data: run }))
}

/// POST /api/v1/runs/{id}/resume
pub async fn resume_run(
    org: OrgContext,
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> AppResult<impl IntoResponse> {
    let run = state.engine.resume(org.org_id, run_id).await?;
    Ok(Json(DataResponse { data: run }))
}

/// PUT /api/v1/runs/{id}/priority
pub async fn prioritize_run(
    org: OrgContext,
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
    Json(input): Json<PrioritizeRequest>,
) -> AppResult<impl IntoResponse> {
    let run = state
        .engine
        .prioritize(org.org_id, run_id, input.priority)
        .await?;
    Ok(Json(DataResponse { data: run }))
}

/// GET /api/v1/runs/{id}/queue-position
pub async fn queue_position(
    org: OrgContext,
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> AppResult<impl IntoResponse> {
    let position = state.engine.queue_position(org.org_id, run_id).await?;
    Ok(Json(DataResponse { data: position }))
}
