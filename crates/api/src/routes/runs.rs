//! Route definitions for the `/runs` resource.

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::runs;
use crate::state::AppState;

/// Routes mounted at `/runs`.
///
/// ```text
/// POST   /                      -> start_run
/// GET    /{id}                  -> get_run
/// GET    /{id}/status           -> get_status
/// GET    /{id}/progress         -> get_progress
/// GET    /{id}/results          -> get_results
/// POST   /{id}/cancel           -> cancel_run
/// POST   /{id}/pause            -> pause_run
/// POST   /{id}/resume           -> resume_run
/// PUT    /{id}/priority         -> prioritize_run
/// GET    /{id}/queue-position   -> queue_position
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(runs::start_run))
        .route("/{id}", get(runs::get_run))
        .route("/{id}/status", get(runs::get_status))
        .route("/{id}/progress", get(runs::get_progress))
        .route("/{id}/results", get(runs::get_results))
        .route("/{id}/cancel", post(runs::cancel_run))
        .route("/{id}/pause", post(runs::pause_run))
        .route("/{id}/resume", post(runs::resume_run))
        .route("/{id}/priority", put(runs::prioritize_run))
        .route("/{id}/queue-position", get(runs::queue_position))
}
