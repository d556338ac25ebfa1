pub mod health;
pub mod runs;

use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /runs                          start (POST)
/// /runs/{id}                     get
/// /runs/{id}/status              status
/// /runs/{id}/progress            progress
/// /runs/{id}/results             results
/// /runs/{id}/cancel              cancel (POST)
/// /runs/{id}/pause               pause (POST)
/// /runs/{id}/resume              resume (POST)
/// /runs/{id}/priority            prioritize (PUT)
/// /runs/{id}/queue-position      queue position
///
/// /queue                         queue status
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/runs", runs::router())
        .route("/queue", get(handlers::queue::queue_status))
}
