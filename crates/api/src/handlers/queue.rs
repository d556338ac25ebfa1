use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::middleware::org::OrgContext;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/queue
///
/// Pending runs of the caller's organization in dispatch order.
pub async fn queue_status(
    org: OrgContext,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let queue = state.engine.queue_status(org.org_id).await;
    Ok(Json(DataResponse { data: queue }))
}
