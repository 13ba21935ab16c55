use axum::{
    extract::{Path, State},
    routing::post,
    Extension, Json, Router,
};
use serde::Deserialize;
use trek_checkout::models::ScheduleCancellationResult;
use trek_core::access::Actor;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CancelScheduleRequest {
    pub reason: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/admin/schedules/{id}/cancel", post(cancel_schedule))
}

/// POST /v1/admin/schedules/{id}/cancel
/// Admins may cancel any departure, partners only their own.
async fn cancel_schedule(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(schedule_id): Path<Uuid>,
    Json(req): Json<CancelScheduleRequest>,
) -> Result<Json<ScheduleCancellationResult>, AppError> {
    let reason = req.reason.trim();
    if reason.is_empty() {
        return Err(AppError::Validation("A cancellation reason is required".to_string()));
    }

    let result = state.cascade.cancel_schedule_as(&actor, schedule_id, reason).await?;
    state.metrics.record_cancellation(&result);

    tracing::info!(
        schedule_id = %schedule_id,
        cancelled_by = ?actor.user_id,
        refunds_processed = result.refunds_processed,
        refunds_failed = result.refunds_failed,
        "schedule cancelled"
    );
    Ok(Json(result))
}
