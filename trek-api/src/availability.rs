use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use trek_catalog::AvailabilityStatus;
use trek_core::repository::ScheduleStore;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/schedules/{id}/availability", get(get_availability))
}

/// GET /v1/schedules/{id}/availability
async fn get_availability(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<AvailabilityStatus>, AppError> {
    let schedule = state
        .schedules
        .get_schedule(schedule_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Schedule {} not found", schedule_id)))?;

    let status = state
        .availability
        .availability_status(schedule.id, schedule.max_participants)
        .await?;
    Ok(Json(status))
}
