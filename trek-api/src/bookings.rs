use axum::{extract::State, routing::get, Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use trek_core::access::{Actor, BookingScope};
use trek_core::booking::{Booking, BookingStatus, ParticipantData};
use trek_core::repository::BookingStore;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub session_id: Option<Uuid>,
    pub status: BookingStatus,
    pub num_participants: u32,
    pub price_per_person: i64,
    pub total_amount: i64,
    pub currency: String,
    pub participants: Vec<ParticipantData>,
    pub created_at: DateTime<Utc>,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        Self {
            id: booking.id,
            schedule_id: booking.schedule_id,
            session_id: booking.session_id,
            status: booking.status,
            num_participants: booking.num_participants,
            price_per_person: booking.price_per_person_cents,
            total_amount: booking.total_cents,
            currency: booking.currency,
            participants: booking.participants.into_iter().map(|p| p.data).collect(),
            created_at: booking.created_at,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/bookings", get(list_bookings))
}

/// GET /v1/bookings
/// Filtered in storage: admins see all, partners their departures, customers their own.
async fn list_bookings(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<BookingResponse>>, AppError> {
    let scope = BookingScope::for_actor(&actor);
    if scope == BookingScope::Nothing {
        return Ok(Json(Vec::new()));
    }

    let bookings = state.bookings.list_bookings(&scope).await?;
    Ok(Json(bookings.into_iter().map(BookingResponse::from).collect()))
}
