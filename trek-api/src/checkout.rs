use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use trek_checkout::models::{CheckoutRequest, CheckoutResponse, SessionView};
use trek_core::access::Actor;
use trek_core::session::SessionStatus;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub token: String,
    pub booking_ids: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FailSessionRequest {
    pub reason: Option<String>,
}

/// Routes that need the caller's identity (layered with optional auth).
pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/checkout", post(create_checkout))
}

/// Token-addressed routes; the token itself is the capability.
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/checkout/sessions/{token}", get(get_session))
        .route("/v1/checkout/sessions/{token}/confirm", post(confirm_session))
        .route("/v1/checkout/sessions/{token}/fail", post(fail_session))
}

/// POST /v1/checkout
async fn create_checkout(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    let response = state.orchestrator.checkout(&req, &actor).await?;

    state
        .metrics
        .checkout_sessions
        .with_label_values(&[response.checkout_type.as_str()])
        .inc();
    info!(session_id = %response.session_id, checkout_type = response.checkout_type.as_str(), "checkout accepted");

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /v1/checkout/sessions/{token}
async fn get_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let session = state.sessions.get_session(&token).await?;
    Ok(Json(SessionView::from(session)))
}

/// POST /v1/checkout/sessions/{token}/confirm
/// Hit by the provider return URL; repeated calls return the same bookings.
async fn confirm_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ConfirmResponse>, AppError> {
    let booking_ids = state.sessions.confirm_session(&token).await?;
    Ok(Json(ConfirmResponse { token, booking_ids }))
}

/// POST /v1/checkout/sessions/{token}/fail
/// Hit by the provider cancel URL. Releases the held participants.
async fn fail_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<FailSessionRequest>,
) -> Result<Json<SessionView>, AppError> {
    let reason = req.reason.as_deref().unwrap_or("payment abandoned");
    let changed = state.sessions.fail_session(&token, reason).await?;
    let session = state.sessions.get_session(&token).await?;
    if !changed && session.status != SessionStatus::Failed {
        return Err(AppError::Conflict(format!(
            "Checkout session is {}, expected PENDING",
            session.status.as_str()
        )));
    }
    if changed {
        info!(session_id = %session.id, reason, "checkout session failed by caller");
    }
    Ok(Json(SessionView::from(session)))
}
