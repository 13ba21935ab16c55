use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use trek_checkout::models::{NotificationResult, ProviderNotification};
use trek_core::session::SessionStatus;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub result: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub booking_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_status: Option<SessionStatus>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payments/{provider}", post(handle_payment_webhook))
}

/// POST /v1/webhooks/payments/{provider}
/// Receive payment outcomes from a provider
async fn handle_payment_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(payload): Json<ProviderNotification>,
) -> Result<Json<WebhookAck>, AppError> {
    tracing::info!("Received {} webhook: {:?} for payment {}", provider, payload.outcome, payload.external_id);

    let ack = match state.sessions.apply_provider_notification(&provider, &payload).await? {
        NotificationResult::Confirmed(booking_ids) => WebhookAck {
            result: "CONFIRMED",
            booking_ids,
            session_status: Some(SessionStatus::Completed),
        },
        NotificationResult::Failed => WebhookAck {
            result: "FAILED",
            booking_ids: Vec::new(),
            session_status: Some(SessionStatus::Failed),
        },
        NotificationResult::Ignored(status) => WebhookAck {
            result: "IGNORED",
            booking_ids: Vec::new(),
            session_status: Some(status),
        },
    };

    Ok(Json(ack))
}
