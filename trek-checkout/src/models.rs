use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trek_core::booking::ParticipantData;
use trek_core::session::{CheckoutMode, PaymentSession, SessionStatus};
use uuid::Uuid;

// ============================================================================
// Checkout
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItemRequest {
    pub schedule_id: Uuid,
    pub num_participants: u32,
    /// Minor units.
    pub price_per_person: i64,
    #[serde(default)]
    pub participants: Vec<ParticipantData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub provider: String,
    pub payment_method: String,
    /// Minor units, must equal the sum of the items.
    pub total_amount: i64,
    pub currency: String,
    pub items: Vec<CheckoutItemRequest>,
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
    pub user_email: String,
    #[serde(default)]
    pub mock_payment: bool,
    #[serde(default)]
    pub admin_bypass: bool,
}

impl CheckoutRequest {
    pub fn mode(&self) -> CheckoutMode {
        if self.admin_bypass {
            CheckoutMode::AdminBypass
        } else if self.mock_payment {
            CheckoutMode::Mock
        } else {
            CheckoutMode::Payment
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Provider secret for client-side payment widgets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pix_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_ids: Option<Vec<Uuid>>,
    pub checkout_type: CheckoutMode,
    pub message: String,
}

/// Public view of a session, looked up by token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub token: String,
    pub status: SessionStatus,
    pub checkout_type: CheckoutMode,
    pub total_amount: i64,
    pub currency: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    pub booking_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<PaymentSession> for SessionView {
    fn from(session: PaymentSession) -> Self {
        Self {
            token: session.token,
            status: session.status,
            checkout_type: session.mode,
            total_amount: session.total_cents,
            currency: session.currency,
            expires_at: session.expires_at,
            payment_url: session.payment_url,
            booking_ids: session.booking_ids,
            failure_reason: session.failure_reason,
        }
    }
}

// ============================================================================
// Provider notifications
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderNotification {
    pub external_id: String,
    pub outcome: PaymentOutcome,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationResult {
    Confirmed(Vec<Uuid>),
    Failed,
    /// The session had already left `PENDING`; nothing changed.
    Ignored(SessionStatus),
}

// ============================================================================
// Schedule cancellation
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundOutcome {
    Success,
    Failed,
    NoPayment,
    AlreadyCancelled,
}

impl RefundOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundOutcome::Success => "SUCCESS",
            RefundOutcome::Failed => "FAILED",
            RefundOutcome::NoPayment => "NO_PAYMENT",
            RefundOutcome::AlreadyCancelled => "ALREADY_CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRefundDetail {
    pub booking_id: Uuid,
    pub status: RefundOutcome,
    pub refunded_amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_refund_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleCancellationResult {
    pub schedule_id: Uuid,
    pub total_bookings: u32,
    pub refunds_processed: u32,
    pub refunds_failed: u32,
    pub total_refunded_amount: i64,
    pub cancelled_sessions: u32,
    pub booking_details: Vec<BookingRefundDetail>,
}

impl ScheduleCancellationResult {
    /// Aggregates per-booking outcomes into the report totals.
    pub fn from_details(schedule_id: Uuid, cancelled_sessions: u32, booking_details: Vec<BookingRefundDetail>) -> Self {
        let count = |outcome: RefundOutcome| booking_details.iter().filter(|d| d.status == outcome).count() as u32;
        Self {
            schedule_id,
            total_bookings: booking_details.len() as u32,
            refunds_processed: count(RefundOutcome::Success),
            refunds_failed: count(RefundOutcome::Failed),
            total_refunded_amount: booking_details
                .iter()
                .filter(|d| d.status == RefundOutcome::Success)
                .map(|d| d.refunded_amount)
                .sum(),
            cancelled_sessions,
            booking_details,
        }
    }
}
