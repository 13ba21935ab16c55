use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trek_shared::Masked;
use uuid::Uuid;

use crate::booking::ParticipantData;

/// Checkout session lifecycle.
///
/// `PENDING` is the only live state. Everything else is terminal for the
/// session, except that a `COMPLETED` session becomes `REFUNDED` once every
/// booking it produced has been cancelled and refunded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    Completed,
    Failed,
    Expired,
    Cancelled,
    Refunded,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "PENDING",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Failed => "FAILED",
            SessionStatus::Expired => "EXPIRED",
            SessionStatus::Cancelled => "CANCELLED",
            SessionStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(SessionStatus::Pending),
            "COMPLETED" => Some(SessionStatus::Completed),
            "FAILED" => Some(SessionStatus::Failed),
            "EXPIRED" => Some(SessionStatus::Expired),
            "CANCELLED" => Some(SessionStatus::Cancelled),
            "REFUNDED" => Some(SessionStatus::Refunded),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Completed) | (Pending, Failed) | (Pending, Expired) | (Pending, Cancelled) | (Completed, Refunded)
        )
    }
}

/// How the session is meant to be paid. Stored so asynchronous confirmation
/// knows whether to write payment records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutMode {
    Payment,
    Mock,
    AdminBypass,
}

impl CheckoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutMode::Payment => "PAYMENT",
            CheckoutMode::Mock => "MOCK",
            CheckoutMode::AdminBypass => "ADMIN_BYPASS",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PAYMENT" => Some(CheckoutMode::Payment),
            "MOCK" => Some(CheckoutMode::Mock),
            "ADMIN_BYPASS" => Some(CheckoutMode::AdminBypass),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotItem {
    pub schedule_id: Uuid,
    pub num_participants: u32,
    pub price_per_person_cents: i64,
    pub participants: Vec<ParticipantData>,
}

impl SnapshotItem {
    pub fn total_cents(&self) -> i64 {
        self.price_per_person_cents * self.num_participants as i64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub items: Vec<SnapshotItem>,
}

impl SessionSnapshot {
    pub fn total_cents(&self) -> i64 {
        self.items.iter().map(SnapshotItem::total_cents).sum()
    }

    /// Participants this snapshot reserves on one schedule.
    pub fn participants_for(&self, schedule_id: Uuid) -> i64 {
        self.items
            .iter()
            .filter(|item| item.schedule_id == schedule_id)
            .map(|item| item.num_participants as i64)
            .sum()
    }

    pub fn references(&self, schedule_id: Uuid) -> bool {
        self.items.iter().any(|item| item.schedule_id == schedule_id)
    }
}

/// Persisted form of the snapshot. Sessions outlive deployments, so the
/// payload carries its schema version and old versions are upgraded on read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "schema_version")]
pub enum SnapshotPayload {
    #[serde(rename = "1")]
    V1(SessionSnapshot),
}

impl SnapshotPayload {
    pub fn current(snapshot: SessionSnapshot) -> Self {
        SnapshotPayload::V1(snapshot)
    }

    pub fn into_snapshot(self) -> SessionSnapshot {
        match self {
            SnapshotPayload::V1(snapshot) => snapshot,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub id: Uuid,
    /// Opaque handle given to callers instead of the primary key.
    pub token: String,
    pub user_id: Option<String>,
    pub user_email: Masked<String>,
    pub provider: String,
    pub payment_method: String,
    pub mode: CheckoutMode,
    pub currency: String,
    pub total_cents: i64,
    pub status: SessionStatus,
    pub snapshot: SessionSnapshot,
    pub external_id: Option<String>,
    pub payment_url: Option<String>,
    pub booking_ids: Vec<Uuid>,
    pub return_url: Option<String>,
    pub cancel_url: Option<String>,
    pub failure_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentSession {
    pub fn new(
        token: String,
        user_id: Option<String>,
        user_email: Masked<String>,
        provider: String,
        payment_method: String,
        mode: CheckoutMode,
        currency: String,
        snapshot: SessionSnapshot,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            token,
            user_id,
            user_email,
            provider,
            payment_method,
            mode,
            currency,
            total_cents: snapshot.total_cents(),
            status: SessionStatus::Pending,
            snapshot,
            external_id: None,
            payment_url: None,
            booking_ids: Vec::new(),
            return_url: None,
            cancel_url: None,
            failure_reason: None,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// A pending, unexpired session still reserves its participants.
    pub fn holds_capacity_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Pending && !self.is_expired_at(now)
    }
}

/// Result of the atomic `PENDING -> COMPLETED` write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed(Vec<Uuid>),
    /// Someone else completed the session first; these are their booking ids.
    AlreadyCompleted(Vec<Uuid>),
    NotPending(SessionStatus),
}
