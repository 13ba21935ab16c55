use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::access::BookingScope;
use crate::booking::{Booking, BookingDraft};
use crate::payment::PaymentRecord;
use crate::schedule::{HoldExclusion, Schedule, ScheduleStatus};
use crate::session::{CompletionOutcome, PaymentSession, SessionStatus};
use crate::StoreResult;

/// Read access to departures, plus the cancellation status flip.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>>;

    async fn update_schedule_status(&self, id: Uuid, status: ScheduleStatus) -> StoreResult<()>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Participants of capacity-occupying bookings. No rows means 0.
    async fn count_booked_participants(&self, schedule_id: Uuid) -> StoreResult<i64>;

    /// Bookings of a schedule, oldest first.
    async fn list_bookings_for_schedule(&self, schedule_id: Uuid) -> StoreResult<Vec<Booking>>;

    async fn list_bookings_for_session(&self, session_id: Uuid) -> StoreResult<Vec<Booking>>;

    async fn list_bookings(&self, scope: &BookingScope) -> StoreResult<Vec<Booking>>;

    async fn cancel_booking(&self, booking_id: Uuid) -> StoreResult<()>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    /// Participants held in carts for a schedule, minus the excluded carts.
    async fn count_held_participants(&self, schedule_id: Uuid, exclusion: &HoldExclusion) -> StoreResult<i64>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Participants reserved by sessions that are `PENDING` and not yet
    /// expired at `now`.
    async fn count_session_held_participants(&self, schedule_id: Uuid, now: DateTime<Utc>) -> StoreResult<i64>;

    async fn insert_session(&self, session: &PaymentSession) -> StoreResult<()>;

    async fn find_by_token(&self, token: &str) -> StoreResult<Option<PaymentSession>>;

    async fn find_by_external_id(&self, provider: &str, external_id: &str) -> StoreResult<Option<PaymentSession>>;

    async fn attach_provider_reference(
        &self,
        session_id: Uuid,
        external_id: &str,
        payment_url: Option<&str>,
    ) -> StoreResult<()>;

    /// Compare-and-set status change. Returns `false` when the session was
    /// not in `from`.
    async fn transition(
        &self,
        session_id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
        reason: Option<&str>,
    ) -> StoreResult<bool>;

    /// Writes the drafts and flips `PENDING -> COMPLETED` as one unit. Must
    /// not write anything unless the session is still pending.
    async fn complete_session(
        &self,
        session_id: Uuid,
        drafts: Vec<BookingDraft>,
        now: DateTime<Utc>,
    ) -> StoreResult<CompletionOutcome>;

    /// Moves every pending session with `expires_at <= now` to `EXPIRED`.
    async fn expire_stale_sessions(&self, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>>;

    async fn list_pending_for_schedule(&self, schedule_id: Uuid) -> StoreResult<Vec<PaymentSession>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Most recent payment captured for a booking.
    async fn find_payment_for_booking(&self, booking_id: Uuid) -> StoreResult<Option<PaymentRecord>>;

    async fn record_refund(&self, payment_id: Uuid, refunded_cents: i64, provider_refund_id: &str) -> StoreResult<()>;
}

/// Proof of holding a schedule lock, handed back on release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub schedule_id: Uuid,
    pub holder: String,
}

/// Serializes admission control per schedule: count-then-insert runs under
/// this lock so concurrent checkouts cannot both take the last slots.
#[async_trait]
pub trait ScheduleLock: Send + Sync {
    async fn acquire(&self, schedule_id: Uuid) -> StoreResult<LockToken>;

    async fn release(&self, token: LockToken) -> StoreResult<()>;
}
