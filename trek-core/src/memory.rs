//! Process-local implementations of every storage collaborator.
//!
//! One mutex guards all tables, so each trait call behaves like a single
//! database transaction. Used by tests and by development setups that run
//! without Postgres/Redis. Nothing here survives a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use trek_shared::models::events::NotificationEvent;
use uuid::Uuid;

use crate::access::BookingScope;
use crate::booking::{Booking, BookingDraft, BookingStatus};
use crate::notify::NotificationPort;
use crate::payment::PaymentRecord;
use crate::repository::{
    BookingStore, CartStore, LockToken, PaymentStore, ScheduleLock, ScheduleStore, SessionStore,
};
use crate::schedule::{CartItem, HoldExclusion, Schedule, ScheduleStatus};
use crate::session::{CompletionOutcome, PaymentSession, SessionStatus};
use crate::{StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    schedules: HashMap<Uuid, Schedule>,
    cart_items: Vec<CartItem>,
    bookings: Vec<Booking>,
    payments: Vec<PaymentRecord>,
    sessions: HashMap<Uuid, PaymentSession>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_schedule(&self, schedule: Schedule) -> Uuid {
        let id = schedule.id;
        self.tables().schedules.insert(id, schedule);
        id
    }

    pub fn add_cart_item(&self, item: CartItem) {
        self.tables().cart_items.push(item);
    }

    /// Seeds a booking (and optionally its payment) outside of checkout.
    pub fn seed_booking(&self, booking: Booking, payment: Option<PaymentRecord>) {
        let mut tables = self.tables();
        tables.bookings.push(booking);
        if let Some(payment) = payment {
            tables.payments.push(payment);
        }
    }

    pub fn schedule(&self, id: Uuid) -> Option<Schedule> {
        self.tables().schedules.get(&id).cloned()
    }

    pub fn booking(&self, id: Uuid) -> Option<Booking> {
        self.tables().bookings.iter().find(|b| b.id == id).cloned()
    }

    pub fn bookings(&self) -> Vec<Booking> {
        self.tables().bookings.clone()
    }

    pub fn payments_for_booking(&self, booking_id: Uuid) -> Vec<PaymentRecord> {
        self.tables()
            .payments
            .iter()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect()
    }

    pub fn session(&self, id: Uuid) -> Option<PaymentSession> {
        self.tables().sessions.get(&id).cloned()
    }

    pub fn sessions(&self) -> Vec<PaymentSession> {
        self.tables().sessions.values().cloned().collect()
    }

    pub fn set_session_expiry(&self, id: Uuid, expires_at: DateTime<Utc>) {
        if let Some(session) = self.tables().sessions.get_mut(&id) {
            session.expires_at = expires_at;
        }
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
        Ok(self.tables().schedules.get(&id).cloned())
    }

    async fn update_schedule_status(&self, id: Uuid, status: ScheduleStatus) -> StoreResult<()> {
        let mut tables = self.tables();
        let schedule = tables
            .schedules
            .get_mut(&id)
            .ok_or_else(|| StoreError::from(format!("schedule {} not found", id)))?;
        schedule.status = status;
        Ok(())
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn count_booked_participants(&self, schedule_id: Uuid) -> StoreResult<i64> {
        Ok(self
            .tables()
            .bookings
            .iter()
            .filter(|b| b.schedule_id == schedule_id && b.status.occupies_capacity())
            .map(|b| b.num_participants as i64)
            .sum())
    }

    async fn list_bookings_for_schedule(&self, schedule_id: Uuid) -> StoreResult<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .tables()
            .bookings
            .iter()
            .filter(|b| b.schedule_id == schedule_id)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }

    async fn list_bookings_for_session(&self, session_id: Uuid) -> StoreResult<Vec<Booking>> {
        Ok(self
            .tables()
            .bookings
            .iter()
            .filter(|b| b.session_id == Some(session_id))
            .cloned()
            .collect())
    }

    async fn list_bookings(&self, scope: &BookingScope) -> StoreResult<Vec<Booking>> {
        let tables = self.tables();
        let visible = tables
            .bookings
            .iter()
            .filter(|b| match scope {
                BookingScope::All => true,
                BookingScope::User(user_id) => b.user_id.as_deref() == Some(user_id.as_str()),
                BookingScope::Partner(partner_id) => tables
                    .schedules
                    .get(&b.schedule_id)
                    .and_then(|s| s.partner_id.as_deref())
                    == Some(partner_id.as_str()),
                BookingScope::Nothing => false,
            })
            .cloned()
            .collect();
        Ok(visible)
    }

    async fn cancel_booking(&self, booking_id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables();
        let booking = tables
            .bookings
            .iter_mut()
            .find(|b| b.id == booking_id)
            .ok_or_else(|| StoreError::from(format!("booking {} not found", booking_id)))?;
        booking.update_status(BookingStatus::Cancelled);
        Ok(())
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn count_held_participants(&self, schedule_id: Uuid, exclusion: &HoldExclusion) -> StoreResult<i64> {
        Ok(self
            .tables()
            .cart_items
            .iter()
            .filter(|item| item.schedule_id == schedule_id && !exclusion.excludes(item))
            .map(|item| item.num_participants as i64)
            .sum())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn count_session_held_participants(&self, schedule_id: Uuid, now: DateTime<Utc>) -> StoreResult<i64> {
        Ok(self
            .tables()
            .sessions
            .values()
            .filter(|s| s.holds_capacity_at(now))
            .map(|s| s.snapshot.participants_for(schedule_id))
            .sum())
    }

    async fn insert_session(&self, session: &PaymentSession) -> StoreResult<()> {
        let mut tables = self.tables();
        if tables.sessions.values().any(|s| s.token == session.token) {
            return Err("duplicate session token".into());
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> StoreResult<Option<PaymentSession>> {
        Ok(self.tables().sessions.values().find(|s| s.token == token).cloned())
    }

    async fn find_by_external_id(&self, provider: &str, external_id: &str) -> StoreResult<Option<PaymentSession>> {
        Ok(self
            .tables()
            .sessions
            .values()
            .find(|s| s.provider == provider && s.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn attach_provider_reference(
        &self,
        session_id: Uuid,
        external_id: &str,
        payment_url: Option<&str>,
    ) -> StoreResult<()> {
        let mut tables = self.tables();
        let session = tables
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::from(format!("session {} not found", session_id)))?;
        session.external_id = Some(external_id.to_string());
        session.payment_url = payment_url.map(str::to_string);
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn transition(
        &self,
        session_id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
        reason: Option<&str>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables();
        let Some(session) = tables.sessions.get_mut(&session_id) else {
            return Ok(false);
        };
        if session.status != from || !from.can_transition_to(to) {
            return Ok(false);
        }
        session.status = to;
        if let Some(reason) = reason {
            session.failure_reason = Some(reason.to_string());
        }
        session.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete_session(
        &self,
        session_id: Uuid,
        drafts: Vec<BookingDraft>,
        now: DateTime<Utc>,
    ) -> StoreResult<CompletionOutcome> {
        let mut tables = self.tables();
        let session = tables
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::from(format!("session {} not found", session_id)))?;

        match session.status {
            SessionStatus::Completed => return Ok(CompletionOutcome::AlreadyCompleted(session.booking_ids.clone())),
            SessionStatus::Pending => {}
            other => return Ok(CompletionOutcome::NotPending(other)),
        }

        let booking_ids: Vec<Uuid> = drafts.iter().map(|d| d.booking.id).collect();
        session.status = SessionStatus::Completed;
        session.booking_ids = booking_ids.clone();
        session.updated_at = now;

        for draft in drafts {
            tables.bookings.push(draft.booking);
            if let Some(payment) = draft.payment {
                tables.payments.push(payment);
            }
        }
        Ok(CompletionOutcome::Completed(booking_ids))
    }

    async fn expire_stale_sessions(&self, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        let mut expired = Vec::new();
        for session in self.tables().sessions.values_mut() {
            if session.status == SessionStatus::Pending && session.is_expired_at(now) {
                session.status = SessionStatus::Expired;
                session.updated_at = now;
                expired.push(session.id);
            }
        }
        Ok(expired)
    }

    async fn list_pending_for_schedule(&self, schedule_id: Uuid) -> StoreResult<Vec<PaymentSession>> {
        Ok(self
            .tables()
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Pending && s.snapshot.references(schedule_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn find_payment_for_booking(&self, booking_id: Uuid) -> StoreResult<Option<PaymentRecord>> {
        Ok(self
            .tables()
            .payments
            .iter()
            .filter(|p| p.booking_id == booking_id)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn record_refund(&self, payment_id: Uuid, refunded_cents: i64, provider_refund_id: &str) -> StoreResult<()> {
        let mut tables = self.tables();
        let payment = tables
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| StoreError::from(format!("payment {} not found", payment_id)))?;
        payment.apply_refund(refunded_cents, provider_refund_id.to_string());
        Ok(())
    }
}

/// Per-schedule mutex for single-process deployments.
pub struct InMemoryScheduleLock {
    held: Mutex<HashMap<Uuid, String>>,
    released: Notify,
    wait: Duration,
}

impl InMemoryScheduleLock {
    pub fn new(wait: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            released: Notify::new(),
            wait,
        }
    }
}

impl Default for InMemoryScheduleLock {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl ScheduleLock for InMemoryScheduleLock {
    async fn acquire(&self, schedule_id: Uuid) -> StoreResult<LockToken> {
        let deadline = tokio::time::Instant::now() + self.wait;
        loop {
            // Registered before checking so a release in between still wakes us.
            let notified = self.released.notified();
            {
                let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
                if !held.contains_key(&schedule_id) {
                    let holder = Uuid::new_v4().to_string();
                    held.insert(schedule_id, holder.clone());
                    return Ok(LockToken { schedule_id, holder });
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(format!("schedule {} is busy", schedule_id).into());
            }
        }
    }

    async fn release(&self, token: LockToken) -> StoreResult<()> {
        {
            let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
            if held.get(&token.schedule_id) == Some(&token.holder) {
                held.remove(&token.schedule_id);
            }
        }
        self.released.notify_waiters();
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl NotificationPort for RecordingNotifier {
    fn notify(&self, event: NotificationEvent) {
        tracing::debug!(topic = event.topic(), "recorded notification");
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::ParticipantData;
    use crate::session::{CheckoutMode, SessionSnapshot, SnapshotItem};
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use trek_shared::Masked;

    fn pending_session(schedule_id: Uuid, participants: u32) -> PaymentSession {
        let snapshot = SessionSnapshot {
            items: vec![SnapshotItem {
                schedule_id,
                num_participants: participants,
                price_per_person_cents: 1000,
                participants: (0..participants)
                    .map(|i| ParticipantData {
                        full_name: format!("P{}", i),
                        email: None,
                        document_id: None,
                        nationality: None,
                    })
                    .collect(),
            }],
        };
        PaymentSession::new(
            Uuid::new_v4().simple().to_string(),
            None,
            Masked::from("guest@example.com"),
            "mock".to_string(),
            "card".to_string(),
            CheckoutMode::Payment,
            "USD".to_string(),
            snapshot,
            Utc::now() + ChronoDuration::minutes(30),
        )
    }

    #[tokio::test]
    async fn test_empty_store_counts_zero() {
        let store = InMemoryStore::new();
        let schedule_id = Uuid::new_v4();

        assert_eq!(store.count_booked_participants(schedule_id).await.unwrap(), 0);
        assert_eq!(store.count_held_participants(schedule_id, &HoldExclusion::None).await.unwrap(), 0);
        assert_eq!(store.count_session_held_participants(schedule_id, Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cart_exclusions() {
        let store = InMemoryStore::new();
        let schedule_id = Uuid::new_v4();
        let cart_a = Uuid::new_v4();
        let cart_b = Uuid::new_v4();
        store.add_cart_item(CartItem::new(cart_a, Some("u1".to_string()), schedule_id, 2));
        store.add_cart_item(CartItem::new(cart_b, None, schedule_id, 3));

        let all = store.count_held_participants(schedule_id, &HoldExclusion::None).await.unwrap();
        let without_a = store.count_held_participants(schedule_id, &HoldExclusion::Cart(cart_a)).await.unwrap();
        let without_u1 = store
            .count_held_participants(schedule_id, &HoldExclusion::User("u1".to_string()))
            .await
            .unwrap();

        assert_eq!(all, 5);
        assert_eq!(without_a, 3);
        assert_eq!(without_u1, 3);
    }

    #[tokio::test]
    async fn test_complete_session_only_once() {
        let store = InMemoryStore::new();
        let schedule_id = Uuid::new_v4();
        let session = pending_session(schedule_id, 2);
        store.insert_session(&session).await.unwrap();

        let draft = || BookingDraft {
            booking: Booking::confirmed(
                schedule_id,
                Some(session.id),
                None,
                Masked::from("guest@example.com"),
                1000,
                "USD".to_string(),
                session.snapshot.items[0].participants.clone(),
            ),
            payment: None,
        };

        let first = store.complete_session(session.id, vec![draft()], Utc::now()).await.unwrap();
        let ids = match first {
            CompletionOutcome::Completed(ids) => ids,
            other => panic!("expected completion, got {:?}", other),
        };

        let second = store.complete_session(session.id, vec![draft()], Utc::now()).await.unwrap();
        assert_eq!(second, CompletionOutcome::AlreadyCompleted(ids));
        assert_eq!(store.bookings().len(), 1);
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = InMemoryStore::new();
        let session = pending_session(Uuid::new_v4(), 1);
        store.insert_session(&session).await.unwrap();

        assert!(store
            .transition(session.id, SessionStatus::Pending, SessionStatus::Failed, Some("declined"))
            .await
            .unwrap());
        assert!(!store
            .transition(session.id, SessionStatus::Pending, SessionStatus::Expired, None)
            .await
            .unwrap());

        let stored = store.session(session.id).unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("declined"));
    }

    #[tokio::test]
    async fn test_schedule_lock_excludes_second_holder() {
        let lock = Arc::new(InMemoryScheduleLock::new(Duration::from_millis(200)));
        let schedule_id = Uuid::new_v4();

        let token = lock.acquire(schedule_id).await.unwrap();
        assert!(lock.acquire(schedule_id).await.is_err());

        // Other schedules are independent.
        let other = lock.acquire(Uuid::new_v4()).await.unwrap();
        lock.release(other).await.unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire(schedule_id).await })
        };
        lock.release(token).await.unwrap();
        assert!(waiter.await.unwrap().is_ok());
    }
}
