use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use trek_core::repository::{BookingStore, CartStore, SessionStore};
use trek_core::schedule::{HoldExclusion, Schedule};
use trek_core::{CheckoutError, CheckoutResult};
use uuid::Uuid;

/// Outcome of checking one request against a schedule's remaining capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityCheck {
    pub available: bool,
    pub max_participants: i64,
    pub booked_participants: i64,
    /// Carts plus pending checkout sessions.
    pub held_participants: i64,
    pub held_in_carts: i64,
    pub held_in_sessions: i64,
    pub available_slots: i64,
    pub requested_slots: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AvailabilityCheck {
    /// Pure admission decision from already-collected counts.
    pub fn evaluate(
        max_participants: i64,
        booked_participants: i64,
        held_in_carts: i64,
        held_in_sessions: i64,
        requested_slots: i64,
    ) -> Self {
        let remaining = max_participants - booked_participants - held_in_carts - held_in_sessions;
        let available_slots = remaining.max(0);
        let available = requested_slots <= 0 || available_slots >= requested_slots;

        let error_message = (!available).then(|| {
            format!(
                "Not enough availability for this departure. Requested: {}, Available: {} \
                 (capacity: {}, booked: {}, held in carts: {}, held in checkout: {})",
                requested_slots,
                available_slots,
                max_participants,
                booked_participants,
                held_in_carts,
                held_in_sessions
            )
        });

        Self {
            available,
            max_participants,
            booked_participants,
            held_participants: held_in_carts + held_in_sessions,
            held_in_carts,
            held_in_sessions,
            available_slots,
            requested_slots,
            error_message,
        }
    }

    /// Turns a failed check into the caller-facing validation error.
    pub fn into_result(self) -> CheckoutResult<Self> {
        if self.available {
            Ok(self)
        } else {
            Err(CheckoutError::Validation(self.error_message.unwrap_or_default()))
        }
    }
}

/// Read-only capacity breakdown for calendars and availability displays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityStatus {
    pub schedule_id: Uuid,
    pub max_participants: i64,
    pub booked_participants: i64,
    pub held_in_carts: i64,
    pub held_in_sessions: i64,
    pub available_slots: i64,
}

/// Combines confirmed bookings, cart holds and pending checkout sessions into
/// one admission decision.
pub struct AvailabilityEngine {
    bookings: Arc<dyn BookingStore>,
    carts: Arc<dyn CartStore>,
    sessions: Arc<dyn SessionStore>,
}

impl AvailabilityEngine {
    pub fn new(bookings: Arc<dyn BookingStore>, carts: Arc<dyn CartStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { bookings, carts, sessions }
    }

    pub async fn validate_availability(
        &self,
        schedule: &Schedule,
        requested_slots: u32,
        exclusion: &HoldExclusion,
    ) -> CheckoutResult<AvailabilityCheck> {
        self.validate_availability_at(schedule, requested_slots, exclusion, Utc::now()).await
    }

    pub async fn validate_availability_at(
        &self,
        schedule: &Schedule,
        requested_slots: u32,
        exclusion: &HoldExclusion,
        now: DateTime<Utc>,
    ) -> CheckoutResult<AvailabilityCheck> {
        let (booked, in_carts, in_sessions) = self.counts(schedule.id, exclusion, now).await?;
        let check = AvailabilityCheck::evaluate(
            schedule.max_participants as i64,
            booked,
            in_carts,
            in_sessions,
            requested_slots as i64,
        );

        tracing::debug!(
            schedule_id = %schedule.id,
            requested = requested_slots,
            available_slots = check.available_slots,
            admitted = check.available,
            "availability checked"
        );
        Ok(check)
    }

    pub async fn availability_status(
        &self,
        schedule_id: Uuid,
        max_participants: u32,
    ) -> CheckoutResult<AvailabilityStatus> {
        let (booked, in_carts, in_sessions) = self.counts(schedule_id, &HoldExclusion::None, Utc::now()).await?;
        let check = AvailabilityCheck::evaluate(max_participants as i64, booked, in_carts, in_sessions, 0);

        Ok(AvailabilityStatus {
            schedule_id,
            max_participants: check.max_participants,
            booked_participants: check.booked_participants,
            held_in_carts: check.held_in_carts,
            held_in_sessions: check.held_in_sessions,
            available_slots: check.available_slots,
        })
    }

    async fn counts(
        &self,
        schedule_id: Uuid,
        exclusion: &HoldExclusion,
        now: DateTime<Utc>,
    ) -> CheckoutResult<(i64, i64, i64)> {
        let booked = self.bookings.count_booked_participants(schedule_id).await?;
        let in_carts = self.carts.count_held_participants(schedule_id, exclusion).await?;
        let in_sessions = self.sessions.count_session_held_participants(schedule_id, now).await?;
        Ok((booked, in_carts, in_sessions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use trek_core::booking::{Booking, ParticipantData};
    use trek_core::memory::InMemoryStore;
    use trek_core::schedule::CartItem;
    use trek_shared::Masked;

    fn engine_for(store: &Arc<InMemoryStore>) -> AvailabilityEngine {
        AvailabilityEngine::new(store.clone(), store.clone(), store.clone())
    }

    fn schedule(max: u32) -> Schedule {
        Schedule::new(Uuid::new_v4(), "Sunset ridge walk".to_string(), Utc::now() + chrono::Duration::days(3), max)
    }

    fn booking(schedule_id: Uuid, participants: u32) -> Booking {
        let people = (0..participants)
            .map(|i| ParticipantData {
                full_name: format!("Walker {}", i),
                email: None,
                document_id: None,
                nationality: None,
            })
            .collect();
        Booking::confirmed(schedule_id, None, None, Masked::from("a@b.c"), 2500, "USD".to_string(), people)
    }

    #[test]
    fn test_evaluate_boundary() {
        let fits = AvailabilityCheck::evaluate(10, 6, 2, 0, 2);
        assert!(fits.available);
        assert_eq!(fits.available_slots, 2);
        assert!(fits.error_message.is_none());

        let too_many = AvailabilityCheck::evaluate(10, 6, 2, 0, 3);
        assert!(!too_many.available);
        let message = too_many.error_message.unwrap();
        assert!(message.contains("Requested: 3, Available: 2"));
        assert!(message.contains("booked: 6"));
        assert!(message.contains("held in carts: 2"));
    }

    #[test]
    fn test_zero_request_always_admitted() {
        let overbooked = AvailabilityCheck::evaluate(4, 5, 1, 0, 0);
        assert!(overbooked.available);
        assert_eq!(overbooked.available_slots, 0);
    }

    #[test]
    fn test_failed_check_becomes_validation_error() {
        let err = AvailabilityCheck::evaluate(2, 2, 0, 0, 1).into_result().unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(msg) if msg.contains("Requested: 1, Available: 0")));
    }

    #[tokio::test]
    async fn test_boundary_against_store() {
        let store = Arc::new(InMemoryStore::new());
        let schedule = schedule(10);
        store.add_schedule(schedule.clone());
        store.seed_booking(booking(schedule.id, 6), None);
        store.add_cart_item(CartItem::new(Uuid::new_v4(), None, schedule.id, 2));
        let engine = engine_for(&store);

        let two = engine.validate_availability(&schedule, 2, &HoldExclusion::None).await.unwrap();
        assert!(two.available);
        assert_eq!(two.available_slots, 2);

        let three = engine.validate_availability(&schedule, 3, &HoldExclusion::None).await.unwrap();
        assert!(!three.available);
        assert_eq!(three.booked_participants, 6);
        assert_eq!(three.held_participants, 2);
    }

    #[tokio::test]
    async fn test_no_rows_counts_as_zero() {
        let store = Arc::new(InMemoryStore::new());
        let schedule = schedule(10);
        let engine = engine_for(&store);

        let check = engine.validate_availability(&schedule, 5, &HoldExclusion::None).await.unwrap();
        assert!(check.available);
        assert_eq!(check.available_slots, 10);
        assert_eq!(check.booked_participants, 0);
    }

    #[tokio::test]
    async fn test_cart_does_not_count_against_itself() {
        let store = Arc::new(InMemoryStore::new());
        let schedule = schedule(5);
        let cart_a = Uuid::new_v4();
        store.add_cart_item(CartItem::new(cart_a, None, schedule.id, 2));
        store.add_cart_item(CartItem::new(Uuid::new_v4(), None, schedule.id, 1));
        let engine = engine_for(&store);

        let with_self = engine.validate_availability(&schedule, 4, &HoldExclusion::None).await.unwrap();
        assert!(!with_self.available);

        let excluding_self = engine
            .validate_availability(&schedule, 4, &HoldExclusion::Cart(cart_a))
            .await
            .unwrap();
        assert!(excluding_self.available);
        assert_eq!(excluding_self.held_in_carts, 1);
    }

    #[tokio::test]
    async fn test_cancelled_bookings_free_capacity() {
        let store = Arc::new(InMemoryStore::new());
        let schedule = schedule(4);
        let mut cancelled = booking(schedule.id, 3);
        cancelled.update_status(trek_core::booking::BookingStatus::Cancelled);
        store.seed_booking(cancelled, None);
        let engine = engine_for(&store);

        let status = engine.availability_status(schedule.id, schedule.max_participants).await.unwrap();
        assert_eq!(status.booked_participants, 0);
        assert_eq!(status.available_slots, 4);
    }

    proptest! {
        #[test]
        fn prop_admitted_holds_never_exceed_capacity(
            max in 1u32..30,
            requests in prop::collection::vec((0u32..8, 0u8..2), 1..40),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let result: Result<(), TestCaseError> = runtime.block_on(async {
                let store = Arc::new(InMemoryStore::new());
                let schedule = schedule(max);
                let engine = engine_for(&store);

                for (requested, kind) in requests {
                    let check = engine.validate_availability(&schedule, requested, &HoldExclusion::None).await.unwrap();
                    if check.available && requested > 0 {
                        if kind == 0 {
                            store.seed_booking(booking(schedule.id, requested), None);
                        } else {
                            store.add_cart_item(CartItem::new(Uuid::new_v4(), None, schedule.id, requested));
                        }
                    }

                    let after = engine.availability_status(schedule.id, max).await.unwrap();
                    prop_assert!(after.booked_participants + after.held_in_carts + after.held_in_sessions <= max as i64);
                }
                Ok(())
            });
            result?;
        }
    }
}
