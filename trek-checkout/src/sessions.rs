use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use trek_catalog::{AvailabilityEngine, BookingWindow};
use trek_core::access::Actor;
use trek_core::booking::{Booking, BookingDraft};
use trek_core::notify::NotificationPort;
use trek_core::payment::{PaymentInitiation, PaymentRecord};
use trek_core::policy::CheckoutPolicy;
use trek_core::repository::{LockToken, ScheduleLock, ScheduleStore, SessionStore};
use trek_core::schedule::{HoldExclusion, Schedule};
use trek_core::session::{
    CheckoutMode, CompletionOutcome, PaymentSession, SessionSnapshot, SessionStatus, SnapshotItem,
};
use trek_core::{CheckoutError, CheckoutResult};
use trek_shared::models::events::{BookingConfirmedEvent, BookingCreatedEvent, NotificationEvent};
use trek_shared::Masked;
use uuid::Uuid;

use crate::models::{CheckoutRequest, NotificationResult, PaymentOutcome, ProviderNotification};
use crate::providers::{MockPaymentAdapter, ProviderRegistry};

const TOKEN_LENGTH: usize = 32;

/// Opaque handle handed to callers instead of the session id.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Checks the request's shape and returns participants per schedule, in
/// ascending schedule order.
pub fn validate_request(request: &CheckoutRequest) -> CheckoutResult<BTreeMap<Uuid, u32>> {
    if request.items.is_empty() {
        return Err(CheckoutError::Validation("Checkout must contain at least one item".to_string()));
    }
    if request.currency.trim().is_empty() {
        return Err(CheckoutError::Validation("Currency is required".to_string()));
    }
    if request.user_email.trim().is_empty() {
        return Err(CheckoutError::Validation("User email is required".to_string()));
    }

    let mut demand = BTreeMap::new();
    let mut expected_total: i64 = 0;
    for (index, item) in request.items.iter().enumerate() {
        if item.num_participants == 0 {
            return Err(CheckoutError::Validation(format!(
                "Item {} must have at least one participant",
                index
            )));
        }
        if item.participants.len() != item.num_participants as usize {
            return Err(CheckoutError::Validation(format!(
                "Item {} declares {} participants but lists {}",
                index,
                item.num_participants,
                item.participants.len()
            )));
        }
        if item.price_per_person < 0 {
            return Err(CheckoutError::Validation(format!("Item {} has a negative price", index)));
        }
        expected_total = item
            .price_per_person
            .checked_mul(item.num_participants as i64)
            .and_then(|line| expected_total.checked_add(line))
            .ok_or_else(|| CheckoutError::Validation("Checkout total overflows".to_string()))?;
        *demand.entry(item.schedule_id).or_insert(0) += item.num_participants;
    }

    if expected_total != request.total_amount {
        return Err(CheckoutError::Validation(format!(
            "Total amount mismatch: items add up to {}, request says {}",
            expected_total, request.total_amount
        )));
    }
    Ok(demand)
}

/// Owns checkout sessions and every transition they go through.
pub struct PaymentSessionManager {
    engine: Arc<AvailabilityEngine>,
    schedules: Arc<dyn ScheduleStore>,
    sessions: Arc<dyn SessionStore>,
    locks: Arc<dyn ScheduleLock>,
    providers: Arc<ProviderRegistry>,
    notifier: Arc<dyn NotificationPort>,
    policy: CheckoutPolicy,
}

impl PaymentSessionManager {
    pub fn new(
        engine: Arc<AvailabilityEngine>,
        schedules: Arc<dyn ScheduleStore>,
        sessions: Arc<dyn SessionStore>,
        locks: Arc<dyn ScheduleLock>,
        providers: Arc<ProviderRegistry>,
        notifier: Arc<dyn NotificationPort>,
        policy: CheckoutPolicy,
    ) -> Self {
        Self {
            engine,
            schedules,
            sessions,
            locks,
            providers,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> &CheckoutPolicy {
        &self.policy
    }

    /// Admits a paid checkout and starts the payment with its provider.
    pub async fn create_session(
        &self,
        request: &CheckoutRequest,
        actor: &Actor,
    ) -> CheckoutResult<(PaymentSession, PaymentInitiation)> {
        let session = self.open_session(request, actor, CheckoutMode::Payment, Utc::now()).await?;
        self.initiate_payment(session).await
    }

    /// Validates, runs admission control under the schedule locks and
    /// persists a `PENDING` session. No provider is contacted.
    pub async fn open_session(
        &self,
        request: &CheckoutRequest,
        actor: &Actor,
        mode: CheckoutMode,
        now: DateTime<Utc>,
    ) -> CheckoutResult<PaymentSession> {
        let demand = validate_request(request)?;
        if mode == CheckoutMode::Payment {
            self.providers.get(&request.provider)?;
        }

        let window = BookingWindow::new(self.policy.booking_cutoff()?);
        let expires_at = now
            .checked_add_signed(self.policy.session_ttl()?)
            .ok_or_else(|| CheckoutError::Validation("Session expiry is out of range".to_string()))?;

        // Schedules are read under the locks so a concurrent cancellation
        // either lands before admission or sees the new session.
        let tokens = self.lock_schedules(demand.keys().copied()).await?;
        let admitted = match self.load_open_schedules(&demand, &window, now).await {
            Ok(schedules) => self.admit(request, actor, mode, &schedules, now, expires_at).await,
            Err(err) => Err(err),
        };
        self.unlock_schedules(tokens).await;
        let session = admitted?;

        tracing::info!(
            session_id = %session.id,
            checkout_type = mode.as_str(),
            total_cents = session.total_cents,
            expires_at = %session.expires_at,
            "checkout session opened"
        );
        Ok(session)
    }

    async fn load_open_schedules(
        &self,
        demand: &BTreeMap<Uuid, u32>,
        window: &BookingWindow,
        now: DateTime<Utc>,
    ) -> CheckoutResult<Vec<(Schedule, u32)>> {
        let mut schedules = Vec::with_capacity(demand.len());
        for (&schedule_id, &requested) in demand {
            let schedule = self
                .schedules
                .get_schedule(schedule_id)
                .await?
                .ok_or_else(|| CheckoutError::NotFound(format!("Schedule {} not found", schedule_id)))?;
            if !schedule.is_open() {
                return Err(CheckoutError::Validation(format!(
                    "Schedule {} is not open for booking (status: {})",
                    schedule_id,
                    schedule.status.as_str()
                )));
            }
            window.check(&schedule, now)?;
            schedules.push((schedule, requested));
        }
        Ok(schedules)
    }

    async fn admit(
        &self,
        request: &CheckoutRequest,
        actor: &Actor,
        mode: CheckoutMode,
        schedules: &[(Schedule, u32)],
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> CheckoutResult<PaymentSession> {
        // The acting user's own cart holds are what is being checked out.
        let exclusion = actor.user_id.clone().map(HoldExclusion::User).unwrap_or_default();
        for (schedule, requested) in schedules {
            self.engine
                .validate_availability_at(schedule, *requested, &exclusion, now)
                .await?
                .into_result()?;
        }

        let snapshot = SessionSnapshot {
            items: request
                .items
                .iter()
                .map(|item| SnapshotItem {
                    schedule_id: item.schedule_id,
                    num_participants: item.num_participants,
                    price_per_person_cents: item.price_per_person,
                    participants: item.participants.clone(),
                })
                .collect(),
        };
        let provider = match mode {
            CheckoutMode::Mock => MockPaymentAdapter::NAME.to_string(),
            CheckoutMode::Payment | CheckoutMode::AdminBypass => request.provider.clone(),
        };

        let mut session = PaymentSession::new(
            generate_token(),
            actor.user_id.clone(),
            Masked::new(request.user_email.clone()),
            provider,
            request.payment_method.clone(),
            mode,
            request.currency.clone(),
            snapshot,
            expires_at,
        );
        session.return_url = request.return_url.clone();
        session.cancel_url = request.cancel_url.clone();

        self.sessions.insert_session(&session).await?;
        Ok(session)
    }

    async fn lock_schedules(&self, ids: impl Iterator<Item = Uuid>) -> CheckoutResult<Vec<LockToken>> {
        let mut tokens = Vec::new();
        for schedule_id in ids {
            match self.locks.acquire(schedule_id).await {
                Ok(token) => tokens.push(token),
                Err(err) => {
                    self.unlock_schedules(tokens).await;
                    return Err(CheckoutError::Storage(format!(
                        "Could not lock schedule {}: {}",
                        schedule_id, err
                    )));
                }
            }
        }
        Ok(tokens)
    }

    async fn unlock_schedules(&self, tokens: Vec<LockToken>) {
        for token in tokens.into_iter().rev() {
            let schedule_id = token.schedule_id;
            if let Err(err) = self.locks.release(token).await {
                tracing::warn!(%schedule_id, "failed to release schedule lock: {}", err);
            }
        }
    }

    /// Asks the provider to start the payment. A provider failure fails the
    /// session so it stops holding capacity.
    pub async fn initiate_payment(
        &self,
        mut session: PaymentSession,
    ) -> CheckoutResult<(PaymentSession, PaymentInitiation)> {
        let provider = self.providers.get(&session.provider)?;
        match provider.initiate(&session).await {
            Ok(initiation) => {
                self.sessions
                    .attach_provider_reference(session.id, &initiation.external_id, initiation.payment_url.as_deref())
                    .await?;
                session.external_id = Some(initiation.external_id.clone());
                session.payment_url = initiation.payment_url.clone();
                Ok((session, initiation))
            }
            Err(err) => {
                tracing::warn!(session_id = %session.id, provider = %session.provider, "payment initiation failed: {}", err);
                let reason = err.to_string();
                self.sessions
                    .transition(session.id, SessionStatus::Pending, SessionStatus::Failed, Some(&reason))
                    .await?;
                Err(err.into())
            }
        }
    }

    pub async fn get_session(&self, token: &str) -> CheckoutResult<PaymentSession> {
        self.sessions
            .find_by_token(token)
            .await?
            .ok_or_else(|| CheckoutError::NotFound("Checkout session not found".to_string()))
    }

    /// Turns a pending session into bookings. Repeating the call on a
    /// completed session returns the same booking ids.
    pub async fn confirm_session(&self, token: &str) -> CheckoutResult<Vec<Uuid>> {
        let session = self.get_session(token).await?;
        self.complete(session, Utc::now()).await
    }

    /// Abandons a pending session. `false` when it had already left `PENDING`.
    pub async fn fail_session(&self, token: &str, reason: &str) -> CheckoutResult<bool> {
        let session = self.get_session(token).await?;
        Ok(self
            .sessions
            .transition(session.id, SessionStatus::Pending, SessionStatus::Failed, Some(reason))
            .await?)
    }

    /// Asynchronous provider outcome. Goes through the same completion and
    /// failure paths as direct calls.
    pub async fn apply_provider_notification(
        &self,
        provider: &str,
        notification: &ProviderNotification,
    ) -> CheckoutResult<NotificationResult> {
        let session = self
            .sessions
            .find_by_external_id(provider, &notification.external_id)
            .await?
            .ok_or_else(|| {
                CheckoutError::NotFound(format!("No checkout session for {} payment {}", provider, notification.external_id))
            })?;

        match notification.outcome {
            PaymentOutcome::Succeeded => self.complete(session, Utc::now()).await.map(NotificationResult::Confirmed),
            PaymentOutcome::Failed => {
                let reason = notification.reason.as_deref().unwrap_or("payment failed");
                let changed = self
                    .sessions
                    .transition(session.id, SessionStatus::Pending, SessionStatus::Failed, Some(reason))
                    .await?;
                if changed {
                    tracing::info!(session_id = %session.id, reason, "checkout session failed by provider");
                    Ok(NotificationResult::Failed)
                } else {
                    Ok(NotificationResult::Ignored(session.status))
                }
            }
        }
    }

    pub(crate) async fn complete(&self, session: PaymentSession, now: DateTime<Utc>) -> CheckoutResult<Vec<Uuid>> {
        match session.status {
            SessionStatus::Completed => return Ok(session.booking_ids),
            SessionStatus::Pending => {}
            other => {
                return Err(CheckoutError::Consistency(format!(
                    "Checkout session is {}, expected PENDING",
                    other.as_str()
                )))
            }
        }

        if session.is_expired_at(now) {
            self.sessions
                .transition(session.id, SessionStatus::Pending, SessionStatus::Expired, Some("expired before confirmation"))
                .await?;
            return Err(CheckoutError::Consistency("Checkout session expired".to_string()));
        }

        let schedule_ids: BTreeSet<Uuid> = session.snapshot.items.iter().map(|item| item.schedule_id).collect();
        let tokens = self.lock_schedules(schedule_ids.iter().copied()).await?;
        let completed = self.complete_locked(&session, &schedule_ids, now).await;
        self.unlock_schedules(tokens).await;
        completed
    }

    async fn complete_locked(
        &self,
        session: &PaymentSession,
        schedule_ids: &BTreeSet<Uuid>,
        now: DateTime<Utc>,
    ) -> CheckoutResult<Vec<Uuid>> {
        for &schedule_id in schedule_ids {
            let open = self
                .schedules
                .get_schedule(schedule_id)
                .await?
                .is_some_and(|schedule| schedule.is_open());
            if !open {
                let reason = format!("schedule {} is no longer open", schedule_id);
                self.sessions
                    .transition(session.id, SessionStatus::Pending, SessionStatus::Failed, Some(&reason))
                    .await?;
                return Err(CheckoutError::Consistency(format!("Cannot confirm checkout: {}", reason)));
            }
        }

        let drafts = booking_drafts(session);
        let events = booking_events(session, &drafts, now);

        match self.sessions.complete_session(session.id, drafts, now).await? {
            CompletionOutcome::Completed(booking_ids) => {
                tracing::info!(
                    session_id = %session.id,
                    bookings = booking_ids.len(),
                    checkout_type = session.mode.as_str(),
                    "checkout session completed"
                );
                for event in events {
                    self.notifier.notify(event);
                }
                Ok(booking_ids)
            }
            CompletionOutcome::AlreadyCompleted(booking_ids) => Ok(booking_ids),
            CompletionOutcome::NotPending(status) => Err(CheckoutError::Consistency(format!(
                "Checkout session is {}, expected PENDING",
                status.as_str()
            ))),
        }
    }
}

/// One booking per snapshot item; admin-bypass bookings carry no payment.
fn booking_drafts(session: &PaymentSession) -> Vec<BookingDraft> {
    session
        .snapshot
        .items
        .iter()
        .map(|item| {
            let booking = Booking::confirmed(
                item.schedule_id,
                Some(session.id),
                session.user_id.clone(),
                session.user_email.clone(),
                item.price_per_person_cents,
                session.currency.clone(),
                item.participants.clone(),
            );
            let payment = match session.mode {
                CheckoutMode::AdminBypass => None,
                CheckoutMode::Payment | CheckoutMode::Mock => Some(PaymentRecord::completed(
                    booking.id,
                    session.provider.clone(),
                    session.external_id.clone(),
                    booking.total_cents,
                    session.currency.clone(),
                )),
            };
            BookingDraft { booking, payment }
        })
        .collect()
}

fn booking_events(session: &PaymentSession, drafts: &[BookingDraft], now: DateTime<Utc>) -> Vec<NotificationEvent> {
    drafts
        .iter()
        .flat_map(|draft| {
            let booking = &draft.booking;
            [
                NotificationEvent::BookingCreated(BookingCreatedEvent {
                    booking_id: booking.id,
                    schedule_id: booking.schedule_id,
                    session_id: Some(session.id),
                    user_email: booking.user_email.clone(),
                    num_participants: booking.num_participants,
                    total_cents: booking.total_cents,
                    currency: booking.currency.clone(),
                    timestamp: now.timestamp(),
                }),
                NotificationEvent::BookingConfirmed(BookingConfirmedEvent {
                    booking_id: booking.id,
                    schedule_id: booking.schedule_id,
                    user_email: booking.user_email.clone(),
                    timestamp: now.timestamp(),
                }),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::Harness;
    use proptest::prelude::*;
    use trek_core::booking::{BookingStatus, ParticipantData};
    use trek_core::schedule::{CartItem, ScheduleStatus};

    fn seeded_booking(schedule_id: Uuid, participants: u32) -> Booking {
        let people = (0..participants)
            .map(|i| ParticipantData {
                full_name: format!("Walk-in {}", i),
                email: None,
                document_id: None,
                nationality: None,
            })
            .collect();
        Booking::confirmed(schedule_id, None, None, Masked::from("desk@trek.example"), 1000, "USD".to_string(), people)
    }

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_validate_request_rules() {
        let harness = Harness::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let demand = validate_request(&harness.request(&[(b, 2, 1000), (a, 1, 500), (b, 1, 1000)])).unwrap();
        let expected: BTreeMap<Uuid, u32> = [(a, 1), (b, 3)].into_iter().collect();
        assert_eq!(demand, expected);

        let mut wrong_total = harness.request(&[(a, 2, 1000)]);
        wrong_total.total_amount = 1999;
        assert!(matches!(validate_request(&wrong_total), Err(CheckoutError::Validation(_))));

        let mut missing_participant = harness.request(&[(a, 2, 1000)]);
        missing_participant.items[0].participants.pop();
        assert!(validate_request(&missing_participant).is_err());

        let mut empty = harness.request(&[(a, 1, 1000)]);
        empty.items.clear();
        empty.total_amount = 0;
        assert!(validate_request(&empty).is_err());

        let mut negative = harness.request(&[(a, 1, 1000)]);
        negative.items[0].price_per_person = -1;
        negative.total_amount = -1;
        assert!(validate_request(&negative).is_err());
    }

    #[tokio::test]
    async fn test_create_session_holds_capacity() {
        let harness = Harness::new();
        let schedule = harness.add_schedule(5);

        let (session, initiation) = harness
            .manager
            .create_session(&harness.request(&[(schedule.id, 3, 2000)]), &Actor::guest())
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.total_cents, 6000);
        assert!(initiation.payment_url.is_some());
        assert_eq!(session.external_id.as_deref(), Some(initiation.external_id.as_str()));

        let held = harness.store.count_session_held_participants(schedule.id, Utc::now()).await.unwrap();
        assert_eq!(held, 3);

        let err = harness
            .manager
            .create_session(&harness.request(&[(schedule.id, 3, 2000)]), &Actor::guest())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(msg) if msg.contains("Requested: 3, Available: 2")));
    }

    #[tokio::test]
    async fn test_user_cart_not_counted_against_own_checkout() {
        let harness = Harness::new();
        let schedule = harness.add_schedule(4);
        harness.store.add_cart_item(CartItem::new(Uuid::new_v4(), Some("u-1".to_string()), schedule.id, 3));

        let guest = harness
            .manager
            .open_session(&harness.request(&[(schedule.id, 3, 100)]), &Actor::guest(), CheckoutMode::Payment, Utc::now())
            .await;
        assert!(guest.is_err());

        let owner = harness
            .manager
            .open_session(&harness.request(&[(schedule.id, 3, 100)]), &Actor::customer("u-1"), CheckoutMode::Payment, Utc::now())
            .await;
        assert!(owner.is_ok());
    }

    #[tokio::test]
    async fn test_cutoff_and_status_checks() {
        let harness = Harness::new();
        let soon = harness.add_schedule_starting(4, chrono::Duration::minutes(30));
        let err = harness
            .manager
            .create_session(&harness.request(&[(soon.id, 1, 100)]), &Actor::guest())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));

        let err = harness
            .manager
            .create_session(&harness.request(&[(Uuid::new_v4(), 1, 100)]), &Actor::guest())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_confirm_creates_bookings_once() {
        let harness = Harness::new();
        let first = harness.add_schedule(10);
        let second = harness.add_schedule(10);

        let (session, _) = harness
            .manager
            .create_session(&harness.request(&[(first.id, 3, 1500), (second.id, 2, 4000)]), &Actor::guest())
            .await
            .unwrap();

        let ids = harness.manager.confirm_session(&session.token).await.unwrap();
        let again = harness.manager.confirm_session(&session.token).await.unwrap();
        assert_eq!(ids, again);
        assert_eq!(ids.len(), 2);
        assert_eq!(harness.store.bookings().len(), 2);

        let a = harness.store.booking(ids[0]).unwrap();
        let b = harness.store.booking(ids[1]).unwrap();
        assert_eq!((a.participants.len(), a.total_cents), (3, 4500));
        assert_eq!((b.participants.len(), b.total_cents), (2, 8000));
        assert_eq!(a.status, BookingStatus::Confirmed);
        assert_eq!(a.total_cents + b.total_cents, session.total_cents);

        let payment = &harness.store.payments_for_booking(a.id)[0];
        assert_eq!(payment.amount_cents, 4500);
        assert_eq!(payment.external_id, session.external_id);

        // The session no longer holds capacity, the bookings do.
        let stored = harness.store.session(session.id).unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.booking_ids, ids);
        assert_eq!(harness.notifier.events().len(), 4);
    }

    #[tokio::test]
    async fn test_confirm_rejects_terminal_and_expired_sessions() {
        let harness = Harness::new();
        let schedule = harness.add_schedule(10);
        let (session, _) = harness
            .manager
            .create_session(&harness.request(&[(schedule.id, 1, 100)]), &Actor::guest())
            .await
            .unwrap();

        harness.store.set_session_expiry(session.id, Utc::now() - chrono::Duration::seconds(1));
        let err = harness.manager.confirm_session(&session.token).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Consistency(_)));
        assert_eq!(harness.store.session(session.id).unwrap().status, SessionStatus::Expired);

        let err = harness.manager.confirm_session(&session.token).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Consistency(msg) if msg.contains("EXPIRED")));
        assert!(harness.store.bookings().is_empty());

        let err = harness.manager.confirm_session("no-such-token").await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_confirm_fails_session_when_schedule_closed() {
        let harness = Harness::new();
        let open = harness.add_schedule(10);
        let closing = harness.add_schedule(10);
        let session = harness
            .manager
            .open_session(
                &harness.request(&[(open.id, 1, 100), (closing.id, 2, 100)]),
                &Actor::guest(),
                CheckoutMode::Mock,
                Utc::now(),
            )
            .await
            .unwrap();

        harness
            .store
            .update_schedule_status(closing.id, ScheduleStatus::Cancelled)
            .await
            .unwrap();

        let err = harness.manager.confirm_session(&session.token).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Consistency(msg) if msg.contains(&closing.id.to_string())));

        let stored = harness.store.session(session.id).unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert!(stored.failure_reason.unwrap().contains("no longer open"));
        assert!(harness.store.bookings().is_empty());
        assert!(harness.notifier.events().is_empty());
    }

    #[tokio::test]
    async fn test_fail_session_releases_capacity_once() {
        let harness = Harness::new();
        let schedule = harness.add_schedule(3);
        let (session, _) = harness
            .manager
            .create_session(&harness.request(&[(schedule.id, 3, 100)]), &Actor::guest())
            .await
            .unwrap();

        assert!(harness.manager.fail_session(&session.token, "customer abandoned").await.unwrap());
        assert!(!harness.manager.fail_session(&session.token, "again").await.unwrap());

        let stored = harness.store.session(session.id).unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("customer abandoned"));
        assert_eq!(harness.store.count_session_held_participants(schedule.id, Utc::now()).await.unwrap(), 0);
        assert!(harness.manager.confirm_session(&session.token).await.is_err());
        assert!(matches!(
            harness.manager.fail_session("no-such-token", "x").await,
            Err(CheckoutError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_initiation_failure_fails_session() {
        let harness = Harness::new();
        let schedule = harness.add_schedule(2);
        harness.mock.reject_initiation(true);

        let err = harness
            .manager
            .create_session(&harness.request(&[(schedule.id, 2, 100)]), &Actor::guest())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Provider(_)));

        let sessions = harness.store.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Failed);
        assert_eq!(harness.store.count_session_held_participants(schedule.id, Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_provider_notifications() {
        let harness = Harness::new();
        let schedule = harness.add_schedule(10);
        let request = harness.request(&[(schedule.id, 2, 100)]);

        let (paid, _) = harness.manager.create_session(&request, &Actor::guest()).await.unwrap();
        let success = ProviderNotification {
            external_id: paid.external_id.clone().unwrap(),
            outcome: PaymentOutcome::Succeeded,
            reason: None,
        };
        let result = harness.manager.apply_provider_notification("mock", &success).await.unwrap();
        let NotificationResult::Confirmed(ids) = result else {
            panic!("expected confirmation");
        };
        // Redelivered webhook.
        let redelivered = harness.manager.apply_provider_notification("mock", &success).await.unwrap();
        assert_eq!(redelivered, NotificationResult::Confirmed(ids));

        let (declined, _) = harness.manager.create_session(&request, &Actor::guest()).await.unwrap();
        let failure = ProviderNotification {
            external_id: declined.external_id.clone().unwrap(),
            outcome: PaymentOutcome::Failed,
            reason: Some("card declined".to_string()),
        };
        assert_eq!(
            harness.manager.apply_provider_notification("mock", &failure).await.unwrap(),
            NotificationResult::Failed
        );
        assert_eq!(
            harness.manager.apply_provider_notification("mock", &failure).await.unwrap(),
            NotificationResult::Ignored(SessionStatus::Failed)
        );
        assert_eq!(
            harness.store.session(declined.id).unwrap().failure_reason.as_deref(),
            Some("card declined")
        );

        let unknown = ProviderNotification { external_id: "nope".to_string(), ..failure };
        assert!(matches!(
            harness.manager.apply_provider_notification("mock", &unknown).await,
            Err(CheckoutError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checkouts_never_overbook() {
        let harness = Harness::new();
        let schedule = harness.add_schedule(10);
        let manager = harness.manager.clone();

        let mut handles = Vec::new();
        for _ in 0..12 {
            let manager = manager.clone();
            let request = harness.request(&[(schedule.id, 3, 100)]);
            handles.push(tokio::spawn(async move {
                manager.create_session(&request, &Actor::guest()).await.is_ok()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
        let held = harness.store.count_session_held_participants(schedule.id, Utc::now()).await.unwrap();
        assert_eq!(held, 9);
    }

    proptest! {
        #[test]
        fn prop_mixed_holds_never_exceed_capacity(
            max in 1u32..20,
            ops in prop::collection::vec((0u8..6, 1u32..6), 1..30),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let result: Result<(), TestCaseError> = runtime.block_on(async {
                let harness = Harness::new();
                let schedule = harness.add_schedule(max);
                let mut pending: Vec<PaymentSession> = Vec::new();

                for (op, participants) in ops {
                    let before = harness.engine.availability_status(schedule.id, max).await.unwrap();
                    let fits = before.available_slots >= participants as i64;
                    match op {
                        0 | 1 => {
                            // Walk-in bookings and cart adds go through the same admission check.
                            let check = harness
                                .engine
                                .validate_availability(&schedule, participants, &HoldExclusion::None)
                                .await
                                .unwrap();
                            prop_assert_eq!(check.available, fits);
                            if check.available {
                                if op == 0 {
                                    harness.store.seed_booking(seeded_booking(schedule.id, participants), None);
                                } else {
                                    harness.store.add_cart_item(CartItem::new(Uuid::new_v4(), None, schedule.id, participants));
                                }
                            }
                        }
                        2 => {
                            let opened = harness
                                .manager
                                .open_session(
                                    &harness.request(&[(schedule.id, participants, 100)]),
                                    &Actor::guest(),
                                    CheckoutMode::Payment,
                                    Utc::now(),
                                )
                                .await;
                            prop_assert_eq!(opened.is_ok(), fits);
                            if let Ok(session) = opened {
                                pending.push(session);
                            }
                        }
                        3 if !pending.is_empty() => {
                            let session = pending.remove(0);
                            let ids = harness.manager.confirm_session(&session.token).await.unwrap();
                            prop_assert_eq!(ids.len(), 1);
                        }
                        4 if !pending.is_empty() => {
                            let session = pending.remove(0);
                            harness.store.set_session_expiry(session.id, Utc::now() - chrono::Duration::seconds(1));
                        }
                        5 => {
                            if let Some(session) = pending.pop() {
                                prop_assert!(harness.manager.fail_session(&session.token, "abandoned").await.unwrap());
                            }
                        }
                        _ => {}
                    }

                    let after = harness.engine.availability_status(schedule.id, max).await.unwrap();
                    prop_assert!(
                        after.booked_participants + after.held_in_carts + after.held_in_sessions <= max as i64
                    );
                    let live: i64 = pending.iter().map(|s| s.snapshot.participants_for(schedule.id)).sum();
                    prop_assert_eq!(after.held_in_sessions, live);
                }
                Ok(())
            });
            result?;
        }
    }
}
