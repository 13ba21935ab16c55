use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use trek_core::access::{can_access, Actor, ResourceKind};
use trek_core::booking::Booking;
use trek_core::notify::NotificationPort;
use trek_core::policy::CheckoutPolicy;
use trek_core::repository::{BookingStore, LockToken, PaymentStore, ScheduleLock, ScheduleStore, SessionStore};
use trek_core::schedule::ScheduleStatus;
use trek_core::session::SessionStatus;
use trek_core::{CheckoutError, CheckoutResult};
use trek_shared::models::events::{NotificationEvent, ScheduleCancelledEvent};
use uuid::Uuid;

use crate::models::{BookingRefundDetail, RefundOutcome, ScheduleCancellationResult};
use crate::providers::ProviderRegistry;

/// Cancels a whole departure and refunds its bookings one by one.
///
/// Best effort: a failed refund is reported, never raised, and the booking
/// is cancelled regardless since the departure is not happening.
pub struct CancellationCascade {
    schedules: Arc<dyn ScheduleStore>,
    bookings: Arc<dyn BookingStore>,
    payments: Arc<dyn PaymentStore>,
    sessions: Arc<dyn SessionStore>,
    locks: Arc<dyn ScheduleLock>,
    providers: Arc<ProviderRegistry>,
    notifier: Arc<dyn NotificationPort>,
    policy: CheckoutPolicy,
}

impl CancellationCascade {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        bookings: Arc<dyn BookingStore>,
        payments: Arc<dyn PaymentStore>,
        sessions: Arc<dyn SessionStore>,
        locks: Arc<dyn ScheduleLock>,
        providers: Arc<ProviderRegistry>,
        notifier: Arc<dyn NotificationPort>,
        policy: CheckoutPolicy,
    ) -> Self {
        Self {
            schedules,
            bookings,
            payments,
            sessions,
            locks,
            providers,
            notifier,
            policy,
        }
    }

    /// Admins may cancel any departure, partners only their own.
    pub async fn cancel_schedule_as(
        &self,
        actor: &Actor,
        schedule_id: Uuid,
        reason: &str,
    ) -> CheckoutResult<ScheduleCancellationResult> {
        let schedule = self
            .schedules
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound(format!("Schedule {} not found", schedule_id)))?;
        let resource = ResourceKind::Schedule {
            partner_id: schedule.partner_id.as_deref(),
        };
        if !can_access(actor, resource) {
            return Err(CheckoutError::Authorization(
                "Not allowed to cancel this schedule".to_string(),
            ));
        }
        self.cancel_schedule(schedule_id, reason).await
    }

    pub async fn cancel_schedule(&self, schedule_id: Uuid, reason: &str) -> CheckoutResult<ScheduleCancellationResult> {
        tracing::info!(%schedule_id, reason, "cancelling schedule");

        // Held across the flip and the listing so no checkout is admitted or
        // confirmed in between. Refunds run after release.
        let token = self
            .locks
            .acquire(schedule_id)
            .await
            .map_err(|err| CheckoutError::Storage(format!("Could not lock schedule {}: {}", schedule_id, err)))?;
        let closed = self.close_schedule(schedule_id, reason).await;
        self.release(token).await;
        let (cancelled_sessions, bookings) = closed?;

        let mut details = Vec::with_capacity(bookings.len());
        let mut refunded_sessions = BTreeSet::new();
        for booking in &bookings {
            let detail = self.process_booking(booking).await;
            if detail.status == RefundOutcome::Success {
                if let Some(session_id) = booking.session_id {
                    refunded_sessions.insert(session_id);
                }
            }
            details.push(detail);
        }

        for session_id in refunded_sessions {
            if let Err(err) = self.mark_session_refunded(session_id).await {
                tracing::warn!(%session_id, "could not mark session refunded: {}", err);
            }
        }

        let result = ScheduleCancellationResult::from_details(schedule_id, cancelled_sessions, details);
        tracing::info!(
            %schedule_id,
            total_bookings = result.total_bookings,
            refunds_processed = result.refunds_processed,
            refunds_failed = result.refunds_failed,
            total_refunded = result.total_refunded_amount,
            "schedule cancellation finished"
        );

        self.notifier.notify(NotificationEvent::ScheduleCancelled(ScheduleCancelledEvent {
            schedule_id,
            reason: reason.to_string(),
            total_bookings: result.total_bookings,
            refunds_processed: result.refunds_processed,
            refunds_failed: result.refunds_failed,
            total_refunded_cents: result.total_refunded_amount,
            timestamp: Utc::now().timestamp(),
        }));
        Ok(result)
    }

    async fn close_schedule(&self, schedule_id: Uuid, reason: &str) -> CheckoutResult<(u32, Vec<Booking>)> {
        let schedule = self
            .schedules
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound(format!("Schedule {} not found", schedule_id)))?;
        if schedule.status != ScheduleStatus::Cancelled {
            self.schedules
                .update_schedule_status(schedule_id, ScheduleStatus::Cancelled)
                .await?;
        }

        let cancelled_sessions = self.cancel_pending_sessions(schedule_id, reason).await?;
        let bookings = self.bookings.list_bookings_for_schedule(schedule_id).await?;
        Ok((cancelled_sessions, bookings))
    }

    async fn release(&self, token: LockToken) {
        let schedule_id = token.schedule_id;
        if let Err(err) = self.locks.release(token).await {
            tracing::warn!(%schedule_id, "failed to release schedule lock: {}", err);
        }
    }

    async fn cancel_pending_sessions(&self, schedule_id: Uuid, reason: &str) -> CheckoutResult<u32> {
        let pending = self.sessions.list_pending_for_schedule(schedule_id).await?;
        let mut cancelled = 0;
        for session in pending {
            let reason = format!("schedule cancelled: {}", reason);
            if self
                .sessions
                .transition(session.id, SessionStatus::Pending, SessionStatus::Cancelled, Some(&reason))
                .await?
            {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn process_booking(&self, booking: &Booking) -> BookingRefundDetail {
        let mut detail = BookingRefundDetail {
            booking_id: booking.id,
            status: RefundOutcome::AlreadyCancelled,
            refunded_amount: 0,
            provider_refund_id: None,
            error: None,
        };
        if booking.is_cancelled() {
            return detail;
        }

        match self.refund(booking).await {
            Ok(None) => detail.status = RefundOutcome::NoPayment,
            Ok(Some((amount, refund_id))) => {
                detail.status = RefundOutcome::Success;
                detail.refunded_amount = amount;
                detail.provider_refund_id = refund_id;
            }
            Err(message) => {
                tracing::warn!(booking_id = %booking.id, "refund failed: {}", message);
                detail.status = RefundOutcome::Failed;
                detail.error = Some(message);
            }
        }

        if let Err(err) = self.bookings.cancel_booking(booking.id).await {
            tracing::error!(booking_id = %booking.id, "could not cancel booking: {}", err);
            detail.error.get_or_insert_with(|| format!("booking not cancelled: {}", err));
        }
        detail
    }

    /// `Ok(None)` when there is nothing to refund against.
    async fn refund(&self, booking: &Booking) -> Result<Option<(i64, Option<String>)>, String> {
        let payment = match self.payments.find_payment_for_booking(booking.id).await {
            Ok(Some(payment)) => payment,
            Ok(None) => return Ok(None),
            Err(err) => return Err(format!("payment lookup failed: {}", err)),
        };

        let refundable = (payment.amount_cents - payment.refunded_cents).max(0);
        let amount = self.policy.refund_amount(refundable);
        if amount == 0 {
            return Ok(Some((0, None)));
        }

        let provider = self.providers.get(&payment.provider).map_err(|err| err.to_string())?;
        let receipt = provider.refund(&payment, amount).await.map_err(|err| err.to_string())?;

        if let Err(err) = self
            .payments
            .record_refund(payment.id, amount, &receipt.provider_refund_id)
            .await
        {
            tracing::error!(payment_id = %payment.id, "refund issued but not recorded: {}", err);
        }
        Ok(Some((amount, Some(receipt.provider_refund_id))))
    }

    async fn mark_session_refunded(&self, session_id: Uuid) -> CheckoutResult<()> {
        let bookings = self.bookings.list_bookings_for_session(session_id).await?;
        if bookings.iter().all(Booking::is_cancelled) {
            self.sessions
                .transition(session_id, SessionStatus::Completed, SessionStatus::Refunded, None)
                .await?;
        }
        Ok(())
    }
}
