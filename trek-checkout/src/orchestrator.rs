use chrono::Utc;
use std::sync::Arc;
use trek_core::access::Actor;
use trek_core::session::{CheckoutMode, SessionStatus};
use trek_core::{CheckoutError, CheckoutResult};

use crate::models::{CheckoutRequest, CheckoutResponse};
use crate::sessions::PaymentSessionManager;

/// Single entry point for booking creation.
///
/// Every mode opens a session first, so "checkout data to bookings" only
/// ever happens in `PaymentSessionManager::confirm_session`.
pub struct CheckoutOrchestrator {
    sessions: Arc<PaymentSessionManager>,
}

impl CheckoutOrchestrator {
    pub fn new(sessions: Arc<PaymentSessionManager>) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &Arc<PaymentSessionManager> {
        &self.sessions
    }

    pub async fn checkout(&self, request: &CheckoutRequest, actor: &Actor) -> CheckoutResult<CheckoutResponse> {
        if request.mock_payment && request.admin_bypass {
            return Err(CheckoutError::Validation(
                "mockPayment and adminBypass cannot be combined".to_string(),
            ));
        }

        match request.mode() {
            CheckoutMode::Payment => self.start_payment(request, actor).await,
            CheckoutMode::Mock => {
                if !self.sessions.policy().mock_payments_enabled {
                    return Err(CheckoutError::Validation("Mock payments are disabled".to_string()));
                }
                self.confirm_immediately(request, actor, CheckoutMode::Mock).await
            }
            CheckoutMode::AdminBypass => {
                if !actor.is_admin() {
                    tracing::warn!(user_id = ?actor.user_id, "admin bypass refused");
                    return Err(CheckoutError::Authorization(
                        "Admin bypass requires an administrative role".to_string(),
                    ));
                }
                self.confirm_immediately(request, actor, CheckoutMode::AdminBypass).await
            }
        }
    }

    async fn start_payment(&self, request: &CheckoutRequest, actor: &Actor) -> CheckoutResult<CheckoutResponse> {
        let (session, initiation) = self.sessions.create_session(request, actor).await?;

        Ok(CheckoutResponse {
            session_id: session.id,
            status: SessionStatus::Pending,
            payment_url: initiation.payment_url,
            token: Some(session.token),
            client_token: initiation.client_token,
            qr_code: initiation.qr_code,
            pix_code: initiation.pix_code,
            expires_at: Some(session.expires_at),
            booking_ids: None,
            checkout_type: CheckoutMode::Payment,
            message: "Complete the payment before the session expires".to_string(),
        })
    }

    async fn confirm_immediately(
        &self,
        request: &CheckoutRequest,
        actor: &Actor,
        mode: CheckoutMode,
    ) -> CheckoutResult<CheckoutResponse> {
        let session = self.sessions.open_session(request, actor, mode, Utc::now()).await?;
        let booking_ids = self.sessions.confirm_session(&session.token).await?;

        Ok(CheckoutResponse {
            session_id: session.id,
            status: SessionStatus::Completed,
            payment_url: None,
            token: Some(session.token),
            client_token: None,
            qr_code: None,
            pix_code: None,
            expires_at: None,
            message: format!("{} booking(s) confirmed", booking_ids.len()),
            booking_ids: Some(booking_ids),
            checkout_type: mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::Harness;
    use trek_core::policy::CheckoutPolicy;

    #[tokio::test]
    async fn test_payment_mode_leaves_session_pending() {
        let harness = Harness::new();
        let schedule = harness.add_schedule(6);

        let response = harness
            .orchestrator
            .checkout(&harness.request(&[(schedule.id, 2, 3000)]), &Actor::customer("u-7"))
            .await
            .unwrap();

        assert_eq!(response.status, SessionStatus::Pending);
        assert_eq!(response.checkout_type, CheckoutMode::Payment);
        assert!(response.payment_url.is_some());
        assert!(response.expires_at.is_some());
        let token = response.token.as_deref().unwrap();
        assert_eq!(response.client_token, Some(format!("mock_secret_{}", token)));
        assert!(response.booking_ids.is_none());
        assert!(harness.store.bookings().is_empty());
    }

    #[tokio::test]
    async fn test_mock_mode_confirms_immediately() {
        let harness = Harness::new();
        let schedule = harness.add_schedule(6);
        let mut request = harness.request(&[(schedule.id, 2, 3000)]);
        request.mock_payment = true;

        let response = harness.orchestrator.checkout(&request, &Actor::guest()).await.unwrap();

        assert_eq!(response.status, SessionStatus::Completed);
        assert!(response.client_token.is_none());
        let ids = response.booking_ids.unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(harness.store.payments_for_booking(ids[0]).len(), 1);
        assert_eq!(harness.store.session(response.session_id).unwrap().status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_mock_mode_respects_policy() {
        let harness = Harness::with_policy(CheckoutPolicy::default());
        let schedule = harness.add_schedule(6);
        let mut request = harness.request(&[(schedule.id, 1, 3000)]);
        request.mock_payment = true;

        let err = harness.orchestrator.checkout(&request, &Actor::guest()).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));
        assert!(harness.store.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_admin_bypass_requires_admin() {
        let harness = Harness::new();
        let schedule = harness.add_schedule(6);
        let mut request = harness.request(&[(schedule.id, 2, 3000)]);
        request.admin_bypass = true;

        let err = harness
            .orchestrator
            .checkout(&request, &Actor::customer("u-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Authorization(_)));
        assert!(harness.store.sessions().is_empty());

        let response = harness.orchestrator.checkout(&request, &Actor::admin("ops")).await.unwrap();
        assert_eq!(response.checkout_type, CheckoutMode::AdminBypass);
        let ids = response.booking_ids.unwrap();
        assert!(harness.store.payments_for_booking(ids[0]).is_empty());
    }

    #[tokio::test]
    async fn test_combined_flags_rejected() {
        let harness = Harness::new();
        let schedule = harness.add_schedule(6);
        let mut request = harness.request(&[(schedule.id, 1, 3000)]);
        request.admin_bypass = true;
        request.mock_payment = true;

        let err = harness.orchestrator.checkout(&request, &Actor::admin("ops")).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));
    }
}
