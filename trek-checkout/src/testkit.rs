use chrono::{Duration, Utc};
use std::sync::Arc;
use trek_catalog::AvailabilityEngine;
use trek_core::booking::ParticipantData;
use trek_core::memory::{InMemoryScheduleLock, InMemoryStore, RecordingNotifier};
use trek_core::policy::CheckoutPolicy;
use trek_core::repository::ScheduleLock;
use trek_core::schedule::Schedule;
use uuid::Uuid;

use crate::models::{CheckoutItemRequest, CheckoutRequest};
use crate::providers::{MockPaymentAdapter, ProviderRegistry};
use crate::{CancellationCascade, CheckoutOrchestrator, ExpirySweeper, PaymentSessionManager};

/// Fully wired engine over in-memory collaborators.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub mock: Arc<MockPaymentAdapter>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: Arc<AvailabilityEngine>,
    pub locks: Arc<dyn ScheduleLock>,
    pub providers: Arc<ProviderRegistry>,
    pub manager: Arc<PaymentSessionManager>,
    pub orchestrator: CheckoutOrchestrator,
    pub cascade: CancellationCascade,
    pub sweeper: ExpirySweeper,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(CheckoutPolicy {
            mock_payments_enabled: true,
            ..CheckoutPolicy::default()
        })
    }

    pub fn with_policy(policy: CheckoutPolicy) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let mock = Arc::new(MockPaymentAdapter::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let providers = Arc::new(ProviderRegistry::new().with(mock.clone()));
        let engine = Arc::new(AvailabilityEngine::new(store.clone(), store.clone(), store.clone()));
        let locks: Arc<dyn ScheduleLock> = Arc::new(InMemoryScheduleLock::new(policy.lock_wait()));

        let manager = Arc::new(PaymentSessionManager::new(
            engine.clone(),
            store.clone(),
            store.clone(),
            locks.clone(),
            providers.clone(),
            notifier.clone(),
            policy.clone(),
        ));
        let cascade = CancellationCascade::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            locks.clone(),
            providers.clone(),
            notifier.clone(),
            policy,
        );

        Self {
            orchestrator: CheckoutOrchestrator::new(manager.clone()),
            sweeper: ExpirySweeper::new(store.clone()),
            store,
            mock,
            notifier,
            engine,
            locks,
            providers,
            manager,
            cascade,
        }
    }

    pub fn add_schedule(&self, max_participants: u32) -> Schedule {
        self.add_schedule_starting(max_participants, Duration::days(3))
    }

    pub fn add_schedule_starting(&self, max_participants: u32, starts_in: Duration) -> Schedule {
        let schedule = Schedule::new(
            Uuid::new_v4(),
            "Volcano crater trek".to_string(),
            Utc::now() + starts_in,
            max_participants,
        );
        self.store.add_schedule(schedule.clone());
        schedule
    }

    /// `(schedule, participants, price per person)` per item.
    pub fn request(&self, items: &[(Uuid, u32, i64)]) -> CheckoutRequest {
        let items: Vec<CheckoutItemRequest> = items
            .iter()
            .map(|&(schedule_id, num_participants, price_per_person)| CheckoutItemRequest {
                schedule_id,
                num_participants,
                price_per_person,
                participants: (0..num_participants)
                    .map(|i| ParticipantData {
                        full_name: format!("Trekker {}", i + 1),
                        email: None,
                        document_id: None,
                        nationality: Some("CL".to_string()),
                    })
                    .collect(),
            })
            .collect();

        CheckoutRequest {
            provider: MockPaymentAdapter::NAME.to_string(),
            payment_method: "card".to_string(),
            total_amount: items.iter().map(|i| i.price_per_person * i.num_participants as i64).sum(),
            currency: "USD".to_string(),
            items,
            return_url: Some("https://trek.example/return".to_string()),
            cancel_url: Some("https://trek.example/cancel".to_string()),
            user_email: "guest@example.com".to_string(),
            mock_payment: false,
            admin_bypass: false,
        }
    }
}
