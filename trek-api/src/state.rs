use std::sync::Arc;
use trek_catalog::AvailabilityEngine;
use trek_checkout::{
    CancellationCascade, CheckoutOrchestrator, ExpirySweeper, PaymentSessionManager, ProviderRegistry,
};
use trek_core::notify::NotificationPort;
use trek_core::policy::CheckoutPolicy;
use trek_core::repository::{BookingStore, CartStore, PaymentStore, ScheduleLock, ScheduleStore, SessionStore};
use trek_store::RedisClient;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

/// Storage and messaging collaborators the engine is wired over. Postgres,
/// Redis and Kafka in production, `InMemoryStore` in tests.
pub struct Backends {
    pub schedules: Arc<dyn ScheduleStore>,
    pub bookings: Arc<dyn BookingStore>,
    pub carts: Arc<dyn CartStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub payments: Arc<dyn PaymentStore>,
    pub lock: Arc<dyn ScheduleLock>,
    pub notifier: Arc<dyn NotificationPort>,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CheckoutOrchestrator>,
    pub sessions: Arc<PaymentSessionManager>,
    pub cascade: Arc<CancellationCascade>,
    pub availability: Arc<AvailabilityEngine>,
    pub sweeper: Arc<ExpirySweeper>,
    pub schedules: Arc<dyn ScheduleStore>,
    pub bookings: Arc<dyn BookingStore>,
    pub metrics: Arc<Metrics>,
    pub auth: AuthConfig,
    /// Enables the per-IP rate limiter when present.
    pub redis: Option<Arc<RedisClient>>,
}

impl AppState {
    pub fn new(
        backends: Backends,
        providers: ProviderRegistry,
        policy: CheckoutPolicy,
        auth: AuthConfig,
        redis: Option<Arc<RedisClient>>,
    ) -> Result<Self, prometheus::Error> {
        let providers = Arc::new(providers);
        let availability = Arc::new(AvailabilityEngine::new(
            backends.bookings.clone(),
            backends.carts.clone(),
            backends.sessions.clone(),
        ));

        let sessions = Arc::new(PaymentSessionManager::new(
            availability.clone(),
            backends.schedules.clone(),
            backends.sessions.clone(),
            backends.lock.clone(),
            providers.clone(),
            backends.notifier.clone(),
            policy.clone(),
        ));
        let cascade = CancellationCascade::new(
            backends.schedules.clone(),
            backends.bookings.clone(),
            backends.payments.clone(),
            backends.sessions.clone(),
            backends.lock.clone(),
            providers,
            backends.notifier.clone(),
            policy,
        );

        Ok(Self {
            orchestrator: Arc::new(CheckoutOrchestrator::new(sessions.clone())),
            sessions,
            cascade: Arc::new(cascade),
            availability,
            sweeper: Arc::new(ExpirySweeper::new(backends.sessions.clone())),
            schedules: backends.schedules,
            bookings: backends.bookings,
            metrics: Arc::new(Metrics::new()?),
            auth,
            redis,
        })
    }
}
