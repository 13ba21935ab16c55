use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trek_api::{app, worker, AppState, AuthConfig, Backends};
use trek_checkout::{MockPaymentAdapter, ProviderRegistry};
use trek_store::{
    DbClient, EventProducer, KafkaNotifier, RedisClient, RedisScheduleLock, StoreBookingRepository,
    StoreCartRepository, StorePaymentRepository, StoreScheduleRepository, StoreSessionRepository,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trek_api=debug,trek_checkout=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = trek_store::app_config::Config::load().context("Failed to load config")?;
    tracing::info!("Starting Trek API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    let policy = db
        .fetch_checkout_policy(config.checkout.clone())
        .await
        .context("Failed to load business rules")?;

    // Redis Connection
    let redis = RedisClient::new(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    let lock = RedisScheduleLock::new(redis.clone(), policy.schedule_lock_ttl_seconds, policy.lock_wait());

    // Kafka Connection
    let producer = EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?;
    let notifier = KafkaNotifier::new(producer, config.kafka.clone());

    let providers = ProviderRegistry::new().with(Arc::new(MockPaymentAdapter::new()));
    tracing::info!("Payment providers: {:?}", providers.names());

    let backends = Backends {
        schedules: Arc::new(StoreScheduleRepository::new(db.pool.clone())),
        bookings: Arc::new(StoreBookingRepository::new(db.pool.clone())),
        carts: Arc::new(StoreCartRepository::new(db.pool.clone())),
        sessions: Arc::new(StoreSessionRepository::new(db.pool.clone())),
        payments: Arc::new(StorePaymentRepository::new(db.pool.clone())),
        lock: Arc::new(lock),
        notifier: Arc::new(notifier),
    };

    let sweep_interval = policy.sweep_interval();
    let app_state = AppState::new(
        backends,
        providers,
        policy,
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
        Some(Arc::new(redis)),
    )
    .context("Failed to register metrics")?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper = tokio::spawn(worker::start_expiry_worker(
        app_state.sweeper.clone(),
        app_state.metrics.clone(),
        sweep_interval,
        shutdown_rx,
    ));

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    Ok(())
}
