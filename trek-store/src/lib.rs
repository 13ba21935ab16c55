pub mod app_config;
pub mod booking_repo;
pub mod cart_repo;
pub mod database;
pub mod events;
pub mod payment_repo;
pub mod redis_repo;
pub mod schedule_repo;
pub mod session_repo;

pub use booking_repo::StoreBookingRepository;
pub use cart_repo::StoreCartRepository;
pub use database::DbClient;
pub use events::{EventProducer, KafkaNotifier};
pub use payment_repo::StorePaymentRepository;
pub use redis_repo::{RedisClient, RedisScheduleLock};
pub use schedule_repo::StoreScheduleRepository;
pub use session_repo::StoreSessionRepository;
