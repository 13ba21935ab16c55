pub mod cancellation;
pub mod expiry;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod sessions;

#[cfg(test)]
mod testkit;

pub use cancellation::CancellationCascade;
pub use expiry::ExpirySweeper;
pub use orchestrator::CheckoutOrchestrator;
pub use providers::{MockPaymentAdapter, ProviderRegistry};
pub use sessions::PaymentSessionManager;
