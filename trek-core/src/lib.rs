pub mod access;
pub mod booking;
pub mod memory;
pub mod notify;
pub mod payment;
pub mod policy;
pub mod repository;
pub mod schedule;
pub mod session;

/// Error surfaced by storage collaborators. Kept as a boxed trait object so
/// Postgres, Redis and in-memory backends can report their own error types.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Not authorized: {0}")]
    Authorization(String),
    #[error("Consistency violation: {0}")]
    Consistency(String),
    #[error("Payment provider error: {0}")]
    Provider(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

pub type CheckoutResult<T> = Result<T, CheckoutError>;

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        CheckoutError::Storage(err.to_string())
    }
}

impl From<payment::ProviderError> for CheckoutError {
    fn from(err: payment::ProviderError) -> Self {
        CheckoutError::Provider(err.to_string())
    }
}
