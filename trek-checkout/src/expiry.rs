use chrono::{DateTime, Utc};
use std::sync::Arc;
use trek_core::repository::SessionStore;
use trek_core::CheckoutResult;
use uuid::Uuid;

/// Reclaims capacity held by abandoned checkouts.
pub struct ExpirySweeper {
    sessions: Arc<dyn SessionStore>,
}

impl ExpirySweeper {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    pub async fn sweep(&self) -> CheckoutResult<Vec<Uuid>> {
        self.sweep_at(Utc::now()).await
    }

    /// Moves every pending session whose expiry has passed at `now` to
    /// `EXPIRED`. Terminal sessions are left alone.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> CheckoutResult<Vec<Uuid>> {
        let expired = self.sessions.expire_stale_sessions(now).await?;
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired stale checkout sessions");
        }
        Ok(expired)
    }
}
