use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};
use trek_checkout::ExpirySweeper;

use crate::metrics::Metrics;

/// Periodically expires stale checkout sessions until `shutdown` flips to true.
pub async fn start_expiry_worker(
    sweeper: Arc<ExpirySweeper>,
    metrics: Arc<Metrics>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Expiry worker started, sweeping every {:?}", period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sweeper.sweep().await {
                    Ok(expired) => metrics.sessions_expired.inc_by(expired.len() as u64),
                    Err(e) => error!("Session sweep failed: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Expiry worker stopped");
}
