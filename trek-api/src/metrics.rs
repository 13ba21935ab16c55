use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use trek_checkout::models::ScheduleCancellationResult;

use crate::{error::AppError, state::AppState};

/// Counters exported at `/metrics`. Each instance owns its registry so test
/// routers do not collide on the global one.
pub struct Metrics {
    registry: Registry,
    pub checkout_sessions: IntCounterVec,
    pub sessions_expired: IntCounter,
    pub refunds: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let checkout_sessions = IntCounterVec::new(
            Opts::new("trek_checkout_sessions_total", "Checkout sessions opened, by checkout type"),
            &["checkout_type"],
        )?;
        let sessions_expired = IntCounter::new(
            "trek_sessions_expired_total",
            "Pending checkout sessions moved to EXPIRED by the sweeper",
        )?;
        let refunds = IntCounterVec::new(
            Opts::new("trek_refunds_total", "Cascade refund outcomes per booking"),
            &["outcome"],
        )?;

        registry.register(Box::new(checkout_sessions.clone()))?;
        registry.register(Box::new(sessions_expired.clone()))?;
        registry.register(Box::new(refunds.clone()))?;

        Ok(Self { registry, checkout_sessions, sessions_expired, refunds })
    }

    pub fn record_cancellation(&self, result: &ScheduleCancellationResult) {
        for detail in &result.booking_details {
            self.refunds.with_label_values(&[detail.status.as_str()]).inc();
        }
    }

    pub fn render(&self) -> Result<String, AppError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| AppError::InternalServerError(format!("Metrics encoding failed: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| AppError::InternalServerError(e.to_string()))
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/metrics", get(export_metrics))
}

async fn export_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_rendered() {
        let metrics = Metrics::new().unwrap();
        metrics.checkout_sessions.with_label_values(&["MOCK"]).inc();
        metrics.sessions_expired.inc_by(3);

        let text = metrics.render().unwrap();
        assert!(text.contains("trek_checkout_sessions_total{checkout_type=\"MOCK\"} 1"));
        assert!(text.contains("trek_sessions_expired_total 3"));
    }
}
