use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::{CheckoutError, CheckoutResult};

/// Operational knobs of the checkout engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutPolicy {
    #[serde(default = "default_session_ttl_seconds")]
    pub session_ttl_seconds: u64,
    /// No new sessions for departures starting sooner than this.
    #[serde(default = "default_booking_cutoff_minutes")]
    pub booking_cutoff_minutes: u64,
    /// Share of the paid amount withheld on cascade refunds, 0.0..=1.0.
    #[serde(default)]
    pub retention_percentage: f64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_schedule_lock_ttl_seconds")]
    pub schedule_lock_ttl_seconds: u64,
    #[serde(default = "default_schedule_lock_wait_ms")]
    pub schedule_lock_wait_ms: u64,
    #[serde(default)]
    pub mock_payments_enabled: bool,
}

fn default_session_ttl_seconds() -> u64 { 1800 }
fn default_booking_cutoff_minutes() -> u64 { 120 }
fn default_sweep_interval_seconds() -> u64 { 60 }
fn default_schedule_lock_ttl_seconds() -> u64 { 10 }
fn default_schedule_lock_wait_ms() -> u64 { 2000 }

impl Default for CheckoutPolicy {
    fn default() -> Self {
        Self {
            session_ttl_seconds: default_session_ttl_seconds(),
            booking_cutoff_minutes: default_booking_cutoff_minutes(),
            retention_percentage: 0.0,
            sweep_interval_seconds: default_sweep_interval_seconds(),
            schedule_lock_ttl_seconds: default_schedule_lock_ttl_seconds(),
            schedule_lock_wait_ms: default_schedule_lock_wait_ms(),
            mock_payments_enabled: false,
        }
    }
}

impl CheckoutPolicy {
    pub fn session_ttl(&self) -> CheckoutResult<Duration> {
        i64::try_from(self.session_ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| out_of_range("session_ttl_seconds", self.session_ttl_seconds))
    }

    pub fn booking_cutoff(&self) -> CheckoutResult<Duration> {
        i64::try_from(self.booking_cutoff_minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .ok_or_else(|| out_of_range("booking_cutoff_minutes", self.booking_cutoff_minutes))
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_seconds.max(1))
    }

    pub fn lock_wait(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.schedule_lock_wait_ms)
    }

    /// Refund due for a paid amount once retention is withheld.
    pub fn refund_amount(&self, paid_cents: i64) -> i64 {
        (paid_cents as f64 * (1.0 - self.retention_percentage)).round() as i64
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.retention_percentage) {
            return Err(format!(
                "retention_percentage must be between 0.0 and 1.0, got {}",
                self.retention_percentage
            ));
        }
        if self.session_ttl_seconds == 0 {
            return Err("session_ttl_seconds must be positive".to_string());
        }
        self.session_ttl().map_err(|e| e.to_string())?;
        self.booking_cutoff().map_err(|e| e.to_string())?;
        Ok(())
    }
}

fn out_of_range(field: &str, value: u64) -> CheckoutError {
    CheckoutError::Validation(format!("{} is out of range: {}", field, value))
}
