use chrono::{DateTime, Duration, Utc};
use trek_core::schedule::Schedule;
use trek_core::{CheckoutError, CheckoutResult};

/// Minimum lead time between a checkout and the departure it books.
#[derive(Debug, Clone, Copy)]
pub struct BookingWindow {
    cutoff: Duration,
}

impl BookingWindow {
    pub fn new(cutoff: Duration) -> Self {
        Self { cutoff }
    }

    pub fn check(&self, schedule: &Schedule, now: DateTime<Utc>) -> CheckoutResult<()> {
        if schedule.start_time <= now {
            return Err(CheckoutError::Validation(format!(
                "Departure {} has already started",
                schedule.id
            )));
        }
        if schedule.start_time - now < self.cutoff {
            return Err(CheckoutError::Validation(format!(
                "Bookings close {} minutes before departure {}",
                self.cutoff.num_minutes(),
                schedule.id
            )));
        }
        Ok(())
    }
}
