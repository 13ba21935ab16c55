pub mod availability;
pub mod window;

pub use availability::{AvailabilityCheck, AvailabilityEngine, AvailabilityStatus};
pub use window::BookingWindow;
