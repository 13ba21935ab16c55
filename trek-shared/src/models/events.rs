use uuid::Uuid;

use crate::pii::Masked;

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingCreatedEvent {
    pub booking_id: Uuid,
    pub schedule_id: Uuid,
    pub session_id: Option<Uuid>,
    pub user_email: Masked<String>,
    pub num_participants: u32,
    pub total_cents: i64,
    pub currency: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingConfirmedEvent {
    pub booking_id: Uuid,
    pub schedule_id: Uuid,
    pub user_email: Masked<String>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct ScheduleCancelledEvent {
    pub schedule_id: Uuid,
    pub reason: String,
    pub total_bookings: u32,
    pub refunds_processed: u32,
    pub refunds_failed: u32,
    pub total_refunded_cents: i64,
    pub timestamp: i64,
}

/// Everything the checkout engine announces to the outside world.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationEvent {
    BookingCreated(BookingCreatedEvent),
    BookingConfirmed(BookingConfirmedEvent),
    ScheduleCancelled(ScheduleCancelledEvent),
}

impl NotificationEvent {
    /// Topic suffix, joined to the configured prefix by the producer.
    pub fn topic(&self) -> &'static str {
        match self {
            NotificationEvent::BookingCreated(_) => "booking.created",
            NotificationEvent::BookingConfirmed(_) => "booking.confirmed",
            NotificationEvent::ScheduleCancelled(_) => "schedule.cancelled",
        }
    }

    /// Partition key: events about one departure stay ordered.
    pub fn key(&self) -> Uuid {
        match self {
            NotificationEvent::BookingCreated(e) => e.schedule_id,
            NotificationEvent::BookingConfirmed(e) => e.schedule_id,
            NotificationEvent::ScheduleCancelled(e) => e.schedule_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_topic_and_tag() {
        let schedule_id = Uuid::new_v4();
        let event = NotificationEvent::ScheduleCancelled(ScheduleCancelledEvent {
            schedule_id,
            reason: "storm".to_string(),
            total_bookings: 3,
            refunds_processed: 2,
            refunds_failed: 1,
            total_refunded_cents: 12000,
            timestamp: 0,
        });

        assert_eq!(event.topic(), "schedule.cancelled");
        assert_eq!(event.key(), schedule_id);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SCHEDULE_CANCELLED");
        assert_eq!(json["refunds_failed"], 1);
    }
}
