use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trek_shared::Masked;
use uuid::Uuid;

use crate::payment::PaymentRecord;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(BookingStatus::Pending),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            "COMPLETED" => Some(BookingStatus::Completed),
            _ => None,
        }
    }

    /// Whether the booking's participants count against schedule capacity.
    pub fn occupies_capacity(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }
}

/// Participant details as captured at checkout time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantData {
    pub full_name: String,
    #[serde(default)]
    pub email: Option<Masked<String>>,
    #[serde(default)]
    pub document_id: Option<Masked<String>>,
    #[serde(default)]
    pub nationality: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub booking_id: Uuid,
    /// Order within the booking, starting at 0.
    pub position: u32,
    pub data: ParticipantData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub session_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub user_email: Masked<String>,
    pub status: BookingStatus,
    pub participants: Vec<Participant>,
    pub num_participants: u32,
    pub price_per_person_cents: i64,
    pub total_cents: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Builds a confirmed booking with its participants in the given order.
    pub fn confirmed(
        schedule_id: Uuid,
        session_id: Option<Uuid>,
        user_id: Option<String>,
        user_email: Masked<String>,
        price_per_person_cents: i64,
        currency: String,
        participants: Vec<ParticipantData>,
    ) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let num_participants = participants.len() as u32;
        let participants = participants
            .into_iter()
            .enumerate()
            .map(|(position, data)| Participant {
                id: Uuid::new_v4(),
                booking_id: id,
                position: position as u32,
                data,
            })
            .collect();

        Self {
            id,
            schedule_id,
            session_id,
            user_id,
            user_email,
            status: BookingStatus::Confirmed,
            participants,
            num_participants,
            price_per_person_cents,
            total_cents: price_per_person_cents * num_participants as i64,
            currency,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == BookingStatus::Cancelled
    }

    pub fn update_status(&mut self, status: BookingStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// A booking about to be written by session completion, with the payment
/// that paid for it (absent for admin-bypass checkouts).
#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub booking: Booking,
    pub payment: Option<PaymentRecord>,
}
