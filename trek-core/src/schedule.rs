use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Scheduled,
    Cancelled,
    Completed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Scheduled => "SCHEDULED",
            ScheduleStatus::Cancelled => "CANCELLED",
            ScheduleStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SCHEDULED" => Some(ScheduleStatus::Scheduled),
            "CANCELLED" => Some(ScheduleStatus::Cancelled),
            "COMPLETED" => Some(ScheduleStatus::Completed),
            _ => None,
        }
    }
}

/// One dated departure of a tour. Owned by the catalog; checkout only reads it
/// (and flips the status when a whole departure is cancelled).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub tour_id: Uuid,
    pub partner_id: Option<String>,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub max_participants: u32,
    pub status: ScheduleStatus,
}

impl Schedule {
    pub fn new(tour_id: Uuid, title: String, start_time: DateTime<Utc>, max_participants: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            tour_id,
            partner_id: None,
            title,
            start_time,
            max_participants,
            status: ScheduleStatus::Scheduled,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == ScheduleStatus::Scheduled
    }
}

/// A tentative pre-checkout hold. Written by the cart endpoints, only counted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    /// `None` for guest carts.
    pub cart_owner: Option<String>,
    pub schedule_id: Uuid,
    pub num_participants: u32,
    pub created_at: DateTime<Utc>,
}

impl CartItem {
    pub fn new(cart_id: Uuid, cart_owner: Option<String>, schedule_id: Uuid, num_participants: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            cart_id,
            cart_owner,
            schedule_id,
            num_participants,
            created_at: Utc::now(),
        }
    }
}

/// Which cart holds to leave out of a count.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HoldExclusion {
    #[default]
    None,
    /// A cart re-validating its own pending change.
    Cart(Uuid),
    /// Every cart owned by this user (their holds are being checked out).
    User(String),
}

impl HoldExclusion {
    pub fn excludes(&self, item: &CartItem) -> bool {
        match self {
            HoldExclusion::None => false,
            HoldExclusion::Cart(cart_id) => item.cart_id == *cart_id,
            HoldExclusion::User(user_id) => item.cart_owner.as_deref() == Some(user_id.as_str()),
        }
    }
}
