use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::PaymentSession;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(PaymentStatus::Pending),
            "COMPLETED" => Some(PaymentStatus::Completed),
            "FAILED" => Some(PaymentStatus::Failed),
            "REFUNDED" => Some(PaymentStatus::Refunded),
            "PARTIALLY_REFUNDED" => Some(PaymentStatus::PartiallyRefunded),
            _ => None,
        }
    }
}

/// One gateway transaction backing a booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub provider: String,
    pub external_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub refunded_cents: i64,
    pub provider_refund_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn completed(
        booking_id: Uuid,
        provider: String,
        external_id: Option<String>,
        amount_cents: i64,
        currency: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            booking_id,
            provider,
            external_id,
            amount_cents,
            currency,
            status: PaymentStatus::Completed,
            refunded_cents: 0,
            provider_refund_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a successful refund of `amount_cents`.
    pub fn apply_refund(&mut self, amount_cents: i64, provider_refund_id: String) {
        self.refunded_cents += amount_cents;
        self.provider_refund_id = Some(provider_refund_id);
        self.status = if self.refunded_cents >= self.amount_cents {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        self.updated_at = Utc::now();
    }
}

/// What the gateway hands back when a checkout starts: where to send the
/// customer, or the code they have to pay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentInitiation {
    pub external_id: String,
    pub payment_url: Option<String>,
    pub qr_code: Option<String>,
    pub pix_code: Option<String>,
    pub client_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub provider_refund_id: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("provider rejected the request: {0}")]
    Rejected(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PaymentProviderAdapter: Send + Sync {
    /// Name matched against the checkout request's `provider` field.
    fn name(&self) -> &str;

    /// Start a payment for a persisted pending session.
    async fn initiate(&self, session: &PaymentSession) -> Result<PaymentInitiation, ProviderError>;

    /// Refund part or all of a captured payment.
    async fn refund(&self, payment: &PaymentRecord, amount_cents: i64) -> Result<RefundReceipt, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_then_full_refund() {
        let mut payment = PaymentRecord::completed(Uuid::new_v4(), "mock".to_string(), None, 10000, "USD".to_string());

        payment.apply_refund(9000, "re_1".to_string());
        assert_eq!(payment.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(payment.refunded_cents, 9000);

        payment.apply_refund(1000, "re_2".to_string());
        assert_eq!(payment.status, PaymentStatus::Refunded);
        assert_eq!(payment.provider_refund_id.as_deref(), Some("re_2"));
    }
}
