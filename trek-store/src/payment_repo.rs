use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use trek_core::payment::{PaymentRecord, PaymentStatus};
use trek_core::repository::PaymentStore;
use trek_core::StoreResult;
use uuid::Uuid;

pub struct StorePaymentRepository {
    pool: PgPool,
}

impl StorePaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    booking_id: Uuid,
    provider: String,
    external_id: Option<String>,
    amount_cents: i64,
    currency: String,
    status: String,
    refunded_cents: i64,
    provider_refund_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = String;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(PaymentRecord {
            id: row.id,
            booking_id: row.booking_id,
            provider: row.provider,
            external_id: row.external_id,
            amount_cents: row.amount_cents,
            currency: row.currency,
            status: PaymentStatus::parse(&row.status).ok_or_else(|| format!("unknown payment status {}", row.status))?,
            refunded_cents: row.refunded_cents,
            provider_refund_id: row.provider_refund_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl PaymentStore for StorePaymentRepository {
    async fn find_payment_for_booking(&self, booking_id: Uuid) -> StoreResult<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            "SELECT id, booking_id, provider, external_id, amount_cents, currency, status,
                    refunded_cents, provider_refund_id, created_at, updated_at
             FROM payments WHERE booking_id = $1
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PaymentRecord::try_from).transpose()?)
    }

    async fn record_refund(&self, payment_id: Uuid, refunded_cents: i64, provider_refund_id: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE payments
             SET refunded_cents = refunded_cents + $2,
                 provider_refund_id = $3,
                 status = CASE WHEN refunded_cents + $2 >= amount_cents THEN 'REFUNDED' ELSE 'PARTIALLY_REFUNDED' END,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(payment_id)
        .bind(refunded_cents)
        .bind(provider_refund_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(format!("payment {} not found", payment_id).into());
        }
        Ok(())
    }
}
