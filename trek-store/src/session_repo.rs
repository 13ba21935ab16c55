use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use trek_core::booking::BookingDraft;
use trek_core::repository::SessionStore;
use trek_core::session::{CheckoutMode, CompletionOutcome, PaymentSession, SessionStatus, SnapshotPayload};
use trek_core::StoreResult;
use trek_shared::Masked;
use uuid::Uuid;

use crate::booking_repo::insert_draft;

pub struct StoreSessionRepository {
    pool: PgPool,
}

impl StoreSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    token: String,
    user_id: Option<String>,
    user_email: String,
    provider: String,
    payment_method: String,
    checkout_type: String,
    currency: String,
    total_cents: i64,
    status: String,
    snapshot: Value,
    external_id: Option<String>,
    payment_url: Option<String>,
    booking_ids: Vec<Uuid>,
    return_url: Option<String>,
    cancel_url: Option<String>,
    failure_reason: Option<String>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const SESSION_COLUMNS: &str = "id, token, user_id, user_email, provider, payment_method, checkout_type, currency, \
     total_cents, status, snapshot, external_id, payment_url, booking_ids, return_url, cancel_url, failure_reason, \
     expires_at, created_at, updated_at";

impl TryFrom<SessionRow> for PaymentSession {
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let status = SessionStatus::parse(&row.status).ok_or_else(|| format!("unknown session status {}", row.status))?;
        let mode = CheckoutMode::parse(&row.checkout_type)
            .ok_or_else(|| format!("unknown checkout type {}", row.checkout_type))?;
        // Fails on snapshot versions this build does not know.
        let snapshot = serde_json::from_value::<SnapshotPayload>(row.snapshot)?.into_snapshot();

        Ok(PaymentSession {
            id: row.id,
            token: row.token,
            user_id: row.user_id,
            user_email: Masked::new(row.user_email),
            provider: row.provider,
            payment_method: row.payment_method,
            mode,
            currency: row.currency,
            total_cents: row.total_cents,
            status,
            snapshot,
            external_id: row.external_id,
            payment_url: row.payment_url,
            booking_ids: row.booking_ids,
            return_url: row.return_url,
            cancel_url: row.cancel_url,
            failure_reason: row.failure_reason,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl SessionStore for StoreSessionRepository {
    async fn count_session_held_participants(&self, schedule_id: Uuid, now: DateTime<Utc>) -> StoreResult<i64> {
        let held: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM((item->>'num_participants')::BIGINT), 0)::BIGINT
             FROM payment_sessions s, jsonb_array_elements(s.snapshot->'items') AS item
             WHERE s.status = 'PENDING'
               AND s.expires_at > $2
               AND (item->>'schedule_id')::UUID = $1",
        )
        .bind(schedule_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(held)
    }

    async fn insert_session(&self, session: &PaymentSession) -> StoreResult<()> {
        let snapshot = serde_json::to_value(SnapshotPayload::current(session.snapshot.clone()))?;
        sqlx::query(
            "INSERT INTO payment_sessions (id, token, user_id, user_email, provider, payment_method, checkout_type,
                 currency, total_cents, status, snapshot, external_id, payment_url, booking_ids, return_url,
                 cancel_url, failure_reason, expires_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)",
        )
        .bind(session.id)
        .bind(&session.token)
        .bind(&session.user_id)
        .bind(session.user_email.inner())
        .bind(&session.provider)
        .bind(&session.payment_method)
        .bind(session.mode.as_str())
        .bind(&session.currency)
        .bind(session.total_cents)
        .bind(session.status.as_str())
        .bind(snapshot)
        .bind(&session.external_id)
        .bind(&session.payment_url)
        .bind(&session.booking_ids)
        .bind(&session.return_url)
        .bind(&session.cancel_url)
        .bind(&session.failure_reason)
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> StoreResult<Option<PaymentSession>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM payment_sessions WHERE token = $1",
            SESSION_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentSession::try_from).transpose()
    }

    async fn find_by_external_id(&self, provider: &str, external_id: &str) -> StoreResult<Option<PaymentSession>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM payment_sessions WHERE provider = $1 AND external_id = $2",
            SESSION_COLUMNS
        ))
        .bind(provider)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentSession::try_from).transpose()
    }

    async fn attach_provider_reference(
        &self,
        session_id: Uuid,
        external_id: &str,
        payment_url: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE payment_sessions SET external_id = $2, payment_url = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(session_id)
        .bind(external_id)
        .bind(payment_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition(
        &self,
        session_id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
        reason: Option<&str>,
    ) -> StoreResult<bool> {
        if !from.can_transition_to(to) {
            return Ok(false);
        }
        let result = sqlx::query(
            "UPDATE payment_sessions
             SET status = $3, failure_reason = COALESCE($4, failure_reason), updated_at = NOW()
             WHERE id = $1 AND status = $2",
        )
        .bind(session_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_session(
        &self,
        session_id: Uuid,
        drafts: Vec<BookingDraft>,
        now: DateTime<Utc>,
    ) -> StoreResult<CompletionOutcome> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent confirmations of the same session.
        let locked: Option<(String, Vec<Uuid>)> =
            sqlx::query_as("SELECT status, booking_ids FROM payment_sessions WHERE id = $1 FOR UPDATE")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (status, booking_ids) = locked.ok_or_else(|| format!("session {} not found", session_id))?;
        let status = SessionStatus::parse(&status).ok_or_else(|| format!("unknown session status {}", status))?;

        match status {
            SessionStatus::Pending => {}
            SessionStatus::Completed => {
                tx.rollback().await?;
                return Ok(CompletionOutcome::AlreadyCompleted(booking_ids));
            }
            other => {
                tx.rollback().await?;
                return Ok(CompletionOutcome::NotPending(other));
            }
        }

        for draft in &drafts {
            insert_draft(&mut *tx, draft).await?;
        }

        let booking_ids: Vec<Uuid> = drafts.iter().map(|d| d.booking.id).collect();
        sqlx::query(
            "UPDATE payment_sessions SET status = 'COMPLETED', booking_ids = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(session_id)
        .bind(&booking_ids)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CompletionOutcome::Completed(booking_ids))
    }

    async fn expire_stale_sessions(&self, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        let expired: Vec<Uuid> = sqlx::query_scalar(
            "UPDATE payment_sessions SET status = 'EXPIRED', updated_at = $1
             WHERE status = 'PENDING' AND expires_at <= $1
             RETURNING id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(expired)
    }

    async fn list_pending_for_schedule(&self, schedule_id: Uuid) -> StoreResult<Vec<PaymentSession>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM payment_sessions s
             WHERE s.status = 'PENDING'
               AND EXISTS (
                   SELECT 1 FROM jsonb_array_elements(s.snapshot->'items') AS item
                   WHERE (item->>'schedule_id')::UUID = $1
               )",
            SESSION_COLUMNS
        ))
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PaymentSession::try_from).collect()
    }
}
