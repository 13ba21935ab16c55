use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use trek_core::access::BookingScope;
use trek_core::booking::{Booking, BookingDraft, BookingStatus, Participant, ParticipantData};
use trek_core::repository::BookingStore;
use trek_core::StoreResult;
use trek_shared::Masked;
use uuid::Uuid;

pub struct StoreBookingRepository {
    pool: PgPool,
}

impl StoreBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, rows: Vec<BookingRow>) -> StoreResult<Vec<Booking>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let participants = sqlx::query_as::<_, ParticipantRow>(
            "SELECT id, booking_id, position, full_name, email, document_id, nationality
             FROM participants WHERE booking_id = ANY($1) ORDER BY position",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_booking: HashMap<Uuid, Vec<Participant>> = HashMap::new();
        for p in participants {
            by_booking.entry(p.booking_id).or_default().push(p.into());
        }

        rows.into_iter()
            .map(|row| {
                let participants = by_booking.remove(&row.id).unwrap_or_default();
                row.into_booking(participants)
            })
            .collect()
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    schedule_id: Uuid,
    session_id: Option<Uuid>,
    user_id: Option<String>,
    user_email: String,
    status: String,
    num_participants: i32,
    price_per_person_cents: i64,
    total_cents: i64,
    currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BookingRow {
    fn into_booking(self, participants: Vec<Participant>) -> StoreResult<Booking> {
        let status = BookingStatus::parse(&self.status)
            .ok_or_else(|| format!("unknown booking status {}", self.status))?;
        Ok(Booking {
            id: self.id,
            schedule_id: self.schedule_id,
            session_id: self.session_id,
            user_id: self.user_id,
            user_email: Masked::new(self.user_email),
            status,
            participants,
            num_participants: self.num_participants.max(0) as u32,
            price_per_person_cents: self.price_per_person_cents,
            total_cents: self.total_cents,
            currency: self.currency,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ParticipantRow {
    id: Uuid,
    booking_id: Uuid,
    position: i32,
    full_name: String,
    email: Option<String>,
    document_id: Option<String>,
    nationality: Option<String>,
}

impl From<ParticipantRow> for Participant {
    fn from(row: ParticipantRow) -> Self {
        Participant {
            id: row.id,
            booking_id: row.booking_id,
            position: row.position.max(0) as u32,
            data: ParticipantData {
                full_name: row.full_name,
                email: row.email.map(Masked::new),
                document_id: row.document_id.map(Masked::new),
                nationality: row.nationality,
            },
        }
    }
}

const BOOKING_COLUMNS: &str = "b.id, b.schedule_id, b.session_id, b.user_id, b.user_email, b.status, \
     b.num_participants, b.price_per_person_cents, b.total_cents, b.currency, b.created_at, b.updated_at";

/// Writes a booking, its participants and its payment on an open connection
/// (normally the session-completion transaction).
pub(crate) async fn insert_draft(conn: &mut PgConnection, draft: &BookingDraft) -> Result<(), sqlx::Error> {
    let booking = &draft.booking;
    sqlx::query(
        "INSERT INTO bookings (id, schedule_id, session_id, user_id, user_email, status, num_participants,
                               price_per_person_cents, total_cents, currency, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(booking.id)
    .bind(booking.schedule_id)
    .bind(booking.session_id)
    .bind(&booking.user_id)
    .bind(booking.user_email.inner())
    .bind(booking.status.as_str())
    .bind(booking.num_participants as i32)
    .bind(booking.price_per_person_cents)
    .bind(booking.total_cents)
    .bind(&booking.currency)
    .bind(booking.created_at)
    .bind(booking.updated_at)
    .execute(&mut *conn)
    .await?;

    for participant in &booking.participants {
        sqlx::query(
            "INSERT INTO participants (id, booking_id, position, full_name, email, document_id, nationality)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(participant.id)
        .bind(participant.booking_id)
        .bind(participant.position as i32)
        .bind(&participant.data.full_name)
        .bind(participant.data.email.as_ref().map(|e| e.inner().clone()))
        .bind(participant.data.document_id.as_ref().map(|d| d.inner().clone()))
        .bind(&participant.data.nationality)
        .execute(&mut *conn)
        .await?;
    }

    if let Some(payment) = &draft.payment {
        sqlx::query(
            "INSERT INTO payments (id, booking_id, provider, external_id, amount_cents, currency, status,
                                   refunded_cents, provider_refund_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(payment.id)
        .bind(payment.booking_id)
        .bind(&payment.provider)
        .bind(&payment.external_id)
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(payment.refunded_cents)
        .bind(&payment.provider_refund_id)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl BookingStore for StoreBookingRepository {
    async fn count_booked_participants(&self, schedule_id: Uuid) -> StoreResult<i64> {
        let booked: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(num_participants), 0)::BIGINT
             FROM bookings WHERE schedule_id = $1 AND status <> 'CANCELLED'",
        )
        .bind(schedule_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(booked)
    }

    async fn list_bookings_for_schedule(&self, schedule_id: Uuid) -> StoreResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings b WHERE b.schedule_id = $1 ORDER BY b.created_at, b.id",
            BOOKING_COLUMNS
        ))
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn list_bookings_for_session(&self, session_id: Uuid) -> StoreResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings b WHERE b.session_id = $1 ORDER BY b.created_at, b.id",
            BOOKING_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn list_bookings(&self, scope: &BookingScope) -> StoreResult<Vec<Booking>> {
        let rows = match scope {
            BookingScope::All => {
                sqlx::query_as::<_, BookingRow>(&format!(
                    "SELECT {} FROM bookings b ORDER BY b.created_at DESC LIMIT 500",
                    BOOKING_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
            BookingScope::Partner(partner_id) => {
                sqlx::query_as::<_, BookingRow>(&format!(
                    "SELECT {} FROM bookings b JOIN schedules s ON s.id = b.schedule_id
                     WHERE s.partner_id = $1 ORDER BY b.created_at DESC LIMIT 500",
                    BOOKING_COLUMNS
                ))
                .bind(partner_id)
                .fetch_all(&self.pool)
                .await?
            }
            BookingScope::User(user_id) => {
                sqlx::query_as::<_, BookingRow>(&format!(
                    "SELECT {} FROM bookings b WHERE b.user_id = $1 ORDER BY b.created_at DESC LIMIT 500",
                    BOOKING_COLUMNS
                ))
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
            BookingScope::Nothing => return Ok(Vec::new()),
        };
        self.hydrate(rows).await
    }

    async fn cancel_booking(&self, booking_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("UPDATE bookings SET status = 'CANCELLED', updated_at = NOW() WHERE id = $1")
            .bind(booking_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(format!("booking {} not found", booking_id).into());
        }
        Ok(())
    }
}
