use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use trek_core::repository::ScheduleStore;
use trek_core::schedule::{Schedule, ScheduleStatus};
use trek_core::StoreResult;
use uuid::Uuid;

pub struct StoreScheduleRepository {
    pool: PgPool,
}

impl StoreScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: Uuid,
    tour_id: Uuid,
    partner_id: Option<String>,
    title: String,
    start_time: DateTime<Utc>,
    max_participants: i32,
    status: String,
}

impl TryFrom<ScheduleRow> for Schedule {
    type Error = String;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        Ok(Schedule {
            id: row.id,
            tour_id: row.tour_id,
            partner_id: row.partner_id,
            title: row.title,
            start_time: row.start_time,
            max_participants: row.max_participants.max(0) as u32,
            status: ScheduleStatus::parse(&row.status)
                .ok_or_else(|| format!("unknown schedule status {}", row.status))?,
        })
    }
}

#[async_trait]
impl ScheduleStore for StoreScheduleRepository {
    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
        let row = sqlx::query_as::<_, ScheduleRow>(
            "SELECT id, tour_id, partner_id, title, start_time, max_participants, status
             FROM schedules WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Schedule::try_from).transpose()?)
    }

    async fn update_schedule_status(&self, id: Uuid, status: ScheduleStatus) -> StoreResult<()> {
        let result = sqlx::query("UPDATE schedules SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(format!("schedule {} not found", id).into());
        }
        Ok(())
    }
}
