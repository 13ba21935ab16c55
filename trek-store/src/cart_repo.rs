use async_trait::async_trait;
use sqlx::PgPool;
use trek_core::repository::CartStore;
use trek_core::schedule::HoldExclusion;
use trek_core::StoreResult;
use uuid::Uuid;

/// Read side of the cart tables; carts themselves are written elsewhere.
pub struct StoreCartRepository {
    pool: PgPool,
}

impl StoreCartRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartStore for StoreCartRepository {
    async fn count_held_participants(&self, schedule_id: Uuid, exclusion: &HoldExclusion) -> StoreResult<i64> {
        let (excluded_cart, excluded_user) = match exclusion {
            HoldExclusion::None => (None, None),
            HoldExclusion::Cart(cart_id) => (Some(*cart_id), None),
            HoldExclusion::User(user_id) => (None, Some(user_id.as_str())),
        };

        let held: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(ci.num_participants), 0)::BIGINT
             FROM cart_items ci
             JOIN carts c ON c.id = ci.cart_id
             WHERE ci.schedule_id = $1
               AND ($2::UUID IS NULL OR ci.cart_id <> $2)
               AND ($3::TEXT IS NULL OR c.user_id IS DISTINCT FROM $3)",
        )
        .bind(schedule_id)
        .bind(excluded_cart)
        .bind(excluded_user)
        .fetch_one(&self.pool)
        .await?;

        Ok(held)
    }
}
