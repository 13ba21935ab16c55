use async_trait::async_trait;
use redis::RedisResult;
use std::time::Duration;
use tracing::debug;
use trek_core::repository::{LockToken, ScheduleLock};
use trek_core::StoreResult;
use uuid::Uuid;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    /// `SET key holder NX EX ttl`; true when the lock was taken.
    pub async fn acquire_lock(&self, key: &str, holder: &str, ttl_seconds: u64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(holder)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    /// Deletes the lock only if `holder` still owns it.
    pub async fn release_lock(&self, key: &str, holder: &str) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#,
        );
        let deleted: i64 = script.key(key).arg(holder).invoke_async(&mut conn).await?;
        Ok(deleted == 1)
    }

    /// Fixed-window counter. The window starts with the first hit.
    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .cmd("EXPIRE")
            .arg(key)
            .arg(window_seconds)
            .arg("NX")
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count <= limit)
    }
}

pub fn schedule_lock_key(schedule_id: Uuid) -> String {
    format!("schedule:{}:lock", schedule_id)
}

/// Cross-process schedule lock. The TTL bounds how long a crashed holder can
/// keep a schedule blocked.
pub struct RedisScheduleLock {
    redis: RedisClient,
    ttl_seconds: u64,
    wait: Duration,
}

impl RedisScheduleLock {
    const RETRY_DELAY: Duration = Duration::from_millis(25);

    pub fn new(redis: RedisClient, ttl_seconds: u64, wait: Duration) -> Self {
        Self {
            redis,
            ttl_seconds: ttl_seconds.max(1),
            wait,
        }
    }
}

#[async_trait]
impl ScheduleLock for RedisScheduleLock {
    async fn acquire(&self, schedule_id: Uuid) -> StoreResult<LockToken> {
        let key = schedule_lock_key(schedule_id);
        let holder = Uuid::new_v4().to_string();
        let deadline = tokio::time::Instant::now() + self.wait;

        loop {
            if self.redis.acquire_lock(&key, &holder, self.ttl_seconds).await? {
                debug!(%schedule_id, "schedule lock acquired");
                return Ok(LockToken { schedule_id, holder });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(format!("schedule {} is busy", schedule_id).into());
            }
            tokio::time::sleep(Self::RETRY_DELAY).await;
        }
    }

    async fn release(&self, token: LockToken) -> StoreResult<()> {
        let key = schedule_lock_key(token.schedule_id);
        if !self.redis.release_lock(&key, &token.holder).await? {
            tracing::warn!(schedule_id = %token.schedule_id, "schedule lock expired before release");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_is_per_schedule() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(schedule_lock_key(a), format!("schedule:{}:lock", a));
        assert_ne!(schedule_lock_key(a), schedule_lock_key(b));
    }
}
