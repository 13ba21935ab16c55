use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;
use trek_core::policy::CheckoutPolicy;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Operational overrides from the `business_rules` table, on top of the
    /// file/env configuration.
    pub async fn fetch_checkout_policy(&self, defaults: CheckoutPolicy) -> Result<CheckoutPolicy, sqlx::Error> {
        let rows: Vec<(String, Value)> = sqlx::query_as("SELECT rule_key, rule_value FROM business_rules")
            .fetch_all(&self.pool)
            .await?;

        let mut policy = defaults.clone();
        for (key, value) in rows {
            // Expected format: {"value": <number/bool>}
            if let Some(v) = value.get("value") {
                apply_rule(&mut policy, &key, v);
            }
        }

        if let Err(msg) = policy.validate() {
            tracing::warn!("ignoring business_rules overrides: {}", msg);
            return Ok(defaults);
        }
        Ok(policy)
    }
}

pub fn apply_rule(policy: &mut CheckoutPolicy, key: &str, v: &Value) {
    match key {
        "session_ttl_seconds" => {
            if let Some(u) = v.as_u64() {
                policy.session_ttl_seconds = u;
            }
        }
        "booking_cutoff_minutes" => {
            if let Some(u) = v.as_u64() {
                policy.booking_cutoff_minutes = u;
            }
        }
        "retention_percentage" => {
            if let Some(f) = v.as_f64() {
                policy.retention_percentage = f;
            }
        }
        "sweep_interval_seconds" => {
            if let Some(u) = v.as_u64() {
                policy.sweep_interval_seconds = u;
            }
        }
        "schedule_lock_ttl_seconds" => {
            if let Some(u) = v.as_u64() {
                policy.schedule_lock_ttl_seconds = u;
            }
        }
        "schedule_lock_wait_ms" => {
            if let Some(u) = v.as_u64() {
                policy.schedule_lock_wait_ms = u;
            }
        }
        "mock_payments_enabled" => {
            if let Some(b) = v.as_bool() {
                policy.mock_payments_enabled = b;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_rule() {
        let mut policy = CheckoutPolicy::default();
        apply_rule(&mut policy, "retention_percentage", &json!(0.2));
        apply_rule(&mut policy, "session_ttl_seconds", &json!(900));
        apply_rule(&mut policy, "mock_payments_enabled", &json!(true));
        apply_rule(&mut policy, "schedule_lock_ttl_seconds", &json!(30));
        apply_rule(&mut policy, "schedule_lock_wait_ms", &json!(500));
        apply_rule(&mut policy, "schedule_lock_wait_ms", &json!(-5));
        // Wrong type and unknown keys are ignored.
        apply_rule(&mut policy, "booking_cutoff_minutes", &json!("soon"));
        apply_rule(&mut policy, "tax_rate", &json!(0.3));

        assert_eq!(policy.retention_percentage, 0.2);
        assert_eq!(policy.session_ttl_seconds, 900);
        assert!(policy.mock_payments_enabled);
        assert_eq!(policy.booking_cutoff_minutes, 120);
        assert_eq!(policy.schedule_lock_ttl_seconds, 30);
        assert_eq!(policy.lock_wait(), Duration::from_millis(500));
    }
}
