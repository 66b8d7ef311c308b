use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{info, warn};
use serde_json::Value;

use chauffeur_core::BusinessRules;

use crate::app_config::DatabaseConfig;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    rule_key: String,
    rule_value: Value,
}

impl DbClient {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlays rules stored in the `business_rules` table on top of `defaults`.
    pub async fn fetch_business_rules(&self, defaults: BusinessRules) -> Result<BusinessRules, sqlx::Error> {
        let rows = sqlx::query_as::<_, RuleRow>("SELECT rule_key, rule_value FROM business_rules")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = defaults.clone();
        for row in rows {
            apply_rule(&mut rules, &row.rule_key, &row.rule_value);
        }

        if let Err(e) = rules.validate() {
            warn!("Stored business rules rejected, keeping configured values: {}", e);
            return Ok(defaults);
        }
        Ok(rules)
    }
}

/// Expected format of `rule_value`: `{"value": <number/string>}`.
fn apply_rule(rules: &mut BusinessRules, key: &str, value: &Value) {
    let Some(v) = value.get("value") else {
        return;
    };

    match key {
        "reference_prefix" => {
            if let Some(s) = v.as_str() {
                rules.reference_prefix = s.to_string();
            }
        }
        "timezone" => {
            if let Some(s) = v.as_str() {
                rules.timezone = s.to_string();
            }
        }
        "confirmed_charge_window_hours" => {
            if let Some(f) = v.as_f64() {
                rules.confirmed_charge_window_hours = f;
            }
        }
        "pending_charge_window_hours" => {
            if let Some(f) = v.as_f64() {
                rules.pending_charge_window_hours = f;
            }
        }
        "customer_edit_cutoff_hours" => {
            if let Some(f) = v.as_f64() {
                rules.customer_edit_cutoff_hours = f;
            }
        }
        "transaction_deadline_ms" => {
            if let Some(u) = v.as_u64() {
                rules.transaction_deadline_ms = u;
            }
        }
        "lock_timeout_ms" => {
            if let Some(u) = v.as_u64() {
                rules.lock_timeout_ms = u;
            }
        }
        "stats_ttl_seconds" => {
            if let Some(u) = v.as_u64() {
                rules.stats_ttl_seconds = u;
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
    fn test_apply_rule_overrides_known_keys() {
        let mut rules = BusinessRules::default();
        apply_rule(&mut rules, "pending_charge_window_hours", &json!({"value": 6.0}));
        apply_rule(&mut rules, "timezone", &json!({"value": "America/New_York"}));
        apply_rule(&mut rules, "reference_prefix", &json!({"value": "NY"}));

        assert_eq!(rules.pending_charge_window_hours, 6.0);
        assert_eq!(rules.timezone, "America/New_York");
        assert_eq!(rules.reference_prefix, "NY");
    }

    #[test]
    fn test_apply_rule_ignores_malformed_values() {
        let mut rules = BusinessRules::default();
        apply_rule(&mut rules, "lock_timeout_ms", &json!({"value": "soon"}));
        apply_rule(&mut rules, "lock_timeout_ms", &json!(2500));
        apply_rule(&mut rules, "pricing_multiplier", &json!({"value": 2.0}));

        assert_eq!(rules, BusinessRules::default());
    }
}
