use serde::Deserialize;
use std::env;

use chauffeur_core::BusinessRules;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 { 5 }
fn default_acquire_timeout() -> u64 { 3 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_topic() -> String { "booking-notifications".to_string() }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Environment specific overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Untracked developer overrides
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `CHAUFFEUR__BUSINESS_RULES__UTC_OFFSET_MINUTES=-300`
            .add_source(config::Environment::with_prefix("CHAUFFEUR").separator("__"))
            .build()?;

        Self::from_config(s)
    }

    pub fn from_config(source: config::Config) -> Result<Self, config::ConfigError> {
        let config: Config = source.try_deserialize()?;
        config
            .business_rules
            .validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn parse(toml: &str) -> Result<Config, config::ConfigError> {
        let source = config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Config::from_config(source)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse(
            r#"
            [database]
            url = "postgres://localhost/chauffeur"
            [redis]
            url = "redis://localhost"
            [kafka]
            brokers = "localhost:9092"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.kafka.topic, "booking-notifications");
        assert_eq!(config.business_rules, BusinessRules::default());
    }

    #[test]
    fn test_business_rules_override() {
        let config = parse(
            r#"
            [database]
            url = "postgres://localhost/chauffeur"
            [redis]
            url = "redis://localhost"
            [kafka]
            brokers = "localhost:9092"
            [business_rules]
            reference_prefix = "NY"
            timezone = "America/New_York"
            pending_charge_window_hours = 6.0
            "#,
        )
        .unwrap();

        assert_eq!(config.business_rules.reference_prefix, "NY");
        assert_eq!(config.business_rules.timezone, "America/New_York");
        assert_eq!(config.business_rules.pending_charge_window_hours, 6.0);
        assert_eq!(config.business_rules.confirmed_charge_window_hours, 2.0);
    }

    #[test]
    fn test_invalid_rules_are_rejected() {
        let result = parse(
            r#"
            [database]
            url = "postgres://localhost/chauffeur"
            [redis]
            url = "redis://localhost"
            [kafka]
            brokers = "localhost:9092"
            [business_rules]
            reference_prefix = ""
            "#,
        );
        assert!(result.is_err());
    }
}
