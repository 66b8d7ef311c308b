use chrono_tz::Tz;
use serde::Deserialize;
use std::time::Duration;

use crate::{CoreError, CoreResult};

/// Tunable business rules. Every field has a default so a partial
/// `[business_rules]` section (or none at all) is valid.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BusinessRules {
    #[serde(default = "default_reference_prefix")]
    pub reference_prefix: String,
    /// IANA name of the business timezone, e.g. `America/Chicago`. Pickup
    /// dates and times are wall-clock values in this zone.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_confirmed_window")]
    pub confirmed_charge_window_hours: f64,
    #[serde(default = "default_pending_window")]
    pub pending_charge_window_hours: f64,
    #[serde(default = "default_edit_cutoff")]
    pub customer_edit_cutoff_hours: f64,
    #[serde(default = "default_transaction_deadline")]
    pub transaction_deadline_ms: u64,
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_stats_ttl")]
    pub stats_ttl_seconds: u64,
    #[serde(default = "default_reference_attempts")]
    pub reference_attempts: u32,
}

fn default_reference_prefix() -> String { "M1".to_string() }
fn default_timezone() -> String { "UTC".to_string() }
fn default_confirmed_window() -> f64 { 2.0 }
fn default_pending_window() -> f64 { 4.0 }
fn default_edit_cutoff() -> f64 { 2.0 }
fn default_transaction_deadline() -> u64 { 5_000 }
fn default_lock_timeout() -> u64 { 2_000 }
fn default_stats_ttl() -> u64 { 300 }
fn default_reference_attempts() -> u32 { 10 }

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            reference_prefix: default_reference_prefix(),
            timezone: default_timezone(),
            confirmed_charge_window_hours: default_confirmed_window(),
            pending_charge_window_hours: default_pending_window(),
            customer_edit_cutoff_hours: default_edit_cutoff(),
            transaction_deadline_ms: default_transaction_deadline(),
            lock_timeout_ms: default_lock_timeout(),
            stats_ttl_seconds: default_stats_ttl(),
            reference_attempts: default_reference_attempts(),
        }
    }
}

impl BusinessRules {
    /// Resolved business timezone. An unknown name falls back to UTC;
    /// `validate` rejects it before the rules are used.
    pub fn timezone(&self) -> Tz {
        self.parse_timezone().unwrap_or(Tz::UTC)
    }

    fn parse_timezone(&self) -> CoreResult<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| CoreError::ValidationError(format!("unknown timezone {:?}: {}", self.timezone, e)))
    }

    pub fn transaction_deadline(&self) -> Duration {
        Duration::from_millis(self.transaction_deadline_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.reference_prefix.trim().is_empty() {
            return Err(CoreError::ValidationError("reference_prefix must not be empty".into()));
        }
        self.parse_timezone()?;
        for (name, hours) in [
            ("confirmed_charge_window_hours", self.confirmed_charge_window_hours),
            ("pending_charge_window_hours", self.pending_charge_window_hours),
            ("customer_edit_cutoff_hours", self.customer_edit_cutoff_hours),
        ] {
            if !hours.is_finite() || hours < 0.0 {
                return Err(CoreError::ValidationError(format!("{name} must be a non-negative number")));
            }
        }
        if self.transaction_deadline_ms == 0 || self.reference_attempts == 0 {
            return Err(CoreError::ValidationError(
                "transaction_deadline_ms and reference_attempts must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let rules = BusinessRules::default();
        assert!(rules.validate().is_ok());
        assert_eq!(rules.confirmed_charge_window_hours, 2.0);
        assert_eq!(rules.pending_charge_window_hours, 4.0);
        assert_eq!(rules.timezone(), Tz::UTC);
    }

    #[test]
    fn test_partial_rules_deserialize_with_defaults() {
        let rules: BusinessRules =
            serde_json::from_str(r#"{"timezone": "America/Chicago", "reference_prefix": "CH"}"#).unwrap();
        assert_eq!(rules.reference_prefix, "CH");
        assert_eq!(rules.timezone(), Tz::America__Chicago);
        assert_eq!(rules.stats_ttl_seconds, 300);
    }

    #[test]
    fn test_rejects_unknown_timezone() {
        let rules = BusinessRules { timezone: "Mars/Olympus_Mons".to_string(), ..BusinessRules::default() };
        assert!(rules.validate().is_err());
        let rules = BusinessRules { pending_charge_window_hours: -1.0, ..BusinessRules::default() };
        assert!(rules.validate().is_err());
    }
}
