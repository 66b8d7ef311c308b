use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use chauffeur_core::BusinessRules;
use chauffeur_shared::{Booking, BookingStatus, ChargeClassification};

use crate::error::BookingError;

/// Result of evaluating the cancellation policy for one leg at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CancellationOutcome {
    pub allowed: bool,
    pub full_charge: bool,
    pub hours_until: f64,
}

impl CancellationOutcome {
    pub fn charge(&self) -> ChargeClassification {
        if self.full_charge {
            ChargeClassification::FullCharge
        } else {
            ChargeClassification::NoCharge
        }
    }
}

/// Time-threshold cancellation policy. Binary: either no charge or full charge.
#[derive(Debug, Clone)]
pub struct CancellationPolicy {
    timezone: Tz,
    confirmed_window_hours: f64,
    pending_window_hours: f64,
    customer_edit_cutoff_hours: f64,
}

impl CancellationPolicy {
    pub fn new(rules: &BusinessRules) -> Self {
        Self {
            timezone: rules.timezone(),
            confirmed_window_hours: rules.confirmed_charge_window_hours,
            pending_window_hours: rules.pending_charge_window_hours,
            customer_edit_cutoff_hours: rules.customer_edit_cutoff_hours,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Current date in the business timezone.
    pub fn business_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    /// Resolves a wall-clock pickup in the business timezone. During the
    /// autumn overlap the earlier instant wins; a time skipped by the spring
    /// clock change is rejected.
    pub fn resolve_local(&self, local: NaiveDateTime) -> Result<DateTime<Utc>, BookingError> {
        match self.timezone.from_local_datetime(&local) {
            LocalResult::Single(at) => Ok(at.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
            LocalResult::None => Err(BookingError::validation(
                "pick_up_time",
                format!("{} does not exist in {} (clock change)", local, self.timezone.name()),
            )),
        }
    }

    /// Pickup instant checked for existence; used whenever a pickup is set.
    pub fn checked_pickup_instant(&self, booking: &Booking) -> Result<DateTime<Utc>, BookingError> {
        self.resolve_local(booking.pick_up_at())
    }

    /// Pickup instant of a stored leg. Writes reject nonexistent local times,
    /// so a gap time here comes from rows written under another timezone
    /// setting; it is read with the offset in force before the jump.
    pub fn pickup_instant(&self, booking: &Booking) -> DateTime<Utc> {
        let local = booking.pick_up_at();
        self.resolve_local(local).unwrap_or_else(|_| {
            let offset = self.timezone.offset_from_utc_datetime(&local).fix();
            (local - chrono::Duration::seconds(i64::from(offset.local_minus_utc()))).and_utc()
        })
    }

    /// Hours from `now` until pickup, negative once pickup has passed.
    pub fn hours_until_pickup(&self, booking: &Booking, now: DateTime<Utc>) -> f64 {
        let remaining = self.pickup_instant(booking) - now;
        remaining.num_milliseconds() as f64 / 3_600_000.0
    }

    /// Length of the full-charge window for a status, `None` for terminal statuses.
    pub fn charge_window_hours(&self, status: BookingStatus) -> Option<f64> {
        if status.is_terminal() {
            return None;
        }
        match status {
            BookingStatus::Confirmed => Some(self.confirmed_window_hours),
            _ => Some(self.pending_window_hours),
        }
    }

    pub fn cancellation_outcome(&self, booking: &Booking, now: DateTime<Utc>) -> CancellationOutcome {
        let hours_until = self.hours_until_pickup(booking, now);
        match self.charge_window_hours(booking.status) {
            Some(window) => {
                let allowed = hours_until > 0.0;
                CancellationOutcome {
                    allowed,
                    full_charge: allowed && hours_until <= window,
                    hours_until,
                }
            }
            None => CancellationOutcome { allowed: false, full_charge: false, hours_until },
        }
    }

    /// Customers may edit only while pickup is further away than the cutoff.
    pub fn customer_may_edit(&self, booking: &Booking, now: DateTime<Utc>) -> bool {
        self.hours_until_pickup(booking, now) > self.customer_edit_cutoff_hours
    }
}

/// Renders hours as `Xd Yh Zm`, e.g. `5d 20h 30m`, `2h 30m`, `-1d 5h 15m`.
pub fn format_hours_until(hours: f64) -> String {
    let negative = hours < 0.0;
    let total_minutes = (hours.abs() * 60.0).trunc() as u64;
    let days = total_minutes / (60 * 24);
    let h = (total_minutes % (60 * 24)) / 60;
    let m = total_minutes % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if h > 0 || days > 0 {
        parts.push(format!("{h}h"));
    }
    if m > 0 || (days == 0 && h == 0) {
        parts.push(format!("{m}m"));
    }

    let formatted = parts.join(" ");
    if negative {
        format!("-{formatted}")
    } else {
        formatted
    }
}
