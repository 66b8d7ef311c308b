use chrono::{DateTime, Utc};
use uuid::Uuid;

use chauffeur_core::ActorContext;
use chauffeur_shared::{Booking, BookingDiff, BookingHistory, BookingSnapshot, BookingStatus, HistoryAction};

/// Builds history entries. Entries are only constructed here; the service
/// persists them in the transaction that changes the booking.
pub struct AuditTrail;

impl AuditTrail {
    pub fn record(
        booking: &Booking,
        action: HistoryAction,
        actor: &ActorContext,
        changes: BookingDiff,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> BookingHistory {
        BookingHistory {
            id: Uuid::new_v4(),
            booking_id: booking.id,
            action,
            actor_id: actor.id.clone(),
            snapshot: BookingSnapshot::from(booking),
            changes,
            reason,
            ip_address: actor.ip_address,
            corrects: None,
            recorded_at: now,
        }
    }

    pub fn created(booking: &Booking, actor: &ActorContext, now: DateTime<Utc>) -> BookingHistory {
        let reason = if booking.is_return_leg {
            "Return trip created".to_string()
        } else {
            format!("Booking created as {}", booking.status)
        };
        Self::record(booking, HistoryAction::Created, actor, BookingDiff::default(), Some(reason), now)
    }

    /// Retracts or amends `original` with a new entry. The original is left as is.
    pub fn correction(
        original: &BookingHistory,
        current: Option<&Booking>,
        actor: &ActorContext,
        reason: String,
        now: DateTime<Utc>,
    ) -> BookingHistory {
        BookingHistory {
            id: Uuid::new_v4(),
            booking_id: original.booking_id,
            action: HistoryAction::Correction,
            actor_id: actor.id.clone(),
            snapshot: current.map(BookingSnapshot::from).unwrap_or_else(|| original.snapshot.clone()),
            changes: BookingDiff::default(),
            reason: Some(reason),
            ip_address: actor.ip_address,
            corrects: Some(original.id),
            recorded_at: now,
        }
    }

    pub fn action_for_status(status: BookingStatus) -> HistoryAction {
        if status.is_cancellation() {
            HistoryAction::Cancelled
        } else {
            HistoryAction::StatusChanged
        }
    }
}
