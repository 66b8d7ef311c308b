use chrono::NaiveDateTime;
use std::time::Duration;
use uuid::Uuid;

use chauffeur_core::RepositoryError;
use chauffeur_shared::BookingStatus;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Booking {booking_id}: a cancellation reason is required")]
    MissingCancellationReason { booking_id: Uuid },

    #[error("Booking {booking_id}: pickup time has passed ({hours_until:.1}h), it can no longer be cancelled")]
    PastPickupCancellation { booking_id: Uuid, hours_until: f64 },

    #[error("Booking {booking_id} is {status} and can no longer be edited")]
    TerminalStateEditAttempt {
        booking_id: Uuid,
        status: BookingStatus,
    },

    #[error("Booking {booking_id} was modified concurrently, retry the operation")]
    ConcurrentModification { booking_id: Uuid },

    #[error("Booking not found: {0}")]
    NotFound(Uuid),

    #[error("History entry not found: {0}")]
    HistoryEntryNotFound(Uuid),

    #[error("Pickup {pick_up} is in the past")]
    PastPickupBooking { pick_up: NaiveDateTime },

    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Booking {booking_id} belongs to another account")]
    NotBookingOwner { booking_id: Uuid },

    #[error("Booking {booking_id} can no longer be edited online ({hours_until:.1}h before pickup)")]
    EditWindowClosed { booking_id: Uuid, hours_until: f64 },

    #[error("{action} requires a privileged actor")]
    PrivilegeRequired { action: &'static str },

    #[error("Booking {0} is not part of a round trip")]
    NotRoundTrip(Uuid),

    #[error("Booking operation exceeded its {0:?} deadline and was rolled back")]
    Timeout(Duration),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl BookingError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        BookingError::Validation { field, message: message.into() }
    }

    /// Maps a failure to take a row lock onto the caller-facing conflict.
    pub(crate) fn from_lock(err: RepositoryError, booking_id: Uuid) -> Self {
        match err {
            RepositoryError::LockUnavailable(_) => BookingError::ConcurrentModification { booking_id },
            other => BookingError::Repository(other),
        }
    }

    /// Whether the caller may simply retry. The engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::ConcurrentModification { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_names_both_states() {
        let err = BookingError::InvalidTransition {
            from: BookingStatus::Cancelled,
            to: BookingStatus::Confirmed,
        };
        assert_eq!(err.to_string(), "Invalid status transition from Cancelled to Confirmed");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_lock_failures_become_retryable_conflicts() {
        let id = Uuid::new_v4();
        let err = BookingError::from_lock(RepositoryError::LockUnavailable(id), id);
        assert!(matches!(err, BookingError::ConcurrentModification { booking_id } if booking_id == id));
        assert!(err.is_retryable());

        let err = BookingError::from_lock(RepositoryError::Backend("down".into()), id);
        assert!(matches!(err, BookingError::Repository(_)));
    }
}
