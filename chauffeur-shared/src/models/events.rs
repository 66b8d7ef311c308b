use chrono::{DateTime, Utc};

use super::booking::{Booking, BookingStatus};

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    New,
    Confirmed,
    Cancelled,
    StatusChanged,
}

impl NotificationKind {
    /// Event kind announcing that a leg reached `status`.
    pub fn for_status(status: BookingStatus) -> Self {
        match status {
            BookingStatus::Confirmed => NotificationKind::Confirmed,
            BookingStatus::Cancelled | BookingStatus::CancelledFullCharge => NotificationKind::Cancelled,
            _ => NotificationKind::StatusChanged,
        }
    }
}

/// Emitted after a booking mutation commits. A round-trip event carries both
/// legs so recipients get one message for the pair.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingNotification {
    pub kind: NotificationKind,
    pub booking: Booking,
    pub sibling: Option<Booking>,
    pub previous_status: Option<BookingStatus>,
    pub occurred_at: DateTime<Utc>,
}

impl BookingNotification {
    pub fn is_round_trip(&self) -> bool {
        self.sibling.is_some()
    }

    /// Partition key: the outbound reference, so both legs of a pair land on
    /// the same partition.
    pub fn key(&self) -> &str {
        match &self.sibling {
            Some(sibling) if self.booking.is_return_leg => &sibling.reference,
            _ => &self.booking.reference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_for_status() {
        assert_eq!(NotificationKind::for_status(BookingStatus::Confirmed), NotificationKind::Confirmed);
        assert_eq!(
            NotificationKind::for_status(BookingStatus::CancelledFullCharge),
            NotificationKind::Cancelled
        );
        assert_eq!(NotificationKind::for_status(BookingStatus::Pending), NotificationKind::StatusChanged);
        assert_eq!(
            NotificationKind::for_status(BookingStatus::TripNotCovered),
            NotificationKind::StatusChanged
        );
    }
}
