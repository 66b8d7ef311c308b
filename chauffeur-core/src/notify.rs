use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};

use chauffeur_shared::{BookingNotification, Masked};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
    #[error("notification payload could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Outbound notification boundary. Called after commit; a failure is
/// reported to the caller's logs and never undoes the booking change.
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn notify(&self, event: &BookingNotification) -> Result<(), NotifyError>;
}

/// Writes events to the log instead of delivering them.
pub struct LoggingNotifier;

#[async_trait]
impl NotificationPort for LoggingNotifier {
    async fn notify(&self, event: &BookingNotification) -> Result<(), NotifyError> {
        tracing::info!(
            kind = ?event.kind,
            reference = %event.booking.reference,
            status = %event.booking.status,
            round_trip = event.is_round_trip(),
            passenger = %Masked(&event.booking.passenger_email),
            "Booking notification"
        );
        Ok(())
    }
}

/// Keeps every event in memory. Can be switched to fail delivery.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<BookingNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.set_failing(true);
        notifier
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<BookingNotification> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[async_trait]
impl NotificationPort for RecordingNotifier {
    async fn notify(&self, event: &BookingNotification) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("recording notifier set to fail".into()));
        }
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
        Ok(())
    }
}
