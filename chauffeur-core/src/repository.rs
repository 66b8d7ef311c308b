use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use chauffeur_shared::{Booking, BookingHistory};

use crate::cache::DashboardStats;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("booking not found: {0}")]
    NotFound(Uuid),

    /// The row lock could not be taken within the configured lock timeout, or
    /// the backend aborted the wait to break a deadlock.
    #[error("lock unavailable for booking {0}")]
    LockUnavailable(Uuid),

    #[error("booking reference already in use: {0}")]
    DuplicateReference(String),

    /// Writes to an existing row require the row lock of the same transaction.
    #[error("booking {0} was written without holding its row lock")]
    NotLocked(Uuid),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Transactional booking storage.
///
/// All writes happen inside a transaction handle obtained from `begin` and are
/// made durable by `commit`. A handle dropped without commit MUST roll back and
/// release its row locks.
///
/// `lock_booking` has `SELECT ... FOR UPDATE` semantics: the row stays locked
/// until the transaction ends. A wait longer than the backend's lock timeout
/// fails with `RepositoryError::LockUnavailable`. Callers locking two rows do so
/// in ascending id order.
///
/// History is append-only; there is no way to update or delete an entry.
#[async_trait]
pub trait BookingRepository: Send + Sync + 'static {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, RepositoryError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), RepositoryError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), RepositoryError>;

    /// Plain read inside the transaction, no lock taken.
    async fn read_booking(&self, tx: &mut Self::Tx, id: Uuid) -> Result<Option<Booking>, RepositoryError>;

    /// Read and lock a row until the transaction ends.
    async fn lock_booking(&self, tx: &mut Self::Tx, id: Uuid) -> Result<Option<Booking>, RepositoryError>;

    async fn insert_booking(&self, tx: &mut Self::Tx, booking: &Booking) -> Result<(), RepositoryError>;

    async fn update_booking(&self, tx: &mut Self::Tx, booking: &Booking) -> Result<(), RepositoryError>;

    /// Removes a leg. A sibling pointing at it keeps existing with its link cleared.
    async fn delete_booking(&self, tx: &mut Self::Tx, id: Uuid) -> Result<(), RepositoryError>;

    async fn append_history(&self, tx: &mut Self::Tx, entry: &BookingHistory) -> Result<(), RepositoryError>;

    async fn reference_exists(&self, tx: &mut Self::Tx, reference: &str) -> Result<bool, RepositoryError>;

    // ── Reads outside a transaction ──────────────────────────────────────────

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, RepositoryError>;

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Booking>, RepositoryError>;

    /// History of one booking, oldest first. Survives deletion of the booking.
    async fn history_for(&self, booking_id: Uuid) -> Result<Vec<BookingHistory>, RepositoryError>;

    /// Counters for the dashboard; `today` is the current business date.
    async fn dashboard_stats(&self, today: NaiveDate) -> Result<DashboardStats, RepositoryError>;
}
