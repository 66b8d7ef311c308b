use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use chauffeur_core::{BookingRepository, DashboardStats, RepositoryError};
use chauffeur_shared::{Booking, BookingHistory, BookingStatus};

#[derive(Default)]
struct Tables {
    bookings: HashMap<Uuid, Booking>,
    history: Vec<BookingHistory>,
}

enum Staged {
    Upsert(Booking),
    Delete(Uuid),
}

/// Open transaction against [`InMemoryBookingRepository`]. Writes are staged
/// and only become visible to others on commit; dropping it discards them and
/// releases every row lock.
pub struct MemoryTx {
    held: HashMap<Uuid, OwnedMutexGuard<()>>,
    staged: Vec<Staged>,
    history: Vec<BookingHistory>,
}

/// Booking store kept in process memory, with per-row locks that behave like
/// `SELECT ... FOR UPDATE` including the lock timeout.
pub struct InMemoryBookingRepository {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    lock_timeout: Duration,
    fail_history: AtomicBool,
}

impl InMemoryBookingRepository {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            row_locks: Mutex::new(HashMap::new()),
            lock_timeout,
            fail_history: AtomicBool::new(false),
        }
    }

    /// Makes every history append fail until switched off again.
    pub fn fail_history_appends(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    pub fn booking_count(&self) -> usize {
        self.tables().bookings.len()
    }

    /// Every history entry across all bookings, in append order.
    pub fn all_history(&self) -> Vec<BookingHistory> {
        self.tables().history.clone()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    /// Drops lock entries no transaction holds or waits on.
    fn prune_row_locks(&self) {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of row lock entries currently tracked.
    pub fn tracked_row_locks(&self) -> usize {
        self.row_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn acquire(&self, tx: &mut MemoryTx, id: Uuid) -> Result<(), RepositoryError> {
        if tx.held.contains_key(&id) {
            return Ok(());
        }
        let lock = self.row_lock(id);
        match tokio::time::timeout(self.lock_timeout, lock.lock_owned()).await {
            Ok(guard) => {
                tx.held.insert(id, guard);
                Ok(())
            }
            Err(_) => Err(RepositoryError::LockUnavailable(id)),
        }
    }

    fn ensure_locked(tx: &MemoryTx, id: Uuid) -> Result<(), RepositoryError> {
        if tx.held.contains_key(&id) {
            Ok(())
        } else {
            Err(RepositoryError::NotLocked(id))
        }
    }

    /// Committed state overlaid with this transaction's staged writes.
    fn visible(&self, tx: &MemoryTx, id: Uuid) -> Option<Booking> {
        let mut current = self.tables().bookings.get(&id).cloned();
        for staged in &tx.staged {
            match staged {
                Staged::Upsert(booking) if booking.id == id => current = Some(booking.clone()),
                Staged::Delete(deleted) if *deleted == id => current = None,
                Staged::Delete(deleted) => {
                    if let Some(booking) = current.as_mut() {
                        if booking.linked_booking == Some(*deleted) {
                            booking.linked_booking = None;
                        }
                    }
                }
                Staged::Upsert(_) => {}
            }
        }
        current
    }

    fn apply_commit(&self, staged: Vec<Staged>, history: Vec<BookingHistory>) -> Result<(), RepositoryError> {
        let mut tables = self.tables();
        // Another transaction may have committed the same reference since insert.
        for write in &staged {
            if let Staged::Upsert(booking) = write {
                if Self::reference_taken(&tables, &[], &booking.reference, booking.id) {
                    return Err(RepositoryError::DuplicateReference(booking.reference.clone()));
                }
            }
        }

        for write in staged {
            match write {
                Staged::Upsert(booking) => {
                    tables.bookings.insert(booking.id, booking);
                }
                Staged::Delete(id) => {
                    tables.bookings.remove(&id);
                    for booking in tables.bookings.values_mut() {
                        if booking.linked_booking == Some(id) {
                            booking.linked_booking = None;
                        }
                    }
                }
            }
        }
        tables.history.extend(history);
        Ok(())
    }

    fn reference_taken(tables: &Tables, staged: &[Staged], reference: &str, except: Uuid) -> bool {
        tables.bookings.values().any(|b| b.id != except && b.reference == reference)
            || staged.iter().any(|s| matches!(s, Staged::Upsert(b) if b.id != except && b.reference == reference))
    }
}

impl Default for InMemoryBookingRepository {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000))
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<Self::Tx, RepositoryError> {
        Ok(MemoryTx { held: HashMap::new(), staged: Vec::new(), history: Vec::new() })
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), RepositoryError> {
        let MemoryTx { held, staged, history } = tx;
        let applied = self.apply_commit(staged, history);
        drop(held);
        self.prune_row_locks();
        applied
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), RepositoryError> {
        drop(tx);
        self.prune_row_locks();
        Ok(())
    }


    async fn read_booking(&self, tx: &mut Self::Tx, id: Uuid) -> Result<Option<Booking>, RepositoryError> {
        Ok(self.visible(tx, id))
    }

    async fn lock_booking(&self, tx: &mut Self::Tx, id: Uuid) -> Result<Option<Booking>, RepositoryError> {
        self.acquire(tx, id).await?;
        Ok(self.visible(tx, id))
    }

    async fn insert_booking(&self, tx: &mut Self::Tx, booking: &Booking) -> Result<(), RepositoryError> {
        if self.visible(tx, booking.id).is_some() {
            return Err(RepositoryError::Backend(format!("booking {} already exists", booking.id)));
        }
        let taken = Self::reference_taken(&self.tables(), &tx.staged, &booking.reference, booking.id);
        if taken {
            return Err(RepositoryError::DuplicateReference(booking.reference.clone()));
        }
        self.acquire(tx, booking.id).await?;
        tx.staged.push(Staged::Upsert(booking.clone()));
        Ok(())
    }

    async fn update_booking(&self, tx: &mut Self::Tx, booking: &Booking) -> Result<(), RepositoryError> {
        Self::ensure_locked(tx, booking.id)?;
        if self.visible(tx, booking.id).is_none() {
            return Err(RepositoryError::NotFound(booking.id));
        }
        tx.staged.push(Staged::Upsert(booking.clone()));
        Ok(())
    }

    async fn delete_booking(&self, tx: &mut Self::Tx, id: Uuid) -> Result<(), RepositoryError> {
        Self::ensure_locked(tx, id)?;
        if self.visible(tx, id).is_none() {
            return Err(RepositoryError::NotFound(id));
        }
        tx.staged.push(Staged::Delete(id));
        Ok(())
    }

    async fn append_history(&self, tx: &mut Self::Tx, entry: &BookingHistory) -> Result<(), RepositoryError> {
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(RepositoryError::Backend("history table unavailable".into()));
        }
        tx.history.push(entry.clone());
        Ok(())
    }

    async fn reference_exists(&self, tx: &mut Self::Tx, reference: &str) -> Result<bool, RepositoryError> {
        Ok(Self::reference_taken(&self.tables(), &tx.staged, reference, Uuid::nil()))
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, RepositoryError> {
        Ok(self.tables().bookings.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Booking>, RepositoryError> {
        Ok(self.tables().bookings.values().find(|b| b.reference == reference).cloned())
    }

    async fn history_for(&self, booking_id: Uuid) -> Result<Vec<BookingHistory>, RepositoryError> {
        let mut entries: Vec<BookingHistory> =
            self.tables().history.iter().filter(|h| h.booking_id == booking_id).cloned().collect();
        entries.sort_by_key(|h| h.recorded_at);
        Ok(entries)
    }

    async fn dashboard_stats(&self, today: NaiveDate) -> Result<DashboardStats, RepositoryError> {
        let tables = self.tables();
        let mut stats = DashboardStats::default();
        for booking in tables.bookings.values() {
            let active = !booking.status.is_terminal();
            stats.total += 1;
            if active {
                stats.active += 1;
            }
            match booking.status {
                BookingStatus::Pending => stats.pending += 1,
                BookingStatus::Confirmed => stats.confirmed += 1,
                BookingStatus::TripCompleted => stats.completed += 1,
                _ => {}
            }
            if booking.pick_up_date == today {
                stats.today += 1;
            }
            if booking.pick_up_date > today && active {
                stats.upcoming += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chauffeur_shared::{BookingDraft, TripType, VehicleType};
    use chrono::{NaiveTime, TimeZone, Utc};

    fn booking(reference: &str, status: BookingStatus) -> Booking {
        let draft = BookingDraft {
            owner_id: None,
            passenger_name: "Ada".to_string(),
            phone_number: "555-0100".to_string(),
            passenger_email: "ada@example.com".to_string(),
            pick_up_address: "1 Main St".to_string(),
            drop_off_address: Some("Terminal A".to_string()),
            pick_up_date: NaiveDate::from_ymd_opt(2030, 6, 2).unwrap(),
            pick_up_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            return_date: None,
            return_time: None,
            return_pickup_address: None,
            return_dropoff_address: None,
            return_flight_number: None,
            return_special_requests: None,
            vehicle_type: VehicleType::Sedan,
            trip_type: TripType::Point,
            hours_booked: None,
            number_of_passengers: 2,
            flight_number: None,
            notes: None,
        };
        let now = Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap();
        let mut booking = Booking::from_draft(&draft, "owner-1".to_string(), status, now);
        booking.reference = reference.to_string();
        booking
    }

    async fn seed(repo: &InMemoryBookingRepository, booking: &Booking) {
        let mut tx = repo.begin().await.unwrap();
        repo.insert_booking(&mut tx, booking).await.unwrap();
        repo.commit(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_writes_are_invisible_until_commit() {
        let repo = InMemoryBookingRepository::default();
        let leg = booking("M1-300601-AA", BookingStatus::Pending);

        let mut tx = repo.begin().await.unwrap();
        repo.insert_booking(&mut tx, &leg).await.unwrap();
        assert!(repo.read_booking(&mut tx, leg.id).await.unwrap().is_some());
        assert!(repo.get_booking(leg.id).await.unwrap().is_none());

        repo.rollback(tx).await.unwrap();
        assert_eq!(repo.booking_count(), 0);
    }

    #[tokio::test]
    async fn test_update_requires_row_lock() {
        let repo = InMemoryBookingRepository::default();
        let mut leg = booking("M1-300601-AA", BookingStatus::Pending);
        seed(&repo, &leg).await;

        let mut tx = repo.begin().await.unwrap();
        leg.status = BookingStatus::Confirmed;
        let err = repo.update_booking(&mut tx, &leg).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotLocked(id) if id == leg.id));

        repo.lock_booking(&mut tx, leg.id).await.unwrap();
        repo.update_booking(&mut tx, &leg).await.unwrap();
        repo.commit(tx).await.unwrap();

        let stored = repo.get_booking(leg.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_lock_wait_times_out() {
        let repo = InMemoryBookingRepository::new(Duration::from_millis(50));
        let leg = booking("M1-300601-AA", BookingStatus::Pending);
        seed(&repo, &leg).await;

        let mut holder = repo.begin().await.unwrap();
        repo.lock_booking(&mut holder, leg.id).await.unwrap();

        let mut waiter = repo.begin().await.unwrap();
        let err = repo.lock_booking(&mut waiter, leg.id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::LockUnavailable(id) if id == leg.id));

        repo.commit(holder).await.unwrap();
        assert!(repo.lock_booking(&mut waiter, leg.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_row_locks_are_released_after_commit_and_rollback() {
        let repo = InMemoryBookingRepository::default();
        let first = booking("M1-300601-AA", BookingStatus::Pending);
        let second = booking("M1-300601-AB", BookingStatus::Pending);
        seed(&repo, &first).await;
        seed(&repo, &second).await;

        let mut tx = repo.begin().await.unwrap();
        repo.lock_booking(&mut tx, first.id).await.unwrap();
        repo.lock_booking(&mut tx, second.id).await.unwrap();
        assert_eq!(repo.tracked_row_locks(), 2);
        repo.commit(tx).await.unwrap();
        assert_eq!(repo.tracked_row_locks(), 0);

        let mut holder = repo.begin().await.unwrap();
        repo.lock_booking(&mut holder, first.id).await.unwrap();
        let mut other = repo.begin().await.unwrap();
        repo.lock_booking(&mut other, second.id).await.unwrap();
        repo.rollback(other).await.unwrap();
        assert_eq!(repo.tracked_row_locks(), 1);
        repo.rollback(holder).await.unwrap();
        assert_eq!(repo.tracked_row_locks(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let repo = InMemoryBookingRepository::default();
        seed(&repo, &booking("M1-300601-AA", BookingStatus::Pending)).await;

        let mut tx = repo.begin().await.unwrap();
        assert!(repo.reference_exists(&mut tx, "M1-300601-AA").await.unwrap());
        let err = repo
            .insert_booking(&mut tx, &booking("M1-300601-AA", BookingStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::DuplicateReference(r) if r == "M1-300601-AA"));
    }

    #[tokio::test]
    async fn test_delete_clears_sibling_link() {
        let repo = InMemoryBookingRepository::default();
        let mut outbound = booking("M1-300601-OB", BookingStatus::Confirmed);
        let mut return_leg = booking("M1-300601-RT", BookingStatus::Confirmed);
        outbound.linked_booking = Some(return_leg.id);
        return_leg.linked_booking = Some(outbound.id);
        return_leg.is_return_leg = true;
        seed(&repo, &outbound).await;
        seed(&repo, &return_leg).await;

        let mut tx = repo.begin().await.unwrap();
        repo.lock_booking(&mut tx, return_leg.id).await.unwrap();
        repo.delete_booking(&mut tx, return_leg.id).await.unwrap();
        let seen = repo.read_booking(&mut tx, outbound.id).await.unwrap().unwrap();
        assert_eq!(seen.linked_booking, None);
        repo.commit(tx).await.unwrap();

        assert!(repo.get_booking(return_leg.id).await.unwrap().is_none());
        let kept = repo.get_booking(outbound.id).await.unwrap().unwrap();
        assert_eq!(kept.linked_booking, None);
    }

    #[tokio::test]
    async fn test_dashboard_counts() {
        let repo = InMemoryBookingRepository::default();
        seed(&repo, &booking("M1-300601-AA", BookingStatus::Pending)).await;
        seed(&repo, &booking("M1-300601-BB", BookingStatus::Confirmed)).await;
        seed(&repo, &booking("M1-300601-CC", BookingStatus::TripCompleted)).await;

        let today = NaiveDate::from_ymd_opt(2030, 6, 1).unwrap();
        let stats = repo.dashboard_stats(today).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.confirmed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.today, 0);
        assert_eq!(stats.upcoming, 2);

        let pickup_day = repo.dashboard_stats(today.succ_opt().unwrap()).await.unwrap();
        assert_eq!(pickup_day.today, 3);
        assert_eq!(pickup_day.upcoming, 0);
    }
}
