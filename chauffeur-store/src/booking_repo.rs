use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

use chauffeur_core::{BookingRepository, DashboardStats, RepositoryError};
use chauffeur_shared::{Booking, BookingDiff, BookingHistory, BookingSnapshot, ChargeClassification};

const BOOKING_COLUMNS: &str = "id, reference, owner_id, passenger_name, phone_number, passenger_email, \
    pick_up_address, drop_off_address, pick_up_date, pick_up_time, return_date, return_time, \
    return_pickup_address, return_dropoff_address, return_flight_number, return_special_requests, \
    vehicle_type, trip_type, hours_booked, number_of_passengers, flight_number, notes, status, \
    admin_reviewed, admin_comment, cancellation_reason, charge, is_return_leg, linked_booking, \
    created_at, updated_at";

const HISTORY_COLUMNS: &str = "id, booking_id, action, actor_id, snapshot, changes, reason, ip_address, \
    corrects, recorded_at";

const LOCK_NOT_AVAILABLE: &str = "55P03";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL booking store. Row locks are `SELECT ... FOR UPDATE` bounded by
/// a per-transaction `lock_timeout`.
pub struct PgBookingRepository {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    reference: String,
    owner_id: String,
    passenger_name: String,
    phone_number: String,
    passenger_email: String,
    pick_up_address: String,
    drop_off_address: Option<String>,
    pick_up_date: NaiveDate,
    pick_up_time: NaiveTime,
    return_date: Option<NaiveDate>,
    return_time: Option<NaiveTime>,
    return_pickup_address: Option<String>,
    return_dropoff_address: Option<String>,
    return_flight_number: Option<String>,
    return_special_requests: Option<String>,
    vehicle_type: String,
    trip_type: String,
    hours_booked: Option<i32>,
    number_of_passengers: i32,
    flight_number: Option<String>,
    notes: Option<String>,
    status: String,
    admin_reviewed: bool,
    admin_comment: Option<String>,
    cancellation_reason: Option<String>,
    charge: Option<String>,
    is_return_leg: bool,
    linked_booking: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = RepositoryError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            reference: row.reference,
            owner_id: row.owner_id,
            passenger_name: row.passenger_name,
            phone_number: row.phone_number,
            passenger_email: row.passenger_email,
            pick_up_address: row.pick_up_address,
            drop_off_address: row.drop_off_address,
            pick_up_date: row.pick_up_date,
            pick_up_time: row.pick_up_time,
            return_date: row.return_date,
            return_time: row.return_time,
            return_pickup_address: row.return_pickup_address,
            return_dropoff_address: row.return_dropoff_address,
            return_flight_number: row.return_flight_number,
            return_special_requests: row.return_special_requests,
            vehicle_type: row.vehicle_type.parse().map_err(backend)?,
            trip_type: row.trip_type.parse().map_err(backend)?,
            hours_booked: row.hours_booked.map(from_db_count).transpose()?,
            number_of_passengers: from_db_count(row.number_of_passengers)?,
            flight_number: row.flight_number,
            notes: row.notes,
            status: row.status.parse().map_err(backend)?,
            admin_reviewed: row.admin_reviewed,
            admin_comment: row.admin_comment,
            cancellation_reason: row.cancellation_reason,
            charge: row.charge.map(|c| c.parse::<ChargeClassification>()).transpose().map_err(backend)?,
            is_return_leg: row.is_return_leg,
            linked_booking: row.linked_booking,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    booking_id: Uuid,
    action: String,
    actor_id: String,
    snapshot: Json<BookingSnapshot>,
    changes: Json<BookingDiff>,
    reason: Option<String>,
    ip_address: Option<String>,
    corrects: Option<Uuid>,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for BookingHistory {
    type Error = RepositoryError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(BookingHistory {
            id: row.id,
            booking_id: row.booking_id,
            action: row.action.parse().map_err(backend)?,
            actor_id: row.actor_id,
            snapshot: row.snapshot.0,
            changes: row.changes.0,
            reason: row.reason,
            // Unparseable addresses are dropped rather than failing the whole listing.
            ip_address: row.ip_address.and_then(|ip| ip.parse().ok()),
            corrects: row.corrects,
            recorded_at: row.recorded_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    total: i64,
    active: i64,
    pending: i64,
    confirmed: i64,
    today: i64,
    upcoming: i64,
    completed: i64,
}

fn backend(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Backend(e.to_string())
}

fn from_db_count(value: i32) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Backend(format!("negative count {value}")))
}

fn to_db_count(value: u32) -> Result<i32, RepositoryError> {
    i32::try_from(value).map_err(|_| RepositoryError::Backend(format!("count {value} out of range")))
}

fn db_code(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

fn lock_error(e: sqlx::Error, id: Uuid) -> RepositoryError {
    match db_code(&e).as_deref() {
        Some(LOCK_NOT_AVAILABLE) | Some(DEADLOCK_DETECTED) => RepositoryError::LockUnavailable(id),
        _ => backend(e),
    }
}

fn write_error(e: sqlx::Error, booking: &Booking) -> RepositoryError {
    match db_code(&e).as_deref() {
        Some(UNIQUE_VIOLATION) => RepositoryError::DuplicateReference(booking.reference.clone()),
        Some(LOCK_NOT_AVAILABLE) | Some(DEADLOCK_DETECTED) => RepositoryError::LockUnavailable(booking.id),
        _ => backend(e),
    }
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        // SET does not take bind parameters.
        let sql = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&sql).execute(&mut *tx).await.map_err(backend)?;
        Ok(tx)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), RepositoryError> {
        tx.commit().await.map_err(backend)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), RepositoryError> {
        tx.rollback().await.map_err(backend)
    }

    async fn read_booking(&self, tx: &mut Self::Tx, id: Uuid) -> Result<Option<Booking>, RepositoryError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(backend)?;
        row.map(Booking::try_from).transpose()
    }

    async fn lock_booking(&self, tx: &mut Self::Tx, id: Uuid) -> Result<Option<Booking>, RepositoryError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| lock_error(e, id))?;
        row.map(Booking::try_from).transpose()
    }

    async fn insert_booking(&self, tx: &mut Self::Tx, booking: &Booking) -> Result<(), RepositoryError> {
        let sql = format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
              $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31)"
        );
        sqlx::query(&sql)
            .bind(booking.id)
            .bind(&booking.reference)
            .bind(&booking.owner_id)
            .bind(&booking.passenger_name)
            .bind(&booking.phone_number)
            .bind(&booking.passenger_email)
            .bind(&booking.pick_up_address)
            .bind(&booking.drop_off_address)
            .bind(booking.pick_up_date)
            .bind(booking.pick_up_time)
            .bind(booking.return_date)
            .bind(booking.return_time)
            .bind(&booking.return_pickup_address)
            .bind(&booking.return_dropoff_address)
            .bind(&booking.return_flight_number)
            .bind(&booking.return_special_requests)
            .bind(booking.vehicle_type.as_str())
            .bind(booking.trip_type.as_str())
            .bind(booking.hours_booked.map(to_db_count).transpose()?)
            .bind(to_db_count(booking.number_of_passengers)?)
            .bind(&booking.flight_number)
            .bind(&booking.notes)
            .bind(booking.status.as_str())
            .bind(booking.admin_reviewed)
            .bind(&booking.admin_comment)
            .bind(&booking.cancellation_reason)
            .bind(booking.charge.map(|c| c.as_str()))
            .bind(booking.is_return_leg)
            .bind(booking.linked_booking)
            .bind(booking.created_at)
            .bind(booking.updated_at)
            .execute(&mut **tx)
            .await
            .map_err(|e| write_error(e, booking))?;
        Ok(())
    }

    async fn update_booking(&self, tx: &mut Self::Tx, booking: &Booking) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE bookings SET \
                owner_id = $2, passenger_name = $3, phone_number = $4, passenger_email = $5, \
                pick_up_address = $6, drop_off_address = $7, pick_up_date = $8, pick_up_time = $9, \
                return_date = $10, return_time = $11, return_pickup_address = $12, \
                return_dropoff_address = $13, return_flight_number = $14, return_special_requests = $15, \
                vehicle_type = $16, trip_type = $17, hours_booked = $18, number_of_passengers = $19, \
                flight_number = $20, notes = $21, status = $22, admin_reviewed = $23, \
                admin_comment = $24, cancellation_reason = $25, charge = $26, is_return_leg = $27, \
                linked_booking = $28, updated_at = $29 \
             WHERE id = $1",
        )
        .bind(booking.id)
        .bind(&booking.owner_id)
        .bind(&booking.passenger_name)
        .bind(&booking.phone_number)
        .bind(&booking.passenger_email)
        .bind(&booking.pick_up_address)
        .bind(&booking.drop_off_address)
        .bind(booking.pick_up_date)
        .bind(booking.pick_up_time)
        .bind(booking.return_date)
        .bind(booking.return_time)
        .bind(&booking.return_pickup_address)
        .bind(&booking.return_dropoff_address)
        .bind(&booking.return_flight_number)
        .bind(&booking.return_special_requests)
        .bind(booking.vehicle_type.as_str())
        .bind(booking.trip_type.as_str())
        .bind(booking.hours_booked.map(to_db_count).transpose()?)
        .bind(to_db_count(booking.number_of_passengers)?)
        .bind(&booking.flight_number)
        .bind(&booking.notes)
        .bind(booking.status.as_str())
        .bind(booking.admin_reviewed)
        .bind(&booking.admin_comment)
        .bind(&booking.cancellation_reason)
        .bind(booking.charge.map(|c| c.as_str()))
        .bind(booking.is_return_leg)
        .bind(booking.linked_booking)
        .bind(booking.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| write_error(e, booking))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(booking.id));
        }
        Ok(())
    }

    async fn delete_booking(&self, tx: &mut Self::Tx, id: Uuid) -> Result<(), RepositoryError> {
        // linked_booking references are cleared by ON DELETE SET NULL.
        let result = sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(|e| lock_error(e, id))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    async fn append_history(&self, tx: &mut Self::Tx, entry: &BookingHistory) -> Result<(), RepositoryError> {
        let sql = format!(
            "INSERT INTO booking_history ({HISTORY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        );
        sqlx::query(&sql)
            .bind(entry.id)
            .bind(entry.booking_id)
            .bind(entry.action.as_str())
            .bind(&entry.actor_id)
            .bind(Json(&entry.snapshot))
            .bind(Json(&entry.changes))
            .bind(&entry.reason)
            .bind(entry.ip_address.map(|ip| ip.to_string()))
            .bind(entry.corrects)
            .bind(entry.recorded_at)
            .execute(&mut **tx)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn reference_exists(&self, tx: &mut Self::Tx, reference: &str) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM bookings WHERE reference = $1)")
            .bind(reference)
            .fetch_one(&mut **tx)
            .await
            .map_err(backend)
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, RepositoryError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(Booking::try_from).transpose()
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Booking>, RepositoryError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE reference = $1");
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(Booking::try_from).transpose()
    }

    async fn history_for(&self, booking_id: Uuid) -> Result<Vec<BookingHistory>, RepositoryError> {
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM booking_history WHERE booking_id = $1 ORDER BY recorded_at, seq"
        );
        let rows = sqlx::query_as::<_, HistoryRow>(&sql)
            .bind(booking_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter().map(BookingHistory::try_from).collect()
    }

    async fn dashboard_stats(&self, today: NaiveDate) -> Result<DashboardStats, RepositoryError> {
        let row = sqlx::query_as::<_, StatsRow>(
            "SELECT \
                COUNT(*) AS total, \
                COUNT(*) FILTER (WHERE status IN ('PENDING', 'CONFIRMED')) AS active, \
                COUNT(*) FILTER (WHERE status = 'PENDING') AS pending, \
                COUNT(*) FILTER (WHERE status = 'CONFIRMED') AS confirmed, \
                COUNT(*) FILTER (WHERE pick_up_date = $1) AS today, \
                COUNT(*) FILTER (WHERE pick_up_date > $1 AND status IN ('PENDING', 'CONFIRMED')) AS upcoming, \
                COUNT(*) FILTER (WHERE status = 'TRIP_COMPLETED') AS completed \
             FROM bookings",
        )
        .bind(today)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        let count = |v: i64| u64::try_from(v).unwrap_or_default();
        Ok(DashboardStats {
            total: count(row.total),
            active: count(row.active),
            pending: count(row.pending),
            confirmed: count(row.confirmed),
            today: count(row.today),
            upcoming: count(row.upcoming),
            completed: count(row.completed),
            computed_at: None,
        })
    }
}
