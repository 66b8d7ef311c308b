#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chauffeur_booking::BookingService;
use chauffeur_core::{BusinessRules, CacheError, DashboardStats, FixedClock, RecordingNotifier, StatsCache};
use chauffeur_shared::{BookingDraft, TripType, VehicleType};
use chauffeur_store::InMemoryBookingRepository;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap()
}

fn split(at: DateTime<Utc>) -> (NaiveDate, NaiveTime) {
    (at.date_naive(), at.time())
}

pub fn draft_in(pickup_in: Duration) -> BookingDraft {
    let (date, time) = split(now() + pickup_in);
    BookingDraft {
        owner_id: Some("cust-1".to_string()),
        passenger_name: "Grace Hopper".to_string(),
        phone_number: "555-0199".to_string(),
        passenger_email: "grace@example.com".to_string(),
        pick_up_address: "12 Harbor Rd".to_string(),
        drop_off_address: Some("Terminal A".to_string()),
        pick_up_date: date,
        pick_up_time: time,
        return_date: None,
        return_time: None,
        return_pickup_address: None,
        return_dropoff_address: None,
        return_flight_number: None,
        return_special_requests: None,
        vehicle_type: VehicleType::Suv,
        trip_type: TripType::Point,
        hours_booked: None,
        number_of_passengers: 3,
        flight_number: Some("DL42".to_string()),
        notes: None,
    }
}

pub fn round_trip_draft(outbound_in: Duration, return_in: Duration) -> BookingDraft {
    let (return_date, return_time) = split(now() + return_in);
    BookingDraft {
        trip_type: TripType::Round,
        return_date: Some(return_date),
        return_time: Some(return_time),
        return_pickup_address: Some("Terminal B".to_string()),
        return_dropoff_address: Some("12 Harbor Rd".to_string()),
        return_flight_number: Some("DL43".to_string()),
        return_special_requests: None,
        ..draft_in(outbound_in)
    }
}

/// Stats cache held in memory that counts how often it was invalidated.
#[derive(Default)]
pub struct MemoryStatsCache {
    stats: Mutex<Option<DashboardStats>>,
    invalidations: AtomicUsize,
}

impl MemoryStatsCache {
    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatsCache for MemoryStatsCache {
    async fn get(&self) -> Result<Option<DashboardStats>, CacheError> {
        Ok(self.stats.lock().unwrap().clone())
    }

    async fn put(&self, stats: &DashboardStats, _ttl_seconds: u64) -> Result<(), CacheError> {
        *self.stats.lock().unwrap() = Some(stats.clone());
        Ok(())
    }

    async fn invalidate(&self) -> Result<(), CacheError> {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        *self.stats.lock().unwrap() = None;
        Ok(())
    }
}

pub struct Harness {
    pub service: Arc<BookingService<InMemoryBookingRepository>>,
    pub repo: Arc<InMemoryBookingRepository>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<FixedClock>,
    pub cache: Arc<MemoryStatsCache>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_rules(BusinessRules::default())
    }

    pub fn with_rules(rules: BusinessRules) -> Self {
        init_tracing();
        let repo = Arc::new(InMemoryBookingRepository::new(StdDuration::from_millis(rules.lock_timeout_ms)));
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(FixedClock::new(now()));
        let cache = Arc::new(MemoryStatsCache::default());
        let service = BookingService::new(repo.clone(), notifier.clone(), rules)
            .with_clock(clock.clone())
            .with_stats_cache(cache.clone());
        Self { service: Arc::new(service), repo, notifier, clock, cache }
    }
}
