use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a single trip leg
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    CancelledFullCharge,
    CustomerNoShow,
    TripNotCovered,
    TripCompleted,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 7] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Cancelled,
        BookingStatus::CancelledFullCharge,
        BookingStatus::CustomerNoShow,
        BookingStatus::TripNotCovered,
        BookingStatus::TripCompleted,
    ];

    /// Allowed next statuses. Terminal statuses have none.
    pub fn successors(&self) -> &'static [BookingStatus] {
        use BookingStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled, TripNotCovered],
            // Confirmed -> Pending re-opens a trip for edits.
            Confirmed => &[
                Cancelled,
                CancelledFullCharge,
                CustomerNoShow,
                TripNotCovered,
                TripCompleted,
                Pending,
            ],
            Cancelled | CancelledFullCharge | CustomerNoShow | TripNotCovered | TripCompleted => &[],
        }
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        self.successors().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::CancelledFullCharge)
    }

    /// Storage representation, matches the serde name.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::CancelledFullCharge => "CANCELLED_FULL_CHARGE",
            BookingStatus::CustomerNoShow => "CUSTOMER_NO_SHOW",
            BookingStatus::TripNotCovered => "TRIP_NOT_COVERED",
            BookingStatus::TripCompleted => "TRIP_COMPLETED",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::Cancelled => "Cancelled",
            BookingStatus::CancelledFullCharge => "Cancelled (Full Charge)",
            BookingStatus::CustomerNoShow => "Customer No-Show",
            BookingStatus::TripNotCovered => "Trip Not Covered",
            BookingStatus::TripCompleted => "Trip Completed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

impl FromStr for BookingStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError { kind: "booking status", value: s.to_string() })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleType {
    Sedan,
    Suv,
    SprinterVan,
    Others,
}

impl VehicleType {
    /// Seat capacity; `None` when the vehicle is arranged case by case.
    pub fn capacity(&self) -> Option<u32> {
        match self {
            VehicleType::Sedan => Some(2),
            VehicleType::Suv => Some(6),
            VehicleType::SprinterVan => Some(12),
            VehicleType::Others => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Sedan => "SEDAN",
            VehicleType::Suv => "SUV",
            VehicleType::SprinterVan => "SPRINTER_VAN",
            VehicleType::Others => "OTHERS",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VehicleType::Sedan => "Sedan",
            VehicleType::Suv => "SUV",
            VehicleType::SprinterVan => "Sprinter Van",
            VehicleType::Others => "Others",
        }
    }
}

impl FromStr for VehicleType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [VehicleType::Sedan, VehicleType::Suv, VehicleType::SprinterVan, VehicleType::Others]
            .into_iter()
            .find(|vehicle| vehicle.as_str() == s)
            .ok_or_else(|| ParseEnumError { kind: "vehicle type", value: s.to_string() })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripType {
    Point,
    Round,
    Hourly,
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripType::Point => "POINT",
            TripType::Round => "ROUND",
            TripType::Hourly => "HOURLY",
        }
    }
}

impl FromStr for TripType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [TripType::Point, TripType::Round, TripType::Hourly]
            .into_iter()
            .find(|trip| trip.as_str() == s)
            .ok_or_else(|| ParseEnumError { kind: "trip type", value: s.to_string() })
    }
}

/// Billing classification recorded when a leg is cancelled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeClassification {
    NoCharge,
    FullCharge,
}

impl ChargeClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeClassification::NoCharge => "NO_CHARGE",
            ChargeClassification::FullCharge => "FULL_CHARGE",
        }
    }
}

impl FromStr for ChargeClassification {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NO_CHARGE" => Ok(ChargeClassification::NoCharge),
            "FULL_CHARGE" => Ok(ChargeClassification::FullCharge),
            other => Err(ParseEnumError { kind: "charge classification", value: other.to_string() }),
        }
    }
}

/// One trip leg. A round trip is two linked legs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub reference: String,
    pub owner_id: String,
    pub passenger_name: String,
    pub phone_number: String,
    pub passenger_email: String,
    pub pick_up_address: String,
    pub drop_off_address: Option<String>,
    pub pick_up_date: NaiveDate,
    pub pick_up_time: NaiveTime,
    pub return_date: Option<NaiveDate>,
    pub return_time: Option<NaiveTime>,
    pub return_pickup_address: Option<String>,
    pub return_dropoff_address: Option<String>,
    pub return_flight_number: Option<String>,
    pub return_special_requests: Option<String>,
    pub vehicle_type: VehicleType,
    pub trip_type: TripType,
    pub hours_booked: Option<u32>,
    pub number_of_passengers: u32,
    pub flight_number: Option<String>,
    pub notes: Option<String>,
    pub status: BookingStatus,
    pub admin_reviewed: bool,
    pub admin_comment: Option<String>,
    pub cancellation_reason: Option<String>,
    pub charge: Option<ChargeClassification>,
    pub is_return_leg: bool,
    pub linked_booking: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Builds a fresh leg from intake data. The reference is assigned later,
    /// inside the creating transaction.
    pub fn from_draft(draft: &BookingDraft, owner_id: String, status: BookingStatus, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference: String::new(),
            owner_id,
            passenger_name: draft.passenger_name.clone(),
            phone_number: draft.phone_number.clone(),
            passenger_email: draft.passenger_email.clone(),
            pick_up_address: draft.pick_up_address.clone(),
            drop_off_address: draft.drop_off_address.clone(),
            pick_up_date: draft.pick_up_date,
            pick_up_time: draft.pick_up_time,
            return_date: draft.return_date,
            return_time: draft.return_time,
            return_pickup_address: draft.return_pickup_address.clone(),
            return_dropoff_address: draft.return_dropoff_address.clone(),
            return_flight_number: draft.return_flight_number.clone(),
            return_special_requests: draft.return_special_requests.clone(),
            vehicle_type: draft.vehicle_type,
            trip_type: draft.trip_type,
            hours_booked: draft.hours_booked,
            number_of_passengers: draft.number_of_passengers,
            flight_number: draft.flight_number.clone(),
            notes: draft.notes.clone(),
            status,
            admin_reviewed: false,
            admin_comment: None,
            cancellation_reason: None,
            charge: None,
            is_return_leg: false,
            linked_booking: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Local pickup date and time (business timezone, no offset attached)
    pub fn pick_up_at(&self) -> NaiveDateTime {
        self.pick_up_date.and_time(self.pick_up_time)
    }

    pub fn is_outbound(&self) -> bool {
        !self.is_return_leg
    }

    pub fn is_round_trip(&self) -> bool {
        self.trip_type == TripType::Round
    }
}

/// Intake data for a new booking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDraft {
    /// Owning account when a privileged actor books on someone's behalf.
    #[serde(default)]
    pub owner_id: Option<String>,
    pub passenger_name: String,
    pub phone_number: String,
    pub passenger_email: String,
    pub pick_up_address: String,
    #[serde(default)]
    pub drop_off_address: Option<String>,
    pub pick_up_date: NaiveDate,
    pub pick_up_time: NaiveTime,
    #[serde(default)]
    pub return_date: Option<NaiveDate>,
    #[serde(default)]
    pub return_time: Option<NaiveTime>,
    #[serde(default)]
    pub return_pickup_address: Option<String>,
    #[serde(default)]
    pub return_dropoff_address: Option<String>,
    #[serde(default)]
    pub return_flight_number: Option<String>,
    #[serde(default)]
    pub return_special_requests: Option<String>,
    pub vehicle_type: VehicleType,
    pub trip_type: TripType,
    #[serde(default)]
    pub hours_booked: Option<u32>,
    pub number_of_passengers: u32,
    #[serde(default)]
    pub flight_number: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Partial edit of a leg. `None` leaves a field alone; for nullable fields
/// `Some(None)` clears the value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingChanges {
    pub passenger_name: Option<String>,
    pub phone_number: Option<String>,
    pub passenger_email: Option<String>,
    pub pick_up_address: Option<String>,
    pub drop_off_address: Option<Option<String>>,
    pub pick_up_date: Option<NaiveDate>,
    pub pick_up_time: Option<NaiveTime>,
    pub return_date: Option<Option<NaiveDate>>,
    pub return_time: Option<Option<NaiveTime>>,
    pub return_pickup_address: Option<Option<String>>,
    pub return_dropoff_address: Option<Option<String>>,
    pub return_flight_number: Option<Option<String>>,
    pub return_special_requests: Option<Option<String>>,
    pub vehicle_type: Option<VehicleType>,
    pub hours_booked: Option<Option<u32>>,
    pub number_of_passengers: Option<u32>,
    pub flight_number: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub admin_comment: Option<Option<String>>,
}

impl BookingChanges {
    /// Writes every provided value onto `booking`. Return-trip fields are only
    /// meaningful on an outbound leg and are skipped for return legs.
    pub fn apply_to(&self, booking: &mut Booking) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut booking.passenger_name, &self.passenger_name);
        set(&mut booking.phone_number, &self.phone_number);
        set(&mut booking.passenger_email, &self.passenger_email);
        set(&mut booking.pick_up_address, &self.pick_up_address);
        set(&mut booking.drop_off_address, &self.drop_off_address);
        set(&mut booking.pick_up_date, &self.pick_up_date);
        set(&mut booking.pick_up_time, &self.pick_up_time);
        set(&mut booking.vehicle_type, &self.vehicle_type);
        set(&mut booking.hours_booked, &self.hours_booked);
        set(&mut booking.number_of_passengers, &self.number_of_passengers);
        set(&mut booking.flight_number, &self.flight_number);
        set(&mut booking.notes, &self.notes);
        set(&mut booking.admin_comment, &self.admin_comment);

        if booking.is_outbound() {
            set(&mut booking.return_date, &self.return_date);
            set(&mut booking.return_time, &self.return_time);
            set(&mut booking.return_pickup_address, &self.return_pickup_address);
            set(&mut booking.return_dropoff_address, &self.return_dropoff_address);
            set(&mut booking.return_flight_number, &self.return_flight_number);
            set(&mut booking.return_special_requests, &self.return_special_requests);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.passenger_name.is_none()
            && self.phone_number.is_none()
            && self.passenger_email.is_none()
            && self.pick_up_address.is_none()
            && self.drop_off_address.is_none()
            && self.pick_up_date.is_none()
            && self.pick_up_time.is_none()
            && self.return_date.is_none()
            && self.return_time.is_none()
            && self.return_pickup_address.is_none()
            && self.return_dropoff_address.is_none()
            && self.return_flight_number.is_none()
            && self.return_special_requests.is_none()
            && self.vehicle_type.is_none()
            && self.hours_booked.is_none()
            && self.number_of_passengers.is_none()
            && self.flight_number.is_none()
            && self.notes.is_none()
            && self.admin_comment.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Booking {
        let draft = BookingDraft {
            owner_id: None,
            passenger_name: "Ada".to_string(),
            phone_number: "555-0100".to_string(),
            passenger_email: "ada@example.com".to_string(),
            pick_up_address: "1 Main St".to_string(),
            drop_off_address: Some("Airport".to_string()),
            pick_up_date: NaiveDate::from_ymd_opt(2030, 1, 2).unwrap(),
            pick_up_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            return_date: None,
            return_time: None,
            return_pickup_address: None,
            return_dropoff_address: None,
            return_flight_number: None,
            return_special_requests: None,
            vehicle_type: VehicleType::Sedan,
            trip_type: TripType::Point,
            hours_booked: None,
            number_of_passengers: 1,
            flight_number: None,
            notes: None,
        };
        Booking::from_draft(&draft, "owner-1".to_string(), BookingStatus::Pending, Utc::now())
    }

    #[test]
    fn test_terminal_statuses_have_no_successors() {
        let terminal: Vec<_> = BookingStatus::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![
                BookingStatus::Cancelled,
                BookingStatus::CancelledFullCharge,
                BookingStatus::CustomerNoShow,
                BookingStatus::TripNotCovered,
                BookingStatus::TripCompleted,
            ]
        );
        assert!(BookingStatus::Confirmed.can_transition_to(BookingStatus::Pending));
        assert!(!BookingStatus::Pending.can_transition_to(BookingStatus::CancelledFullCharge));
    }

    #[test]
    fn test_status_storage_names_round_trip() {
        for status in BookingStatus::ALL {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("REJECTED".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn test_changes_clear_nullable_fields() {
        let mut booking = sample();
        let changes = BookingChanges {
            drop_off_address: Some(None),
            passenger_name: Some("Grace".to_string()),
            ..Default::default()
        };
        changes.apply_to(&mut booking);

        assert_eq!(booking.drop_off_address, None);
        assert_eq!(booking.passenger_name, "Grace");
        assert_eq!(booking.phone_number, "555-0100");
    }

    #[test]
    fn test_return_fields_ignored_on_return_leg() {
        let mut booking = sample();
        booking.is_return_leg = true;
        let changes = BookingChanges {
            return_date: Some(NaiveDate::from_ymd_opt(2030, 1, 5)),
            ..Default::default()
        };
        changes.apply_to(&mut booking);

        assert_eq!(booking.return_date, None);
        assert!(!changes.is_empty());
        assert!(BookingChanges::default().is_empty());
    }
}
