use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::BTreeMap;
use std::net::IpAddr;

use super::booking::{Booking, BookingStatus, ChargeClassification, TripType, VehicleType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    Created,
    Updated,
    StatusChanged,
    Cancelled,
    Deleted,
    Correction,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "CREATED",
            HistoryAction::Updated => "UPDATED",
            HistoryAction::StatusChanged => "STATUS_CHANGED",
            HistoryAction::Cancelled => "CANCELLED",
            HistoryAction::Deleted => "DELETED",
            HistoryAction::Correction => "CORRECTION",
        }
    }
}

impl std::str::FromStr for HistoryAction {
    type Err = super::booking::ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            HistoryAction::Created,
            HistoryAction::Updated,
            HistoryAction::StatusChanged,
            HistoryAction::Cancelled,
            HistoryAction::Deleted,
            HistoryAction::Correction,
        ]
        .into_iter()
        .find(|action| action.as_str() == s)
        .ok_or_else(|| super::booking::ParseEnumError { kind: "history action", value: s.to_string() })
    }
}

/// Mutable booking attributes tracked by the audit trail
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum BookingField {
    PassengerName,
    PhoneNumber,
    PassengerEmail,
    PickUpAddress,
    DropOffAddress,
    PickUpDate,
    PickUpTime,
    ReturnDate,
    ReturnTime,
    ReturnPickupAddress,
    ReturnDropoffAddress,
    ReturnFlightNumber,
    ReturnSpecialRequests,
    VehicleType,
    TripType,
    HoursBooked,
    NumberOfPassengers,
    FlightNumber,
    Notes,
    Status,
    AdminReviewed,
    AdminComment,
    CancellationReason,
    Charge,
    IsReturnLeg,
    LinkedBooking,
}

impl BookingField {
    /// Human readable name used in activity listings
    pub fn label(&self) -> &'static str {
        match self {
            BookingField::PassengerName => "Passenger Name",
            BookingField::PhoneNumber => "Phone Number",
            BookingField::PassengerEmail => "Passenger Email",
            BookingField::PickUpAddress => "Pickup Address",
            BookingField::DropOffAddress => "Drop-off Address",
            BookingField::PickUpDate => "Pickup Date",
            BookingField::PickUpTime => "Pickup Time",
            BookingField::ReturnDate => "Return Date",
            BookingField::ReturnTime => "Return Time",
            BookingField::ReturnPickupAddress => "Return Pickup Address",
            BookingField::ReturnDropoffAddress => "Return Drop-off Address",
            BookingField::ReturnFlightNumber => "Return Flight Number",
            BookingField::ReturnSpecialRequests => "Return Special Requests",
            BookingField::VehicleType => "Vehicle Type",
            BookingField::TripType => "Trip Type",
            BookingField::HoursBooked => "Hours Booked",
            BookingField::NumberOfPassengers => "Number of Passengers",
            BookingField::FlightNumber => "Flight Number",
            BookingField::Notes => "Notes",
            BookingField::Status => "Status",
            BookingField::AdminReviewed => "Admin Reviewed",
            BookingField::AdminComment => "Admin Comment",
            BookingField::CancellationReason => "Cancellation Reason",
            BookingField::Charge => "Charge",
            BookingField::IsReturnLeg => "Return Leg",
            BookingField::LinkedBooking => "Linked Booking",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

/// Field level difference between two versions of a leg
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct BookingDiff(BTreeMap<BookingField, FieldChange>);

macro_rules! diff_fields {
    ($diff:ident, $before:ident, $after:ident, { $($field:ident => $variant:ident),* $(,)? }) => {
        $(
            if $before.$field != $after.$field {
                $diff.record(BookingField::$variant, &$before.$field, &$after.$field);
            }
        )*
    };
}

impl BookingDiff {
    /// Compares two concrete versions field by field. Identity and timestamp
    /// columns are not part of the diff.
    pub fn between(before: &Booking, after: &Booking) -> Self {
        let mut diff = BookingDiff::default();
        diff_fields!(diff, before, after, {
            passenger_name => PassengerName,
            phone_number => PhoneNumber,
            passenger_email => PassengerEmail,
            pick_up_address => PickUpAddress,
            drop_off_address => DropOffAddress,
            pick_up_date => PickUpDate,
            pick_up_time => PickUpTime,
            return_date => ReturnDate,
            return_time => ReturnTime,
            return_pickup_address => ReturnPickupAddress,
            return_dropoff_address => ReturnDropoffAddress,
            return_flight_number => ReturnFlightNumber,
            return_special_requests => ReturnSpecialRequests,
            vehicle_type => VehicleType,
            trip_type => TripType,
            hours_booked => HoursBooked,
            number_of_passengers => NumberOfPassengers,
            flight_number => FlightNumber,
            notes => Notes,
            status => Status,
            admin_reviewed => AdminReviewed,
            admin_comment => AdminComment,
            cancellation_reason => CancellationReason,
            charge => Charge,
            is_return_leg => IsReturnLeg,
            linked_booking => LinkedBooking,
        });
        diff
    }

    pub fn record<T: Serialize>(&mut self, field: BookingField, old: &T, new: &T) {
        let old = serde_json::to_value(old).unwrap_or(serde_json::Value::Null);
        let new = serde_json::to_value(new).unwrap_or(serde_json::Value::Null);
        self.0.insert(field, FieldChange { old, new });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, field: BookingField) -> bool {
        self.0.contains_key(&field)
    }

    pub fn get(&self, field: BookingField) -> Option<&FieldChange> {
        self.0.get(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = BookingField> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BookingField, &FieldChange)> {
        self.0.iter()
    }

    /// Drops the given fields; used when only the business-relevant part of a
    /// diff matters.
    pub fn without(mut self, fields: &[BookingField]) -> Self {
        for field in fields {
            self.0.remove(field);
        }
        self
    }
}

/// Denormalized copy of a leg stored with every history entry, so entries stay
/// readable after the booking itself is gone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingSnapshot {
    pub id: Uuid,
    pub reference: String,
    pub passenger_name: String,
    pub phone_number: String,
    pub passenger_email: String,
    pub pick_up_address: String,
    pub drop_off_address: Option<String>,
    pub pick_up_date: NaiveDate,
    pub pick_up_time: NaiveTime,
    pub vehicle_type: VehicleType,
    pub trip_type: TripType,
    pub number_of_passengers: u32,
    pub status: BookingStatus,
    pub hours_booked: Option<u32>,
    pub flight_number: Option<String>,
    pub notes: Option<String>,
    pub charge: Option<ChargeClassification>,
    pub is_return_leg: bool,
    pub linked_booking: Option<Uuid>,
}

impl From<&Booking> for BookingSnapshot {
    fn from(booking: &Booking) -> Self {
        Self {
            id: booking.id,
            reference: booking.reference.clone(),
            passenger_name: booking.passenger_name.clone(),
            phone_number: booking.phone_number.clone(),
            passenger_email: booking.passenger_email.clone(),
            pick_up_address: booking.pick_up_address.clone(),
            drop_off_address: booking.drop_off_address.clone(),
            pick_up_date: booking.pick_up_date,
            pick_up_time: booking.pick_up_time,
            vehicle_type: booking.vehicle_type,
            trip_type: booking.trip_type,
            number_of_passengers: booking.number_of_passengers,
            status: booking.status,
            hours_booked: booking.hours_booked,
            flight_number: booking.flight_number.clone(),
            notes: booking.notes.clone(),
            charge: booking.charge,
            is_return_leg: booking.is_return_leg,
            linked_booking: booking.linked_booking,
        }
    }
}

/// Append-only audit entry. Never updated or deleted; corrections are new
/// entries pointing at the entry they correct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingHistory {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub action: HistoryAction,
    pub actor_id: String,
    pub snapshot: BookingSnapshot,
    pub changes: BookingDiff,
    pub reason: Option<String>,
    pub ip_address: Option<IpAddr>,
    pub corrects: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
}

impl BookingHistory {
    pub fn changed_fields(&self) -> Vec<BookingField> {
        self.changes.fields().collect()
    }
}
