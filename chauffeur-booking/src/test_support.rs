use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use chauffeur_shared::{Booking, BookingDraft, BookingStatus, TripType, VehicleType};

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap()
}

fn split(at: DateTime<Utc>) -> (NaiveDate, NaiveTime) {
    (at.date_naive(), at.time())
}

pub fn draft_in(pickup_in: Duration) -> BookingDraft {
    let (date, time) = split(now() + pickup_in);
    BookingDraft {
        owner_id: None,
        passenger_name: "Ada Lovelace".to_string(),
        phone_number: "555-0100".to_string(),
        passenger_email: "ada@example.com".to_string(),
        pick_up_address: "1 Main St".to_string(),
        drop_off_address: Some("Terminal A".to_string()),
        pick_up_date: date,
        pick_up_time: time,
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
        flight_number: Some("UA100".to_string()),
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
        return_dropoff_address: Some("1 Main St".to_string()),
        return_flight_number: Some("UA200".to_string()),
        return_special_requests: None,
        ..draft_in(outbound_in)
    }
}

pub fn booking_in(status: BookingStatus, pickup_in: Duration) -> Booking {
    let mut booking = Booking::from_draft(&draft_in(pickup_in), "owner-1".to_string(), status, now());
    booking.reference = format!("M1-300601-{}", &Uuid::new_v4().simple().to_string()[..2].to_uppercase());
    booking
}

/// Outbound and return legs already linked to each other.
pub fn linked_pair(
    outbound_status: BookingStatus,
    outbound_in: Duration,
    return_status: BookingStatus,
    return_in: Duration,
) -> (Booking, Booking) {
    let mut outbound = Booking::from_draft(
        &round_trip_draft(outbound_in, return_in),
        "owner-1".to_string(),
        outbound_status,
        now(),
    );
    outbound.reference = "M1-300601-OB".to_string();

    let mut back = booking_in(return_status, return_in);
    back.reference = "M1-300601-RT".to_string();
    back.trip_type = TripType::Round;
    back.pick_up_address = "Terminal B".to_string();
    back.drop_off_address = Some("1 Main St".to_string());
    back.flight_number = Some("UA200".to_string());
    back.is_return_leg = true;

    outbound.linked_booking = Some(back.id);
    back.linked_booking = Some(outbound.id);
    (outbound, back)
}
