use chauffeur_shared::{Booking, TripType, VehicleType};

use crate::error::BookingError;

/// Minimum length of an hourly charter.
pub const MIN_HOURLY_BOOKING: u32 = 3;

/// Field fix-ups applied before validation.
pub fn normalize(booking: &mut Booking) {
    if booking.trip_type == TripType::Hourly {
        booking.drop_off_address = None;
    }
    if booking.trip_type != TripType::Hourly {
        booking.hours_booked = None;
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Checks one leg on its own. Runs on intake and after every field edit.
pub fn validate_booking(booking: &Booking) -> Result<(), BookingError> {
    for (field, value) in [
        ("passenger_name", &booking.passenger_name),
        ("phone_number", &booking.phone_number),
        ("passenger_email", &booking.passenger_email),
        ("pick_up_address", &booking.pick_up_address),
    ] {
        if value.trim().is_empty() {
            return Err(BookingError::validation(field, "is required"));
        }
    }
    if !booking.passenger_email.contains('@') {
        return Err(BookingError::validation("passenger_email", "is not a valid email address"));
    }

    if booking.number_of_passengers == 0 {
        return Err(BookingError::validation("number_of_passengers", "at least one passenger is required"));
    }
    if let Some(capacity) = booking.vehicle_type.capacity() {
        if booking.number_of_passengers > capacity {
            return Err(BookingError::validation(
                "number_of_passengers",
                format!(
                    "{} seats at most {} passengers, {} requested",
                    booking.vehicle_type.label(),
                    capacity,
                    booking.number_of_passengers
                ),
            ));
        }
    }

    match booking.trip_type {
        TripType::Hourly => match booking.hours_booked {
            Some(hours) if hours >= MIN_HOURLY_BOOKING => {}
            _ => {
                return Err(BookingError::validation(
                    "hours_booked",
                    format!("hourly trips require at least {MIN_HOURLY_BOOKING} hours"),
                ))
            }
        },
        TripType::Point => {
            if blank(&booking.drop_off_address) {
                return Err(BookingError::validation("drop_off_address", "required for point-to-point trips"));
            }
        }
        TripType::Round => {
            if blank(&booking.drop_off_address) {
                return Err(BookingError::validation("drop_off_address", "required for round trips"));
            }
            if booking.is_outbound() {
                if booking.return_date.is_none() || booking.return_time.is_none() {
                    return Err(BookingError::validation("return_date", "return date and time required for round trips"));
                }
                if blank(&booking.return_pickup_address) || blank(&booking.return_dropoff_address) {
                    return Err(BookingError::validation(
                        "return_pickup_address",
                        "return addresses required for round trips",
                    ));
                }
            }
        }
    }

    if booking.vehicle_type == VehicleType::Others && blank(&booking.notes) {
        return Err(BookingError::validation("notes", "describe the vehicle requirements for \"Others\""));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::booking_in;
    use chauffeur_shared::BookingStatus;
    use chrono::Duration;

    fn field_of(err: BookingError) -> &'static str {
        match err {
            BookingError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_point_trip() {
        let booking = booking_in(BookingStatus::Pending, Duration::hours(24));
        assert!(validate_booking(&booking).is_ok());
    }

    #[test]
    fn test_vehicle_capacity() {
        let mut booking = booking_in(BookingStatus::Pending, Duration::hours(24));
        booking.number_of_passengers = 3;
        assert_eq!(field_of(validate_booking(&booking).unwrap_err()), "number_of_passengers");

        booking.vehicle_type = VehicleType::Suv;
        assert!(validate_booking(&booking).is_ok());

        booking.number_of_passengers = 0;
        assert_eq!(field_of(validate_booking(&booking).unwrap_err()), "number_of_passengers");

        booking.vehicle_type = VehicleType::Others;
        booking.number_of_passengers = 40;
        assert_eq!(field_of(validate_booking(&booking).unwrap_err()), "notes");
        booking.notes = Some("coach bus".to_string());
        assert!(validate_booking(&booking).is_ok());
    }

    #[test]
    fn test_hourly_trip_rules() {
        let mut booking = booking_in(BookingStatus::Pending, Duration::hours(24));
        booking.trip_type = TripType::Hourly;
        booking.hours_booked = Some(2);
        normalize(&mut booking);
        assert_eq!(booking.drop_off_address, None);
        assert_eq!(field_of(validate_booking(&booking).unwrap_err()), "hours_booked");

        booking.hours_booked = Some(3);
        assert!(validate_booking(&booking).is_ok());
    }

    #[test]
    fn test_point_trip_needs_drop_off() {
        let mut booking = booking_in(BookingStatus::Pending, Duration::hours(24));
        booking.drop_off_address = Some("  ".to_string());
        assert_eq!(field_of(validate_booking(&booking).unwrap_err()), "drop_off_address");
    }

    #[test]
    fn test_round_trip_outbound_needs_return_details() {
        let mut booking = booking_in(BookingStatus::Pending, Duration::hours(24));
        booking.trip_type = TripType::Round;
        assert_eq!(field_of(validate_booking(&booking).unwrap_err()), "return_date");

        booking.is_return_leg = true;
        assert!(validate_booking(&booking).is_ok());
    }
}
