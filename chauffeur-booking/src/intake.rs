use chrono::{DateTime, Utc};

use chauffeur_core::ActorContext;
use chauffeur_shared::{Booking, BookingDraft, BookingStatus, TripType};

use crate::error::BookingError;
use crate::policy::CancellationPolicy;
use crate::validation::{normalize, validate_booking};

/// The rows a draft turns into: one leg, or two mutually linked legs for a
/// round trip. References are still blank.
#[derive(Debug, Clone)]
pub struct IntakePlan {
    pub outbound: Booking,
    pub return_leg: Option<Booking>,
}

/// Validates a draft and lays out its legs. Privileged actors create bookings
/// already confirmed and reviewed.
pub fn plan_intake(
    draft: &BookingDraft,
    actor: &ActorContext,
    policy: &CancellationPolicy,
    now: DateTime<Utc>,
) -> Result<IntakePlan, BookingError> {
    let owner_id = match (&draft.owner_id, actor.is_privileged) {
        (Some(owner), true) => owner.clone(),
        _ => actor.id.clone(),
    };
    let status = if actor.is_privileged { BookingStatus::Confirmed } else { BookingStatus::Pending };

    let mut outbound = Booking::from_draft(draft, owner_id, status, now);
    outbound.admin_reviewed = actor.is_privileged;
    if outbound.trip_type != TripType::Round {
        clear_return_fields(&mut outbound);
    }
    normalize(&mut outbound);
    validate_booking(&outbound)?;
    ensure_future_pickup(&outbound, policy, now)?;

    if outbound.trip_type != TripType::Round {
        return Ok(IntakePlan { outbound, return_leg: None });
    }

    let mut return_leg = return_leg_of(&outbound);
    normalize(&mut return_leg);
    validate_booking(&return_leg)?;
    if policy.checked_pickup_instant(&return_leg)? <= policy.checked_pickup_instant(&outbound)? {
        return Err(BookingError::validation("return_date", "return pickup must be after the outbound pickup"));
    }

    outbound.linked_booking = Some(return_leg.id);
    return_leg.linked_booking = Some(outbound.id);
    Ok(IntakePlan { outbound, return_leg: Some(return_leg) })
}

fn ensure_future_pickup(booking: &Booking, policy: &CancellationPolicy, now: DateTime<Utc>) -> Result<(), BookingError> {
    if policy.checked_pickup_instant(booking)? <= now {
        return Err(BookingError::PastPickupBooking { pick_up: booking.pick_up_at() });
    }
    Ok(())
}

fn clear_return_fields(booking: &mut Booking) {
    booking.return_date = None;
    booking.return_time = None;
    booking.return_pickup_address = None;
    booking.return_dropoff_address = None;
    booking.return_flight_number = None;
    booking.return_special_requests = None;
}

/// Return leg built from the outbound leg's return details.
fn return_leg_of(outbound: &Booking) -> Booking {
    let mut leg = outbound.clone();
    leg.id = uuid::Uuid::new_v4();
    leg.pick_up_date = outbound.return_date.unwrap_or(outbound.pick_up_date);
    leg.pick_up_time = outbound.return_time.unwrap_or(outbound.pick_up_time);
    leg.pick_up_address = outbound.return_pickup_address.clone().unwrap_or_default();
    leg.drop_off_address = outbound.return_dropoff_address.clone();
    leg.flight_number = outbound.return_flight_number.clone();
    leg.notes = outbound.return_special_requests.clone();
    leg.is_return_leg = true;
    clear_return_fields(&mut leg);
    leg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{draft_in, now, round_trip_draft};
    use chauffeur_core::BusinessRules;
    use chrono::Duration;

    fn policy() -> CancellationPolicy {
        CancellationPolicy::new(&BusinessRules::default())
    }

    #[test]
    fn test_customer_booking_starts_pending() {
        let plan = plan_intake(&draft_in(Duration::hours(24)), &ActorContext::customer("cust-1"), &policy(), now()).unwrap();
        assert_eq!(plan.outbound.status, BookingStatus::Pending);
        assert_eq!(plan.outbound.owner_id, "cust-1");
        assert!(!plan.outbound.admin_reviewed);
        assert!(plan.return_leg.is_none());
    }

    #[test]
    fn test_admin_booking_is_confirmed_for_owner() {
        let mut draft = draft_in(Duration::hours(24));
        draft.owner_id = Some("cust-9".to_string());
        let plan = plan_intake(&draft, &ActorContext::admin("ops"), &policy(), now()).unwrap();
        assert_eq!(plan.outbound.status, BookingStatus::Confirmed);
        assert!(plan.outbound.admin_reviewed);
        assert_eq!(plan.outbound.owner_id, "cust-9");

        let plan = plan_intake(&draft, &ActorContext::customer("cust-1"), &policy(), now()).unwrap();
        assert_eq!(plan.outbound.owner_id, "cust-1");
    }

    #[test]
    fn test_past_pickup_is_rejected() {
        let err = plan_intake(&draft_in(-Duration::minutes(5)), &ActorContext::admin("ops"), &policy(), now()).unwrap_err();
        assert!(matches!(err, BookingError::PastPickupBooking { .. }));
    }

    #[test]
    fn test_round_trip_creates_linked_legs() {
        let draft = round_trip_draft(Duration::hours(24), Duration::hours(72));
        let plan = plan_intake(&draft, &ActorContext::customer("cust-1"), &policy(), now()).unwrap();
        let outbound = plan.outbound;
        let back = plan.return_leg.unwrap();

        assert_eq!(outbound.linked_booking, Some(back.id));
        assert_eq!(back.linked_booking, Some(outbound.id));
        assert!(!outbound.is_return_leg);
        assert!(back.is_return_leg);
        assert_eq!(back.pick_up_date, draft.return_date.unwrap());
        assert_eq!(back.pick_up_address, "Terminal B");
        assert_eq!(back.drop_off_address.as_deref(), Some("1 Main St"));
        assert_eq!(back.flight_number.as_deref(), Some("UA200"));
        assert_eq!(back.return_date, None);
        assert_eq!(back.status, outbound.status);
    }

    #[test]
    fn test_return_before_outbound_is_rejected() {
        let draft = round_trip_draft(Duration::hours(24), Duration::hours(20));
        let err = plan_intake(&draft, &ActorContext::customer("cust-1"), &policy(), now()).unwrap_err();
        assert!(matches!(err, BookingError::Validation { field: "return_date", .. }));
    }

    #[test]
    fn test_pickup_inside_spring_forward_gap_is_rejected() {
        let rules = BusinessRules { timezone: "America/Chicago".to_string(), ..BusinessRules::default() };
        let mut draft = draft_in(Duration::hours(24));
        draft.pick_up_date = chrono::NaiveDate::from_ymd_opt(2031, 3, 9).unwrap();
        draft.pick_up_time = chrono::NaiveTime::from_hms_opt(2, 15, 0).unwrap();
        let err = plan_intake(&draft, &ActorContext::customer("cust-1"), &CancellationPolicy::new(&rules), now()).unwrap_err();
        assert!(matches!(err, BookingError::Validation { field: "pick_up_time", .. }));
    }
}
