use chrono::{DateTime, Utc};

use chauffeur_core::ActorContext;
use chauffeur_shared::{
    Booking, BookingChanges, BookingDiff, BookingField, BookingHistory, BookingStatus, ChargeClassification,
    HistoryAction, NotificationKind,
};

use crate::audit::AuditTrail;
use crate::error::BookingError;
use crate::policy::{format_hours_until, CancellationPolicy};
use crate::status::{require_reason, StatusMachine, StatusRequest, Transition};
use crate::validation::{normalize, validate_booking};

/// A leg and its sibling, both read under row lock in the current transaction.
#[derive(Debug, Clone)]
pub struct LockedPair {
    pub leg: Booking,
    pub sibling: Option<Booking>,
}

impl LockedPair {
    fn active_sibling(&self) -> Option<&Booking> {
        self.sibling.as_ref().filter(|s| !s.status.is_terminal())
    }
}

/// Notification to send once the outcome is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationPlan {
    pub kind: NotificationKind,
    pub previous_status: Option<BookingStatus>,
    /// One message for both legs.
    pub include_sibling: bool,
}

/// Everything a pair mutation produced. Nothing here is persisted yet.
#[derive(Debug, Clone)]
pub struct PairOutcome {
    pub leg: Booking,
    pub sibling: Option<Booking>,
    pub leg_changed: bool,
    pub sibling_changed: bool,
    pub leg_deleted: bool,
    pub history: Vec<BookingHistory>,
    pub notification: Option<NotificationPlan>,
}

impl PairOutcome {
    pub fn unchanged(pair: LockedPair) -> Self {
        Self {
            leg: pair.leg,
            sibling: pair.sibling,
            leg_changed: false,
            sibling_changed: false,
            leg_deleted: false,
            history: Vec::new(),
            notification: None,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        !self.leg_changed && !self.sibling_changed && !self.leg_deleted && self.history.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SiblingCancellation {
    /// Caller asked to cancel the whole round trip.
    Requested,
    /// The sibling follows a cancellation of the other leg.
    Propagated,
}

/// Customers may only act on their own bookings.
fn ensure_owner(leg: &Booking, actor: &ActorContext) -> Result<(), BookingError> {
    if !actor.is_privileged && leg.owner_id != actor.id {
        return Err(BookingError::NotBookingOwner { booking_id: leg.id });
    }
    Ok(())
}

fn leg_kind(booking: &Booking) -> &'static str {
    if booking.is_return_leg {
        "return"
    } else {
        "outbound"
    }
}

/// Keeps the two legs of a round trip consistent.
#[derive(Debug, Clone)]
pub struct RoundTripCoordinator {
    machine: StatusMachine,
}

impl RoundTripCoordinator {
    pub fn new(policy: CancellationPolicy) -> Self {
        Self { machine: StatusMachine::new(policy) }
    }

    pub fn policy(&self) -> &CancellationPolicy {
        self.machine.policy()
    }

    /// Status change of one leg with the sibling rules applied: auto-confirm of a
    /// pending return leg, and propagation of cancellation and not-covered.
    pub fn transition(
        &self,
        pair: LockedPair,
        request: &StatusRequest,
        actor: &ActorContext,
        now: DateTime<Utc>,
    ) -> Result<PairOutcome, BookingError> {
        if request.target == pair.leg.status {
            return Ok(PairOutcome::unchanged(pair));
        }
        ensure_owner(&pair.leg, actor)?;
        // Customers cancel or send a confirmed booking back for review; everything else is staff work.
        let customer_allowed = request.target.is_cancellation()
            || (pair.leg.status == BookingStatus::Confirmed && request.target == BookingStatus::Pending);
        if !actor.is_privileged && !customer_allowed {
            return Err(BookingError::PrivilegeRequired { action: "Changing booking status" });
        }
        if request.target.is_cancellation() {
            StatusMachine::ensure_allowed(pair.leg.status, request.target)?;
            return self.cancel_jointly(
                pair,
                request.reason.as_deref(),
                request.admin_comment.as_deref(),
                actor,
                now,
                SiblingCancellation::Propagated,
            );
        }

        let LockedPair { mut leg, mut sibling } = pair;
        let change = match self.machine.transition(&mut leg, request, actor, now)? {
            Transition::Unchanged => return Ok(PairOutcome::unchanged(LockedPair { leg, sibling })),
            Transition::Changed(change) => change,
        };

        let mut reason = format!("Status changed from {} to {}", change.from, change.to);
        if let Some(comment) = request.admin_comment.as_deref().filter(|c| !c.trim().is_empty()) {
            reason.push_str(&format!(" - {}", comment.trim()));
        }
        let mut history = vec![AuditTrail::record(
            &leg,
            AuditTrail::action_for_status(change.to),
            actor,
            change.diff,
            Some(reason),
            now,
        )];

        let mut sibling_changed = false;
        if let Some(sib) = sibling.as_mut().filter(|s| !s.status.is_terminal()) {
            if change.to == BookingStatus::Confirmed && leg.is_outbound() && sib.status == BookingStatus::Pending {
                history.push(auto_confirm(sib, &leg, actor, now));
                sibling_changed = true;
            } else if change.to == BookingStatus::TripNotCovered {
                let follow = StatusRequest::to(change.to);
                if let Transition::Changed(sib_change) = self.machine.transition(sib, &follow, actor, now)? {
                    history.push(AuditTrail::record(
                        sib,
                        HistoryAction::StatusChanged,
                        actor,
                        sib_change.diff,
                        Some(format!(
                            "Auto-updated: {} trip {} marked {}",
                            leg_kind(&leg),
                            leg.reference,
                            change.to
                        )),
                        now,
                    ));
                    sibling_changed = true;
                }
            }
        }

        Ok(PairOutcome {
            leg,
            sibling,
            leg_changed: true,
            sibling_changed,
            leg_deleted: false,
            history,
            notification: Some(NotificationPlan {
                kind: NotificationKind::for_status(change.to),
                previous_status: Some(change.from),
                include_sibling: sibling_changed,
            }),
        })
    }

    /// Cancels both legs. If either non-terminal leg is inside its charge
    /// window both are charged; a sibling whose pickup already passed is
    /// cancelled free of charge.
    pub fn cancel_pair(
        &self,
        pair: LockedPair,
        reason: Option<&str>,
        actor: &ActorContext,
        now: DateTime<Utc>,
    ) -> Result<PairOutcome, BookingError> {
        ensure_owner(&pair.leg, actor)?;
        self.cancel_jointly(pair, reason, None, actor, now, SiblingCancellation::Requested)
    }

    /// Cancels only this leg. The charge still considers the sibling's window,
    /// but the sibling itself is not touched.
    pub fn cancel_single_leg(
        &self,
        pair: LockedPair,
        reason: Option<&str>,
        actor: &ActorContext,
        now: DateTime<Utc>,
    ) -> Result<PairOutcome, BookingError> {
        ensure_owner(&pair.leg, actor)?;
        if pair.leg.linked_booking.is_none() {
            return Err(BookingError::NotRoundTrip(pair.leg.id));
        }
        if pair.leg.status.is_terminal() {
            return Err(BookingError::InvalidTransition { from: pair.leg.status, to: BookingStatus::Cancelled });
        }
        let reason = require_reason(pair.leg.id, reason)?;
        let policy = self.policy();
        let leg_outcome = policy.cancellation_outcome(&pair.leg, now);
        if !leg_outcome.allowed {
            return Err(BookingError::PastPickupCancellation {
                booking_id: pair.leg.id,
                hours_until: leg_outcome.hours_until,
            });
        }
        let sibling_hours = pair
            .active_sibling()
            .map(|s| policy.cancellation_outcome(s, now))
            .filter(|o| o.full_charge)
            .map(|o| o.hours_until);
        let charge = if leg_outcome.full_charge || sibling_hours.is_some() {
            ChargeClassification::FullCharge
        } else {
            ChargeClassification::NoCharge
        };

        let LockedPair { mut leg, sibling } = pair;
        let change = self.machine.apply_cancellation(&mut leg, reason, charge, None, now)?;
        let note = cancellation_note(actor, reason, charge, leg_outcome.hours_until, sibling_hours);
        let history = vec![AuditTrail::record(&leg, HistoryAction::Cancelled, actor, change.diff, Some(note), now)];

        Ok(PairOutcome {
            leg,
            sibling,
            leg_changed: true,
            sibling_changed: false,
            leg_deleted: false,
            history,
            notification: Some(NotificationPlan {
                kind: NotificationKind::Cancelled,
                previous_status: Some(change.from),
                include_sibling: false,
            }),
        })
    }

    fn cancel_jointly(
        &self,
        pair: LockedPair,
        reason: Option<&str>,
        comment: Option<&str>,
        actor: &ActorContext,
        now: DateTime<Utc>,
        mode: SiblingCancellation,
    ) -> Result<PairOutcome, BookingError> {
        if pair.leg.status.is_terminal() {
            return Err(BookingError::InvalidTransition { from: pair.leg.status, to: BookingStatus::Cancelled });
        }
        let reason = require_reason(pair.leg.id, reason)?;
        let policy = self.policy();
        let leg_outcome = policy.cancellation_outcome(&pair.leg, now);
        if !leg_outcome.allowed {
            return Err(BookingError::PastPickupCancellation {
                booking_id: pair.leg.id,
                hours_until: leg_outcome.hours_until,
            });
        }
        let sibling_outcome = pair.active_sibling().map(|s| policy.cancellation_outcome(s, now));
        let sibling_hours = sibling_outcome.filter(|o| o.full_charge).map(|o| o.hours_until);
        let charge = if leg_outcome.full_charge || sibling_hours.is_some() {
            ChargeClassification::FullCharge
        } else {
            ChargeClassification::NoCharge
        };

        let LockedPair { mut leg, mut sibling } = pair;
        let change = self.machine.apply_cancellation(&mut leg, reason, charge, comment, now)?;
        let note = cancellation_note(actor, reason, charge, leg_outcome.hours_until, sibling_hours);
        let mut history = vec![AuditTrail::record(&leg, HistoryAction::Cancelled, actor, change.diff, Some(note), now)];

        let mut sibling_changed = false;
        if let (Some(sib), Some(sib_outcome)) = (sibling.as_mut(), sibling_outcome) {
            let sib_charge = if sib_outcome.allowed { charge } else { ChargeClassification::NoCharge };
            let sib_reason = match mode {
                SiblingCancellation::Requested => reason.to_string(),
                SiblingCancellation::Propagated => format!(
                    "Auto-cancelled: {} trip {} was cancelled. Original reason: {}",
                    leg_kind(&leg),
                    leg.reference,
                    reason
                ),
            };
            let sib_change = self.machine.apply_cancellation(sib, &sib_reason, sib_charge, None, now)?;
            history.push(AuditTrail::record(
                sib,
                HistoryAction::Cancelled,
                actor,
                sib_change.diff,
                Some(format!("Cancelled together with {} trip {}", leg_kind(&leg), leg.reference)),
                now,
            ));
            sibling_changed = true;
        }

        Ok(PairOutcome {
            leg,
            sibling,
            leg_changed: true,
            sibling_changed,
            leg_deleted: false,
            history,
            notification: Some(NotificationPlan {
                kind: NotificationKind::Cancelled,
                previous_status: Some(change.from),
                include_sibling: sibling_changed,
            }),
        })
    }

    /// Field edit of one leg. Outbound edits carry the shared fields over to a
    /// non-terminal return leg; return-leg edits stay on the return leg.
    pub fn apply_changes(
        &self,
        pair: LockedPair,
        changes: &BookingChanges,
        actor: &ActorContext,
        now: DateTime<Utc>,
    ) -> Result<PairOutcome, BookingError> {
        let LockedPair { leg, mut sibling } = pair;
        if leg.status.is_terminal() {
            return Err(BookingError::TerminalStateEditAttempt { booking_id: leg.id, status: leg.status });
        }

        let mut changes = changes.clone();
        ensure_owner(&leg, actor)?;
        if !actor.is_privileged {
            if !self.policy().customer_may_edit(&leg, now) {
                return Err(BookingError::EditWindowClosed {
                    booking_id: leg.id,
                    hours_until: self.policy().hours_until_pickup(&leg, now),
                });
            }
            changes.admin_comment = None;
        }

        let mut updated = leg.clone();
        changes.apply_to(&mut updated);
        normalize(&mut updated);

        // Compared against the persisted row: a save that repeats current
        // values is not a change.
        let field_diff = BookingDiff::between(&leg, &updated);
        if !field_diff.is_empty() {
            validate_booking(&updated)?;
            let moved = field_diff.contains(BookingField::PickUpDate) || field_diff.contains(BookingField::PickUpTime);
            if moved && self.policy().checked_pickup_instant(&updated)? <= now {
                return Err(BookingError::PastPickupBooking { pick_up: updated.pick_up_at() });
            }
        }

        let business_change = field_diff.clone().without(&[BookingField::AdminComment]);
        let status_target = if actor.is_privileged {
            (updated.status == BookingStatus::Pending).then_some(BookingStatus::Confirmed)
        } else if updated.status == BookingStatus::Confirmed && !business_change.is_empty() {
            Some(BookingStatus::Pending)
        } else {
            None
        };
        if let Some(target) = status_target {
            StatusMachine::ensure_allowed(updated.status, target)?;
            updated.status = target;
            if target == BookingStatus::Confirmed {
                updated.admin_reviewed = true;
            }
        }

        let diff = BookingDiff::between(&leg, &updated);
        if diff.is_empty() {
            return Ok(PairOutcome::unchanged(LockedPair { leg, sibling }));
        }
        updated.updated_at = now;

        let status_changed = diff.contains(BookingField::Status);
        let reason = match status_target {
            Some(BookingStatus::Pending) => format!("Modified by {}; status reset to Pending for review", actor.id),
            Some(BookingStatus::Confirmed) => format!("Modified and confirmed by {}", actor.id),
            _ => format!("Modified by {}", actor.id),
        };
        let action = if status_changed { HistoryAction::StatusChanged } else { HistoryAction::Updated };
        let mut history = vec![AuditTrail::record(&updated, action, actor, diff, Some(reason), now)];

        let mut sibling_changed = false;
        if updated.is_outbound() {
            if let Some(sib) = sibling.as_mut().filter(|s| !s.status.is_terminal()) {
                let mut synced = sib.clone();
                return_leg_changes(&changes).apply_to(&mut synced);
                normalize(&mut synced);
                if status_changed && synced.status.can_transition_to(updated.status) {
                    synced.status = updated.status;
                    if updated.status == BookingStatus::Confirmed {
                        synced.admin_reviewed = true;
                    }
                }
                let sib_diff = BookingDiff::between(sib, &synced);
                let sib_moved =
                    sib_diff.contains(BookingField::PickUpDate) || sib_diff.contains(BookingField::PickUpTime);
                let outbound_moved =
                    field_diff.contains(BookingField::PickUpDate) || field_diff.contains(BookingField::PickUpTime);
                if sib_moved || outbound_moved {
                    let return_at = self.policy().checked_pickup_instant(&synced)?;
                    if sib_moved && return_at <= now {
                        return Err(BookingError::PastPickupBooking { pick_up: synced.pick_up_at() });
                    }
                    if return_at <= self.policy().checked_pickup_instant(&updated)? {
                        return Err(BookingError::validation(
                            "return_date",
                            "return pickup must be after the outbound pickup",
                        ));
                    }
                }
                if !sib_diff.is_empty() {
                    validate_booking(&synced)?;
                    synced.updated_at = now;
                    let sib_action = if sib_diff.contains(BookingField::Status) {
                        HistoryAction::StatusChanged
                    } else {
                        HistoryAction::Updated
                    };
                    history.push(AuditTrail::record(
                        &synced,
                        sib_action,
                        actor,
                        sib_diff,
                        Some(format!("Synchronized from outbound trip {}", updated.reference)),
                        now,
                    ));
                    *sib = synced;
                    sibling_changed = true;
                }
            }
        }

        let notification = status_changed.then(|| NotificationPlan {
            kind: NotificationKind::for_status(updated.status),
            previous_status: Some(leg.status),
            include_sibling: sibling_changed,
        });

        Ok(PairOutcome {
            leg: updated,
            sibling,
            leg_changed: true,
            sibling_changed,
            leg_deleted: false,
            history,
            notification,
        })
    }

    /// Removes a leg. The sibling survives with its link cleared.
    pub fn remove_leg(
        &self,
        pair: LockedPair,
        reason: Option<&str>,
        actor: &ActorContext,
        now: DateTime<Utc>,
    ) -> Result<PairOutcome, BookingError> {
        if !actor.is_privileged {
            return Err(BookingError::PrivilegeRequired { action: "Deleting a booking" });
        }
        let LockedPair { leg, mut sibling } = pair;
        let reason = reason.map(str::trim).filter(|r| !r.is_empty()).unwrap_or("Booking deleted");
        let mut history = vec![AuditTrail::record(
            &leg,
            HistoryAction::Deleted,
            actor,
            BookingDiff::default(),
            Some(reason.to_string()),
            now,
        )];

        let mut sibling_changed = false;
        if let Some(sib) = sibling.as_mut() {
            let before = sib.clone();
            sib.linked_booking = None;
            sib.updated_at = now;
            history.push(AuditTrail::record(
                sib,
                HistoryAction::Updated,
                actor,
                BookingDiff::between(&before, sib),
                Some(format!("Linked {} trip {} was deleted", leg_kind(&leg), leg.reference)),
                now,
            ));
            sibling_changed = true;
        }

        Ok(PairOutcome {
            leg,
            sibling,
            leg_changed: false,
            sibling_changed,
            leg_deleted: true,
            history,
            notification: None,
        })
    }
}

fn auto_confirm(sibling: &mut Booking, outbound: &Booking, actor: &ActorContext, now: DateTime<Utc>) -> BookingHistory {
    let before = sibling.clone();
    sibling.status = BookingStatus::Confirmed;
    sibling.admin_reviewed = true;
    sibling.admin_comment = Some("Auto-confirmed with outbound trip.".to_string());
    sibling.updated_at = now;
    AuditTrail::record(
        sibling,
        HistoryAction::StatusChanged,
        actor,
        BookingDiff::between(&before, sibling),
        Some(format!("Auto-confirmed with outbound trip #{}", outbound.reference)),
        now,
    )
}

fn cancellation_note(
    actor: &ActorContext,
    reason: &str,
    charge: ChargeClassification,
    hours_until: f64,
    sibling_hours: Option<f64>,
) -> String {
    let notice = format_hours_until(hours_until);
    let billing = match (charge, sibling_hours) {
        (ChargeClassification::NoCharge, _) => format!("No charge ({notice} notice)."),
        (ChargeClassification::FullCharge, Some(linked)) if hours_until > linked => format!(
            "Full charge applied ({notice} notice; linked trip {}).",
            format_hours_until(linked)
        ),
        (ChargeClassification::FullCharge, _) => format!("Full charge applied ({notice} notice)."),
    };
    format!("Trip cancelled by {}. Reason: {}. {}", actor.id, reason, billing)
}

/// Outbound edits expressed in terms of the return leg.
pub fn return_leg_changes(changes: &BookingChanges) -> BookingChanges {
    BookingChanges {
        passenger_name: changes.passenger_name.clone(),
        phone_number: changes.phone_number.clone(),
        passenger_email: changes.passenger_email.clone(),
        number_of_passengers: changes.number_of_passengers,
        vehicle_type: changes.vehicle_type,
        pick_up_date: changes.return_date.flatten(),
        pick_up_time: changes.return_time.flatten(),
        pick_up_address: changes.return_pickup_address.clone().flatten(),
        drop_off_address: changes.return_dropoff_address.clone(),
        flight_number: changes.return_flight_number.clone(),
        notes: changes.return_special_requests.clone(),
        ..BookingChanges::default()
    }
}
