use chrono::{DateTime, Utc};
use uuid::Uuid;

use chauffeur_core::ActorContext;
use chauffeur_shared::{Booking, BookingDiff, BookingStatus, ChargeClassification};

use crate::error::BookingError;
use crate::policy::{CancellationOutcome, CancellationPolicy};

/// A requested status change with its optional annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRequest {
    pub target: BookingStatus,
    pub reason: Option<String>,
    pub admin_comment: Option<String>,
}

impl StatusRequest {
    pub fn to(target: BookingStatus) -> Self {
        Self { target, reason: None, admin_comment: None }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.admin_comment = Some(comment.into());
        self
    }
}

/// What a successful status change did to the booking.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub from: BookingStatus,
    /// Final status; can differ from the requested one when the policy upgrades
    /// a cancellation to a charged cancellation.
    pub to: BookingStatus,
    pub outcome: Option<CancellationOutcome>,
    pub diff: BookingDiff,
}

#[derive(Debug, Clone)]
pub enum Transition {
    Unchanged,
    Changed(StatusChange),
}

/// Enforces the status transition table and applies cancellation policy.
#[derive(Debug, Clone)]
pub struct StatusMachine {
    policy: CancellationPolicy,
}

impl StatusMachine {
    pub fn new(policy: CancellationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CancellationPolicy {
        &self.policy
    }

    /// Errors with `InvalidTransition` unless the table permits `from -> to`.
    pub fn ensure_allowed(from: BookingStatus, to: BookingStatus) -> Result<(), BookingError> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(BookingError::InvalidTransition { from, to })
        }
    }

    /// Applies `request` to `booking` in place. On error the booking is untouched.
    pub fn transition(
        &self,
        booking: &mut Booking,
        request: &StatusRequest,
        actor: &ActorContext,
        now: DateTime<Utc>,
    ) -> Result<Transition, BookingError> {
        if request.target == booking.status {
            return Ok(Transition::Unchanged);
        }
        Self::ensure_allowed(booking.status, request.target)?;

        if request.target.is_cancellation() {
            let reason = require_reason(booking.id, request.reason.as_deref())?;
            let outcome = self.policy.cancellation_outcome(booking, now);
            if !outcome.allowed {
                return Err(BookingError::PastPickupCancellation {
                    booking_id: booking.id,
                    hours_until: outcome.hours_until,
                });
            }
            return self
                .apply_cancellation(booking, reason, outcome.charge(), request.admin_comment.as_deref(), now)
                .map(|change| Transition::Changed(StatusChange { outcome: Some(outcome), ..change }));
        }

        let before = booking.clone();
        booking.status = request.target;
        if request.target == BookingStatus::Confirmed && actor.is_privileged {
            booking.admin_reviewed = true;
        }
        set_comment(booking, request.admin_comment.as_deref());
        booking.updated_at = now;

        Ok(Transition::Changed(StatusChange {
            from: before.status,
            to: booking.status,
            outcome: None,
            diff: BookingDiff::between(&before, booking),
        }))
    }

    /// Cancels with an already decided charge classification. Used directly
    /// when the charge depends on more than this one leg.
    pub fn apply_cancellation(
        &self,
        booking: &mut Booking,
        reason: &str,
        charge: ChargeClassification,
        comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, BookingError> {
        Self::ensure_allowed(booking.status, BookingStatus::Cancelled)?;

        let before = booking.clone();
        booking.status = match charge {
            ChargeClassification::FullCharge => BookingStatus::CancelledFullCharge,
            ChargeClassification::NoCharge => BookingStatus::Cancelled,
        };
        booking.cancellation_reason = Some(reason.to_string());
        booking.charge = Some(charge);
        set_comment(booking, comment);
        booking.updated_at = now;

        Ok(StatusChange {
            from: before.status,
            to: booking.status,
            outcome: None,
            diff: BookingDiff::between(&before, booking),
        })
    }
}

pub(crate) fn require_reason(booking_id: Uuid, reason: Option<&str>) -> Result<&str, BookingError> {
    match reason.map(str::trim) {
        Some(reason) if !reason.is_empty() => Ok(reason),
        _ => Err(BookingError::MissingCancellationReason { booking_id }),
    }
}

fn set_comment(booking: &mut Booking, comment: Option<&str>) {
    if let Some(comment) = comment.map(str::trim).filter(|c| !c.is_empty()) {
        booking.admin_comment = Some(comment.to_string());
    }
}
