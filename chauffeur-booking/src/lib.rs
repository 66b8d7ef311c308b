pub mod audit;
pub mod error;
pub mod intake;
pub mod policy;
pub mod reference;
pub mod round_trip;
pub mod service;
pub mod status;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use audit::AuditTrail;
pub use error::BookingError;
pub use policy::{format_hours_until, CancellationOutcome, CancellationPolicy};
pub use round_trip::{LockedPair, NotificationPlan, PairOutcome, RoundTripCoordinator};
pub use service::{BookingService, BookingUpdate, CancellationQuote, WriteOptions};
pub use status::{StatusChange, StatusMachine, StatusRequest, Transition};
