pub mod models;
pub mod pii;

pub use models::booking::{
    Booking, BookingChanges, BookingDraft, BookingStatus, ChargeClassification, ParseEnumError,
    TripType, VehicleType,
};
pub use models::events::{BookingNotification, NotificationKind};
pub use models::history::{
    BookingDiff, BookingField, BookingHistory, BookingSnapshot, FieldChange, HistoryAction,
};
pub use pii::Masked;
