pub mod cache;
pub mod clock;
pub mod identity;
pub mod notify;
pub mod repository;
pub mod rules;

pub use cache::{CacheError, DashboardStats, NoopStatsCache, StatsCache};
pub use clock::{Clock, FixedClock, SystemClock};
pub use identity::ActorContext;
pub use notify::{LoggingNotifier, NotificationPort, NotifyError, RecordingNotifier};
pub use repository::{BookingRepository, RepositoryError};
pub use rules::BusinessRules;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
