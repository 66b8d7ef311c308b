use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dashboard counters derived from the booking table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DashboardStats {
    pub total: u64,
    pub active: u64,
    pub pending: u64,
    pub confirmed: u64,
    pub today: u64,
    pub upcoming: u64,
    pub completed: u64,
    pub computed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
#[error("Stats cache unavailable: {0}")]
pub struct CacheError(pub String);

/// Short-lived cache for dashboard counters. Invalidated after every
/// committed booking mutation.
#[async_trait]
pub trait StatsCache: Send + Sync {
    async fn get(&self) -> Result<Option<DashboardStats>, CacheError>;
    async fn put(&self, stats: &DashboardStats, ttl_seconds: u64) -> Result<(), CacheError>;
    async fn invalidate(&self) -> Result<(), CacheError>;
}

/// Cache that never holds anything; every read goes to the repository.
pub struct NoopStatsCache;

#[async_trait]
impl StatsCache for NoopStatsCache {
    async fn get(&self) -> Result<Option<DashboardStats>, CacheError> {
        Ok(None)
    }

    async fn put(&self, _stats: &DashboardStats, _ttl_seconds: u64) -> Result<(), CacheError> {
        Ok(())
    }

    async fn invalidate(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
