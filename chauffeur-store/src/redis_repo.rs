use async_trait::async_trait;
use redis::{AsyncCommands, RedisResult};
use tracing::debug;

use chauffeur_core::{CacheError, DashboardStats, StatsCache};

const DASHBOARD_STATS_KEY: &str = "chauffeur:dashboard:stats";

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    pub async fn get_string(&self, key: &str) -> RedisResult<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.get(key).await
    }

    pub async fn set_string(&self, key: &str, value: &str, ttl_seconds: u64) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await
    }

    pub async fn del_key(&self, key: &str) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del(key).await
    }
}

fn cache_error(e: impl std::fmt::Display) -> CacheError {
    CacheError(e.to_string())
}

/// Dashboard counters stored as one JSON value with a TTL.
#[async_trait]
impl StatsCache for RedisClient {
    async fn get(&self) -> Result<Option<DashboardStats>, CacheError> {
        let Some(raw) = self.get_string(DASHBOARD_STATS_KEY).await.map_err(cache_error)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(stats) => Ok(Some(stats)),
            Err(e) => {
                // Written by an older layout; treat as a miss.
                debug!("Discarding unreadable dashboard stats: {}", e);
                Ok(None)
            }
        }
    }

    async fn put(&self, stats: &DashboardStats, ttl_seconds: u64) -> Result<(), CacheError> {
        let raw = serde_json::to_string(stats).map_err(cache_error)?;
        self.set_string(DASHBOARD_STATS_KEY, &raw, ttl_seconds.max(1))
            .await
            .map_err(cache_error)
    }

    async fn invalidate(&self) -> Result<(), CacheError> {
        self.del_key(DASHBOARD_STATS_KEY).await.map_err(cache_error)
    }
}
