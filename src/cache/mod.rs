//! Key/value cache store backing the resolution pipeline.
//!
//! `CacheStore` is the contract the resolver, rate limiter and health probe
//! all depend on. `RedisCacheStore` is the only implementation; it treats
//! connection failure and operation timeout as `CacheError::Unavailable`,
//! distinct from `CacheError::Miss` (key absent), so callers can fail open
//! on the former and fail closed on the latter.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns `Ok(None)` on a clean miss, `Err` only when the cache itself
    /// could not be reached in time.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    async fn del(&self, key: &str) -> CacheResult<()>;

    /// Atomically increments `key` by 1, creating it at 1 with `ttl` if
    /// absent, returning the post-increment value. Used by the fixed-window
    /// rate limiter.
    async fn incr(&self, key: &str, ttl: Duration) -> CacheResult<i64>;

    async fn ping(&self) -> CacheResult<()>;
}

pub struct RedisCacheStore {
    manager: ConnectionManager,
    operation_timeout: Duration,
}

impl RedisCacheStore {
    pub async fn connect(redis_url: &str, operation_timeout: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            manager,
            operation_timeout,
        })
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> CacheResult<T> {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::Unavailable(e.to_string())),
            Err(_) => Err(CacheError::Unavailable("operation timed out".to_string())),
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.manager.clone();
        self.with_timeout(conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        let seconds = ttl.as_secs().max(1);
        self.with_timeout(conn.set_ex(key, value, seconds)).await
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        self.with_timeout(conn.del(key)).await
    }

    async fn incr(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        let mut conn = self.manager.clone();
        let seconds = ttl.as_secs().max(1) as usize;
        let script = redis::Script::new(
            r"
            local count = redis.call('INCR', KEYS[1])
            if count == 1 then
                redis.call('EXPIRE', KEYS[1], ARGV[1])
            end
            return count
            ",
        );
        self.with_timeout(
            script
                .key(key)
                .arg(seconds)
                .invoke_async::<_, i64>(&mut conn),
        )
        .await
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        self.with_timeout(redis::cmd("PING").query_async(&mut conn))
            .await
    }
}

/// Namespaced key builder so every caller composes cache keys the same way:
/// `{kind}:{platform}:{video_id}[:{quality}]`.
pub mod keys {
    use crate::models::Platform;

    pub fn video_info(platform: Platform, video_id: &str) -> String {
        format!("info:{platform}:{video_id}")
    }

    pub fn stream_handle(platform: Platform, video_id: &str, quality_label: &str) -> String {
        format!("stream:{platform}:{video_id}:{quality_label}")
    }

    pub fn rate_limit(client_key: &str) -> String {
        format!("rl:{client_key}")
    }
}
