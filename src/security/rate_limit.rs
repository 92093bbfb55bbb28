//! Fixed-window rate limiting backed by the cache store's atomic `incr`.
//!
//! Fails open: when the cache is unavailable, requests are allowed through
//! rather than blocked, since an outage in the cache shouldn't become an
//! outage in the proxy.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cache::{keys, CacheStore};

pub struct RateLimiter {
    cache: Arc<dyn CacheStore>,
    window: Duration,
    max_requests: u64,
}

pub enum RateLimitDecision {
    Allow,
    Deny,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn CacheStore>, window: Duration, max_requests: u64) -> Self {
        Self {
            cache,
            window,
            max_requests,
        }
    }

    pub async fn check(&self, client_key: &str) -> RateLimitDecision {
        let key = keys::rate_limit(client_key);
        match self.cache.incr(&key, self.window).await {
            Ok(count) => {
                if count as u64 > self.max_requests {
                    RateLimitDecision::Deny
                } else {
                    RateLimitDecision::Allow
                }
            }
            Err(e) => {
                warn!(error = %e, "rate limiter cache unavailable, failing open");
                RateLimitDecision::Allow
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct FakeCache {
        counter: AtomicI64,
        fail: bool,
    }

    #[async_trait]
    impl CacheStore for FakeCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
            Ok(())
        }
        async fn del(&self, _key: &str) -> Result<(), CacheError> {
            Ok(())
        }
        async fn incr(&self, _key: &str, _ttl: Duration) -> Result<i64, CacheError> {
            if self.fail {
                return Err(CacheError::Unavailable("down".to_string()));
            }
            Ok(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
        }
        async fn ping(&self) -> Result<(), CacheError> {
            if self.fail {
                Err(CacheError::Unavailable("down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn denies_after_max_requests() {
        let cache = Arc::new(FakeCache {
            counter: AtomicI64::new(0),
            fail: false,
        });
        let limiter = RateLimiter::new(cache, Duration::from_secs(60), 2);
        assert!(matches!(limiter.check("a").await, RateLimitDecision::Allow));
        assert!(matches!(limiter.check("a").await, RateLimitDecision::Allow));
        assert!(matches!(limiter.check("a").await, RateLimitDecision::Deny));
    }

    #[tokio::test]
    async fn fails_open_when_cache_unavailable() {
        let cache = Arc::new(FakeCache {
            counter: AtomicI64::new(0),
            fail: true,
        });
        let limiter = RateLimiter::new(cache, Duration::from_secs(60), 1);
        assert!(matches!(limiter.check("a").await, RateLimitDecision::Allow));
    }
}
