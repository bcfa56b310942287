use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{RateLimitAlgorithmImpl, RateLimitConfig, RateLimitResult};
use crate::cache::CacheBackend;
use crate::domain::RateLimitAlgorithmKind;
use crate::error::CoreResult;

/// §4.1 "Fixed window": a simple counter keyed per floored time quantum.
pub struct FixedWindowRateLimiter;

#[async_trait]
impl RateLimitAlgorithmImpl for FixedWindowRateLimiter {
    async fn check(
        &self,
        cache: &dyn CacheBackend,
        base_key: &str,
        config: &RateLimitConfig,
    ) -> CoreResult<RateLimitResult> {
        let now = Utc::now();
        let window = config.window_seconds.max(1);
        let quantum = (now.timestamp() as u64) / window;
        let key = format!("{base_key}:{quantum}");
        let limit = config.requests_per_minute as i64;

        let count = cache.incr(&key, Duration::from_secs(window + 5)).await?;
        let reset_time = now + chrono::Duration::seconds((window - (now.timestamp() as u64 % window)) as i64);

        if count > limit {
            return Ok(RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_time,
                retry_after: Some(Duration::from_secs(window)),
                algorithm: RateLimitAlgorithmKind::FixedWindow,
                metadata: HashMap::new(),
            });
        }

        Ok(RateLimitResult {
            allowed: true,
            remaining: (limit - count).max(0),
            reset_time,
            retry_after: None,
            algorithm: RateLimitAlgorithmKind::FixedWindow,
            metadata: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;

    #[tokio::test]
    async fn counter_denies_once_limit_exceeded() {
        let cache = InMemoryCacheBackend::new();
        let config = RateLimitConfig {
            requests_per_minute: 2,
            window_seconds: 60,
            ..RateLimitConfig::default()
        };
        let limiter = FixedWindowRateLimiter;

        assert!(limiter.check(&cache, "k", &config).await.unwrap().allowed);
        assert!(limiter.check(&cache, "k", &config).await.unwrap().allowed);
        assert!(!limiter.check(&cache, "k", &config).await.unwrap().allowed);
    }
}
