use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{RateLimitAlgorithmImpl, RateLimitConfig, RateLimitResult};
use crate::cache::{AtomicRateLimitOp, AtomicRateLimitOutcome, CacheBackend};
use crate::domain::RateLimitAlgorithmKind;
use crate::error::CoreResult;

/// §4.1 "Sliding window": a time-indexed ordered set of request marks per
/// bucket. Each check drops marks older than `now - window`, counts what
/// remains, and either denies or inserts a fresh mark — all as one atomic
/// unit via `CacheBackend::atomic_update` so concurrent callers against the
/// same bucket can't both observe room for the same slot (§4.1, §5).
pub struct SlidingWindowRateLimiter;

#[async_trait]
impl RateLimitAlgorithmImpl for SlidingWindowRateLimiter {
    async fn check(
        &self,
        cache: &dyn CacheBackend,
        base_key: &str,
        config: &RateLimitConfig,
    ) -> CoreResult<RateLimitResult> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis() as f64;
        let window_ms = (config.window_seconds * 1000) as f64;
        let limit = config.requests_per_minute as i64;
        let member = format!("{now_ms}:{}", uuid::Uuid::new_v4());

        let outcome = cache
            .atomic_update(AtomicRateLimitOp::SlidingWindowAdmit {
                key: base_key,
                now_ms,
                window_ms,
                limit,
                member,
                ttl: Duration::from_secs(config.window_seconds + 5),
            })
            .await?;
        let AtomicRateLimitOutcome::SlidingWindow { allowed, count } = outcome else {
            unreachable!("atomic_update(SlidingWindowAdmit) always returns SlidingWindow");
        };

        Ok(RateLimitResult {
            allowed,
            remaining: (limit - count).max(0),
            reset_time: now + chrono::Duration::seconds(config.window_seconds as i64),
            retry_after: if allowed { None } else { Some(Duration::from_secs(config.window_seconds)) },
            algorithm: RateLimitAlgorithmKind::SlidingWindow,
            metadata: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;

    #[tokio::test]
    async fn at_most_limit_requests_allowed_in_one_burst() {
        let cache = InMemoryCacheBackend::new();
        let config = RateLimitConfig {
            requests_per_minute: 5,
            window_seconds: 1,
            ..RateLimitConfig::default()
        };
        let limiter = SlidingWindowRateLimiter;

        let mut allowed = 0;
        for _ in 0..7 {
            let result = limiter.check(&cache, "k", &config).await.unwrap();
            if result.allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }
}
