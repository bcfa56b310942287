use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{RateLimitAlgorithmImpl, RateLimitConfig, RateLimitResult};
use crate::cache::{keys, AtomicRateLimitOp, AtomicRateLimitOutcome, CacheBackend};
use crate::domain::RateLimitAlgorithmKind;
use crate::error::CoreResult;

/// §4.1 "Token bucket": refills at `refill_rate` tokens/sec up to
/// `burst_capacity`, debiting one token per allowed call. The refill+take is
/// one atomic unit via `CacheBackend::atomic_update` so two concurrent
/// callers can't both read the same token count and both be admitted.
pub struct TokenBucketRateLimiter;

#[async_trait]
impl RateLimitAlgorithmImpl for TokenBucketRateLimiter {
    async fn check(
        &self,
        cache: &dyn CacheBackend,
        base_key: &str,
        config: &RateLimitConfig,
    ) -> CoreResult<RateLimitResult> {
        let bucket_key = keys::rate_limit_bucket(base_key);
        let now = Utc::now();
        let now_ms = now.timestamp_millis();

        let outcome = cache
            .atomic_update(AtomicRateLimitOp::TokenBucketTake {
                key: &bucket_key,
                now_ms,
                capacity: config.burst_capacity as f64,
                refill_rate: config.refill_rate,
                ttl: Duration::from_secs(3600),
            })
            .await?;
        let AtomicRateLimitOutcome::TokenBucket { allowed, tokens_remaining } = outcome else {
            unreachable!("atomic_update(TokenBucketTake) always returns TokenBucket");
        };

        if !allowed {
            let deficit = 1.0 - tokens_remaining;
            let retry_secs = (deficit / config.refill_rate).ceil().max(1.0) as u64;
            return Ok(RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_time: now + chrono::Duration::seconds(retry_secs as i64),
                retry_after: Some(Duration::from_secs(retry_secs)),
                algorithm: RateLimitAlgorithmKind::TokenBucket,
                metadata: HashMap::new(),
            });
        }

        Ok(RateLimitResult {
            allowed: true,
            remaining: tokens_remaining.floor() as i64,
            reset_time: now,
            retry_after: None,
            algorithm: RateLimitAlgorithmKind::TokenBucket,
            metadata: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;

    #[tokio::test]
    async fn allowed_count_is_bounded_by_burst_plus_refill() {
        let cache = InMemoryCacheBackend::new();
        let config = RateLimitConfig {
            burst_capacity: 3,
            refill_rate: 0.0,
            ..RateLimitConfig::default()
        };
        let limiter = TokenBucketRateLimiter;

        let mut allowed = 0;
        for _ in 0..5 {
            if limiter.check(&cache, "svc", &config).await.unwrap().allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3);
    }
}
