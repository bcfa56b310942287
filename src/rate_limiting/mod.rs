//! Advanced per-provider rate limiter (C4), grounded on
//! `original_source/src/infra_mind/core/advanced_rate_limiter.py`. Exposes
//! `RateLimiter::check_limit(service, scope, identifier)` over four
//! pluggable algorithms; atomicity per bucket is delegated to
//! `cache::CacheBackend`'s primitives rather than a client-side lock, so it
//! holds across instances sharing the same cache (§5).

mod adaptive;
mod fixed_window;
mod sliding_window;
mod token_bucket;

pub use adaptive::AdaptiveRateLimiter;
pub use fixed_window::FixedWindowRateLimiter;
pub use sliding_window::SlidingWindowRateLimiter;
pub use token_bucket::TokenBucketRateLimiter;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::{keys, CacheBackend};
use crate::domain::{RateLimitAlgorithmKind, RateLimitScope};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: i64,
    pub reset_time: DateTime<Utc>,
    pub retry_after: Option<Duration>,
    pub algorithm: RateLimitAlgorithmKind,
    pub metadata: HashMap<String, String>,
}

impl RateLimitResult {
    pub fn into_result(self) -> CoreResult<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(CoreError::RateLimitExceeded {
                retry_after: self.retry_after.unwrap_or(Duration::from_secs(60)),
            })
        }
    }
}

/// Per-service configuration (§6 "Environment / config" per-service
/// resilience/rate-limit fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub algorithm: RateLimitAlgorithmKind,
    pub requests_per_minute: u32,
    pub burst_capacity: u32,
    pub refill_rate: f64,
    pub window_seconds: u64,
    pub adaptive_threshold: f64,
    pub backoff_factor: f64,
    pub recovery_factor: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            algorithm: RateLimitAlgorithmKind::SlidingWindow,
            requests_per_minute: 60,
            burst_capacity: 10,
            refill_rate: 1.0,
            window_seconds: 60,
            adaptive_threshold: 0.8,
            backoff_factor: 0.5,
            recovery_factor: 1.2,
        }
    }
}

#[async_trait]
pub(crate) trait RateLimitAlgorithmImpl: Send + Sync {
    async fn check(
        &self,
        cache: &dyn CacheBackend,
        base_key: &str,
        config: &RateLimitConfig,
    ) -> CoreResult<RateLimitResult>;
}

/// Hashes a PER_IP identifier before it becomes part of a cache key (§4.1).
pub fn hash_identifier(identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

fn scope_tag(scope: RateLimitScope) -> &'static str {
    match scope {
        RateLimitScope::Global => "global",
        RateLimitScope::PerService => "service",
        RateLimitScope::PerUser => "user",
        RateLimitScope::PerIp => "ip",
    }
}

pub struct RateLimiter {
    cache: Arc<dyn CacheBackend>,
    configs: HashMap<String, RateLimitConfig>,
    default_config: RateLimitConfig,
    sliding_window: SlidingWindowRateLimiter,
    token_bucket: TokenBucketRateLimiter,
    fixed_window: FixedWindowRateLimiter,
    adaptive: AdaptiveRateLimiter,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn CacheBackend>, configs: HashMap<String, RateLimitConfig>) -> Self {
        Self {
            cache,
            configs,
            default_config: RateLimitConfig::default(),
            sliding_window: SlidingWindowRateLimiter,
            token_bucket: TokenBucketRateLimiter,
            fixed_window: FixedWindowRateLimiter,
            adaptive: AdaptiveRateLimiter::new(),
        }
    }

    pub fn configure(&mut self, service: impl Into<String>, config: RateLimitConfig) {
        self.configs.insert(service.into(), config);
    }

    fn config_for(&self, service: &str) -> &RateLimitConfig {
        self.configs.get(service).unwrap_or(&self.default_config)
    }

    pub async fn check_limit(
        &self,
        service: &str,
        scope: RateLimitScope,
        identifier: Option<&str>,
    ) -> CoreResult<RateLimitResult> {
        let config = self.config_for(service);
        let ident = match scope {
            RateLimitScope::PerIp => identifier.map(hash_identifier),
            _ => identifier.map(|s| s.to_string()),
        };
        let base_key = keys::rate_limit(service, scope_tag(scope), ident.as_deref());

        let result = match config.algorithm {
            RateLimitAlgorithmKind::SlidingWindow => {
                self.sliding_window.check(self.cache.as_ref(), &base_key, config).await?
            }
            RateLimitAlgorithmKind::TokenBucket => {
                self.token_bucket.check(self.cache.as_ref(), &base_key, config).await?
            }
            RateLimitAlgorithmKind::FixedWindow => {
                self.fixed_window.check(self.cache.as_ref(), &base_key, config).await?
            }
            RateLimitAlgorithmKind::Adaptive => {
                self.adaptive.check(self.cache.as_ref(), &base_key, config).await?
            }
        };
        result.into_result()
    }

    /// Feeds an observed call outcome back into the adaptive algorithm's
    /// instance-local success tracker (Open Question §9.2 resolution: see
    /// DESIGN.md).
    pub fn record_outcome(&self, service: &str, success: bool) {
        self.adaptive.record_outcome(service, success);
    }

    pub async fn reset(&self, service: &str, scope: RateLimitScope, identifier: Option<&str>) -> CoreResult<()> {
        let ident = match scope {
            RateLimitScope::PerIp => identifier.map(hash_identifier),
            _ => identifier.map(|s| s.to_string()),
        };
        let base_key = keys::rate_limit(service, scope_tag(scope), ident.as_deref());
        self.cache.delete(&base_key).await?;
        self.cache.delete(&keys::rate_limit_bucket(&base_key)).await?;
        self.cache.delete(&keys::rate_limit_adaptive(&base_key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;

    #[tokio::test]
    async fn per_ip_scope_hashes_identifier_into_key() {
        let cache = Arc::new(InMemoryCacheBackend::new());
        let limiter = RateLimiter::new(cache, HashMap::new());
        let result = limiter
            .check_limit("aws_pricing", RateLimitScope::PerIp, Some("203.0.113.7"))
            .await
            .unwrap();
        assert!(result.allowed);
    }
}
