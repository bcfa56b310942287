use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::cache::{keys, CacheBackend};
use crate::error::CoreError;

use super::OutcomeSource;

#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub fallback_data_ttl: Duration,
    pub cache_staleness_threshold: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            fallback_data_ttl: Duration::from_secs(300),
            cache_staleness_threshold: Duration::from_secs(3600),
        }
    }
}

/// §4.2 "Fallback manager (C7)": recent-cache → stale-cache → default →
/// degraded-mode synthetic, tried in that order.
pub struct FallbackManager {
    cache: Arc<dyn CacheBackend>,
    config: FallbackConfig,
}

impl FallbackManager {
    pub fn new(cache: Arc<dyn CacheBackend>, config: FallbackConfig) -> Self {
        Self { cache, config }
    }

    /// Records a successful primary result so later failures can fall back
    /// to it. Written to both the "recent" key (short TTL) and a "stale" key
    /// (long TTL) at the same time, per §4.2's "(1) ... opportunistically
    /// cleaned when older than 2×ttl" note — here the stale copy's own TTL
    /// plays that cleanup role instead of a separate sweep.
    pub async fn record_success<T: Serialize>(&self, fallback_key: &str, value: &T) -> Result<(), CoreError> {
        let serialized = serde_json::to_string(value).map_err(|e| CoreError::Other(e.into()))?;
        let recent_key = keys::fallback(fallback_key);
        let stale_key = format!("{recent_key}:stale");
        self.cache
            .set_ex(&recent_key, serialized.clone(), self.config.fallback_data_ttl)
            .await?;
        self.cache
            .set_ex(&stale_key, serialized, self.config.cache_staleness_threshold)
            .await
    }

    /// §4.2 points (1)–(4). `default_data` is the caller-supplied default for
    /// this specific call; `degraded_synthetic` builds the keyed synthetic
    /// shape (e.g. "pricing" → `{services: [], ...}`) when nothing else hits.
    pub async fn resolve<T: DeserializeOwned>(
        &self,
        fallback_key: &str,
        default_data: Option<T>,
        degraded_synthetic: impl FnOnce() -> Option<T>,
    ) -> Result<(T, OutcomeSource, bool), CoreError> {
        let recent_key = keys::fallback(fallback_key);
        if let Some(raw) = self.cache.get(&recent_key).await? {
            if let Ok(value) = serde_json::from_str::<T>(&raw) {
                return Ok((value, OutcomeSource::RecentFallback, false));
            }
        }

        let stale_key = format!("{recent_key}:stale");
        if let Some(raw) = self.cache.get(&stale_key).await? {
            if let Ok(value) = serde_json::from_str::<T>(&raw) {
                return Ok((value, OutcomeSource::StaleCache, true));
            }
        }

        if let Some(value) = default_data {
            return Ok((value, OutcomeSource::Default, true));
        }

        if let Some(value) = degraded_synthetic() {
            return Ok((value, OutcomeSource::DegradedMode, true));
        }

        Err(CoreError::FallbackFailed {
            fallback_key: fallback_key.to_string(),
        })
    }
}

/// §4.2 point (4): degraded-mode synthetic shapes chosen by `fallback_key`
/// pattern. "pricing" keys get an empty-services shape; everything else
/// gets a generic unavailable marker.
pub fn degraded_synthetic_json(fallback_key: &str) -> serde_json::Value {
    if fallback_key.contains("pricing") {
        serde_json::json!({
            "services": [],
            "degraded_mode": true,
            "message": "pricing data unavailable, returning empty service list",
        })
    } else {
        serde_json::json!({
            "degraded_mode": true,
            "message": format!("{fallback_key} unavailable"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;

    #[tokio::test]
    async fn recent_fallback_wins_over_stale_and_default() {
        let cache = Arc::new(InMemoryCacheBackend::new());
        let manager = FallbackManager::new(cache, FallbackConfig::default());
        manager.record_success("aws_pricing", &serde_json::json!({"x": 1})).await.unwrap();

        let (value, source, degraded) = manager
            .resolve::<serde_json::Value>("aws_pricing", Some(serde_json::json!({"x": 2})), || None)
            .await
            .unwrap();
        assert_eq!(source, OutcomeSource::RecentFallback);
        assert!(!degraded);
        assert_eq!(value["x"], 1);
    }

    #[tokio::test]
    async fn degraded_synthetic_used_when_nothing_else_matches() {
        let cache = Arc::new(InMemoryCacheBackend::new());
        let manager = FallbackManager::new(cache, FallbackConfig::default());
        let (value, source, degraded) = manager
            .resolve::<serde_json::Value>("aws_pricing", None, || Some(degraded_synthetic_json("aws_pricing")))
            .await
            .unwrap();
        assert_eq!(source, OutcomeSource::DegradedMode);
        assert!(degraded);
        assert_eq!(value["services"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn fails_when_no_strategy_matches() {
        let cache = Arc::new(InMemoryCacheBackend::new());
        let manager = FallbackManager::new(cache, FallbackConfig::default());
        let result = manager
            .resolve::<serde_json::Value>("unknown", None, || None)
            .await;
        assert!(matches!(result, Err(CoreError::FallbackFailed { .. })));
    }
}
