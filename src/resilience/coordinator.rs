use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, warn};

use crate::domain::RateLimitScope;
use crate::error::CoreError;
use crate::rate_limiting::RateLimiter;

use super::fallback::{degraded_synthetic_json, FallbackManager};
use super::{CircuitBreaker, Outcome, OutcomeSource, RetryEngine};

/// Invoked on total exhaustion, mirroring §4.2's "Recovery hook": best-effort
/// and non-blocking, it must never itself fail the call. `health::HealthManager`
/// implements this to trigger its recovery strategies.
#[async_trait]
pub trait RecoveryHook: Send + Sync {
    async fn attempt_recovery(&self, service: &str, error_context: &str) -> bool;
}

pub struct ResilientCallOptions<T> {
    pub fallback_key: Option<String>,
    pub default_data: Option<T>,
}

impl<T> Default for ResilientCallOptions<T> {
    fn default() -> Self {
        Self {
            fallback_key: None,
            default_data: None,
        }
    }
}

/// Composes C4–C7 into one primitive (C8), grounded on
/// `original_source/src/infra_mind/core/resilience.py`'s top-level `resilient_call`
/// function. Composition order matches §4.2 exactly.
pub struct ResilienceCoordinator {
    rate_limiter: Option<Arc<RateLimiter>>,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: RetryEngine,
    fallback: Arc<FallbackManager>,
    recovery: Option<Arc<dyn RecoveryHook>>,
}

impl ResilienceCoordinator {
    pub fn new(
        rate_limiter: Option<Arc<RateLimiter>>,
        circuit_breaker: Arc<CircuitBreaker>,
        retry: RetryEngine,
        fallback: Arc<FallbackManager>,
        recovery: Option<Arc<dyn RecoveryHook>>,
    ) -> Self {
        Self {
            rate_limiter,
            circuit_breaker,
            retry,
            fallback,
            recovery,
        }
    }

    pub async fn resilient_call<T, F, Fut>(
        &self,
        service: &str,
        opts: ResilientCallOptions<T>,
        f: F,
    ) -> Outcome<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, CoreError>> + Send,
    {
        // Rate limiter consultation happens before CB admission; a denial
        // counts as retryable but not as a CB failure (§4.2).
        if let Some(limiter) = &self.rate_limiter {
            if let Err(err) = limiter.check_limit(service, RateLimitScope::PerService, None).await {
                return self.fall_back(service, &opts, err).await;
            }
        }

        if let Err(err) = self.circuit_breaker.try_acquire(service).await {
            return self.fall_back(service, &opts, err).await;
        }

        let call_timeout = self.circuit_breaker.config_for(service).call_timeout;
        let circuit_breaker = Arc::clone(&self.circuit_breaker);
        let service_owned = service.to_string();
        let result = self
            .retry
            .run(|| {
                let circuit_breaker = Arc::clone(&circuit_breaker);
                let service_owned = service_owned.clone();
                let fut = f();
                async move {
                    let outcome = match tokio::time::timeout(call_timeout, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(CoreError::Timeout { elapsed: call_timeout }),
                    };
                    match outcome {
                        Ok(value) => {
                            circuit_breaker.record_success(&service_owned).await;
                            Ok(value)
                        }
                        Err(err) => {
                            circuit_breaker.record_failure(&service_owned).await;
                            Err(err)
                        }
                    }
                }
            })
            .await;

        if let Some(limiter) = &self.rate_limiter {
            limiter.record_outcome(service, result.is_ok());
        }

        match result {
            Ok(value) => {
                if let Some(key) = &opts.fallback_key {
                    if let Err(err) = self.fallback.record_success(key, &value).await {
                        warn!(service, error = %err, "failed to cache primary result for fallback");
                    }
                }
                info!(service, "resilient_call succeeded via primary");
                Outcome::primary(value)
            }
            Err(err) => self.fall_back(service, &opts, err).await,
        }
    }

    async fn fall_back<T>(
        &self,
        service: &str,
        opts: &ResilientCallOptions<T>,
        primary_error: CoreError,
    ) -> Outcome<T>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let Some(fallback_key) = &opts.fallback_key else {
            return self.recovered_error(service, primary_error).await;
        };

        let default_data = opts.default_data.clone();
        let resolved = self
            .fallback
            .resolve::<T>(fallback_key, default_data, || {
                serde_json::from_value(degraded_synthetic_json(fallback_key)).ok()
            })
            .await;

        match resolved {
            Ok((data, source, degraded_mode)) => {
                warn!(service, ?source, "resilient_call degraded to fallback");
                Outcome {
                    data: Some(data),
                    source,
                    fallback_used: true,
                    degraded_mode,
                    warnings: vec![primary_error.to_string()],
                    error: None,
                    recovery_attempted: false,
                    metadata: Default::default(),
                }
            }
            Err(_) => self.recovered_error(service, primary_error).await,
        }
    }

    async fn recovered_error<T>(&self, service: &str, primary_error: CoreError) -> Outcome<T> {
        let recovery_attempted = if let Some(hook) = &self.recovery {
            hook.attempt_recovery(service, &primary_error.to_string()).await
        } else {
            false
        };

        Outcome {
            data: None,
            source: OutcomeSource::Error,
            fallback_used: false,
            degraded_mode: false,
            warnings: Vec::new(),
            error: Some(primary_error.to_string()),
            recovery_attempted,
            metadata: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;
    use crate::resilience::fallback::FallbackConfig;
    use crate::resilience::RetryConfig;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn coordinator() -> ResilienceCoordinator {
        let cache = Arc::new(InMemoryCacheBackend::new());
        ResilienceCoordinator::new(
            None,
            Arc::new(CircuitBreaker::new(Arc::clone(&cache) as Arc<dyn crate::cache::CacheBackend>, HashMap::new())),
            RetryEngine::new(RetryConfig {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: false,
                ..RetryConfig::default()
            }),
            Arc::new(FallbackManager::new(cache, FallbackConfig::default())),
            None,
        )
    }

    #[tokio::test]
    async fn primary_success_short_circuits_fallback() {
        let coordinator = coordinator();
        let outcome = coordinator
            .resilient_call("aws_pricing", ResilientCallOptions::<serde_json::Value>::default(), || async {
                Ok(serde_json::json!({"ok": true}))
            })
            .await;
        assert_eq!(outcome.source, OutcomeSource::Primary);
        assert!(!outcome.fallback_used);
    }

    #[tokio::test]
    async fn exhausted_primary_falls_back_to_degraded_mode() {
        let coordinator = coordinator();
        let calls = AtomicU32::new(0);
        let opts = ResilientCallOptions {
            fallback_key: Some("aws_pricing_lookup".to_string()),
            default_data: None,
        };
        let outcome = coordinator
            .resilient_call("aws_pricing", opts, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CoreError::Upstream { message: "502".into() }) }
            })
            .await;
        assert_eq!(outcome.source, OutcomeSource::DegradedMode);
        assert!(outcome.fallback_used);
        assert!(outcome.degraded_mode);
    }
}
