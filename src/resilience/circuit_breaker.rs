use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::cache::{keys, CacheBackend};
use crate::domain::{CircuitConfig, CircuitState, CircuitStatus};
use crate::error::{CoreError, CoreResult};

/// State lives in C3 (§3: "CS, B, E states live in C3, shared across
/// instances"), so it is never the source of truth here — only read from and
/// written back to `cache` on every transition.
const STATE_TTL: StdDuration = StdDuration::from_secs(24 * 3600);

/// Per-service circuit breaker (C5), grounded on
/// `original_source/src/infra_mind/core/resilience.py::CircuitBreaker`. A
/// local mutex serializes concurrent local transitions against the same
/// service (read-cache / decide / write-cache as one critical section); the
/// cache entry itself is what other instances of this process read.
pub struct CircuitBreaker {
    cache: Arc<dyn CacheBackend>,
    local_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    configs: HashMap<String, CircuitConfig>,
    default_config: CircuitConfig,
}

impl CircuitBreaker {
    pub fn new(cache: Arc<dyn CacheBackend>, configs: HashMap<String, CircuitConfig>) -> Self {
        Self {
            cache,
            local_locks: Mutex::new(HashMap::new()),
            configs,
            default_config: CircuitConfig::default(),
        }
    }

    /// Exposes the per-service config (in particular `call_timeout`) so the
    /// coordinator can bound the call it wraps around this breaker.
    pub fn config_for(&self, service: &str) -> CircuitConfig {
        self.configs.get(service).cloned().unwrap_or_else(|| self.default_config.clone())
    }

    fn lock_for(&self, service: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.local_locks
                .lock()
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    async fn load(&self, service: &str, config: &CircuitConfig) -> CircuitState {
        match self.cache.get(&keys::circuit_breaker(service)).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|_| CircuitState::new(service, config.clone())),
            _ => CircuitState::new(service, config.clone()),
        }
    }

    async fn store(&self, service: &str, state: &CircuitState) {
        if let Ok(raw) = serde_json::to_string(state) {
            let _ = self.cache.set_ex(&keys::circuit_breaker(service), raw, STATE_TTL).await;
        }
    }

    /// Admission check (§4.2 table). CLOSED always admits; OPEN admits only
    /// after `recovery_timeout` has elapsed, transitioning to HALF_OPEN for
    /// the trial call; otherwise fails fast with `CircuitBreakerOpen`.
    pub async fn try_acquire(&self, service: &str) -> CoreResult<()> {
        let config = self.config_for(service);
        let lock = self.lock_for(service);
        let _guard = lock.lock().await;
        let mut state = self.load(service, &config).await;

        let result = match state.status {
            CircuitStatus::Closed => Ok(()),
            CircuitStatus::HalfOpen => Ok(()),
            CircuitStatus::Open => {
                let elapsed = state
                    .last_failure_time
                    .map(|t| Utc::now() - t)
                    .unwrap_or(chrono::Duration::zero());
                if elapsed >= chrono::Duration::from_std(config.recovery_timeout).unwrap_or_default() {
                    state.status = CircuitStatus::HalfOpen;
                    state.success_count = 0;
                    Ok(())
                } else {
                    Err(CoreError::CircuitBreakerOpen {
                        service: service.to_string(),
                    })
                }
            }
        };

        self.store(service, &state).await;
        result
    }

    pub async fn record_success(&self, service: &str) {
        let config = self.config_for(service);
        let lock = self.lock_for(service);
        let _guard = lock.lock().await;
        let mut state = self.load(service, &config).await;

        state.last_success_time = Some(Utc::now());
        match state.status {
            CircuitStatus::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= config.success_threshold {
                    state.status = CircuitStatus::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                }
            }
            CircuitStatus::Closed => {
                state.failure_count = 0;
            }
            CircuitStatus::Open => {}
        }
        self.store(service, &state).await;
    }

    /// Timeouts count as failures (§4.2 "Circuit breaker").
    pub async fn record_failure(&self, service: &str) {
        let config = self.config_for(service);
        let lock = self.lock_for(service);
        let _guard = lock.lock().await;
        let mut state = self.load(service, &config).await;

        state.last_failure_time = Some(Utc::now());
        match state.status {
            CircuitStatus::HalfOpen => {
                state.status = CircuitStatus::Open;
                state.success_count = 0;
            }
            CircuitStatus::Closed => {
                state.failure_count += 1;
                if state.failure_count >= config.failure_threshold {
                    state.status = CircuitStatus::Open;
                }
            }
            CircuitStatus::Open => {}
        }
        self.store(service, &state).await;
    }

    pub async fn status(&self, service: &str) -> CircuitStatus {
        self.load(service, &self.config_for(service)).await.status
    }

    pub async fn reset(&self, service: &str) {
        let config = self.config_for(service);
        self.store(service, &CircuitState::new(service, config)).await;
    }

    /// Snapshot across every service this breaker has a dedicated config
    /// for, read fresh from `cache` (§3: shared state, so this reflects
    /// every instance's activity, not just this process's).
    pub async fn snapshot(&self) -> HashMap<String, CircuitState> {
        let mut out = HashMap::new();
        for service in self.configs.keys() {
            let config = self.config_for(service);
            out.insert(service.clone(), self.load(service, &config).await);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;
    use std::time::Duration;

    fn breaker() -> CircuitBreaker {
        let mut configs = HashMap::new();
        configs.insert(
            "aws_pricing".to_string(),
            CircuitConfig {
                failure_threshold: 3,
                recovery_timeout: Duration::from_millis(50),
                success_threshold: 1,
                call_timeout: Duration::from_secs(1),
            },
        );
        CircuitBreaker::new(Arc::new(InMemoryCacheBackend::new()), configs)
    }

    #[tokio::test]
    async fn opens_after_failure_threshold_and_rejects_fast() {
        let cb = breaker();
        for _ in 0..3 {
            assert!(cb.try_acquire("aws_pricing").await.is_ok());
            cb.record_failure("aws_pricing").await;
        }
        assert_eq!(cb.status("aws_pricing").await, CircuitStatus::Open);
        assert!(cb.try_acquire("aws_pricing").await.is_err());
    }

    #[tokio::test]
    async fn half_open_trial_after_recovery_timeout() {
        let cb = breaker();
        for _ in 0..3 {
            let _ = cb.try_acquire("aws_pricing").await;
            cb.record_failure("aws_pricing").await;
        }
        assert!(cb.try_acquire("aws_pricing").await.is_err());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cb.try_acquire("aws_pricing").await.is_ok());
        assert_eq!(cb.status("aws_pricing").await, CircuitStatus::HalfOpen);
        cb.record_success("aws_pricing").await;
        assert_eq!(cb.status("aws_pricing").await, CircuitStatus::Closed);
    }
}
