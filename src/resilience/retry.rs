use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// §8 property 9: attempt-k delay (0-indexed) lies in
    /// `[base·exp^k, base·exp^k·1.1]` with jitter, or exactly `base·exp^k`
    /// without, always capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.base_delay.as_secs_f64() * self.exponential_base.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let with_jitter = if self.jitter {
            let jitter_fraction: f64 = rand::thread_rng().gen_range(0.0..=0.1);
            capped * (1.0 + jitter_fraction)
        } else {
            capped
        };
        Duration::from_secs_f64(with_jitter.min(self.max_delay.as_secs_f64()))
    }
}

/// Bounded exponential-backoff-with-jitter retry (C6), grounded on
/// `original_source/src/infra_mind/core/resilience.py::RetryMechanism`.
pub struct RetryEngine {
    config: RetryConfig,
}

impl RetryEngine {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub async fn run<T, F, Fut>(&self, mut f: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() || attempt + 1 >= self.config.max_attempts {
                        if attempt + 1 >= self.config.max_attempts && err.is_retryable() {
                            return Err(CoreError::RetryExhausted {
                                attempts: attempt + 1,
                                last_error: Box::new(err),
                            });
                        }
                        return Err(err);
                    }

                    let delay = if let CoreError::RateLimitExceeded { retry_after } = &err {
                        (*retry_after).max(self.config.delay_for_attempt(attempt))
                    } else {
                        self.config.delay_for_attempt(attempt)
                    };
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_without_jitter_is_exact_and_capped() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            exponential_base: 2.0,
            jitter: false,
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let engine = RetryEngine::new(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
            ..RetryConfig::default()
        });
        let calls = AtomicU32::new(0);
        let result: Result<(), CoreError> = engine
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CoreError::Upstream { message: "502".into() }) }
            })
            .await;
        assert!(matches!(result, Err(CoreError::RetryExhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let engine = RetryEngine::new(RetryConfig::default());
        let calls = AtomicU32::new(0);
        let result: Result<(), CoreError> = engine
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CoreError::validation("bad field")) }
            })
            .await;
        assert!(matches!(result, Err(CoreError::ValidationError { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
