//! Resilience layer (C5–C8): circuit breaker, retry engine, fallback
//! manager and the coordinator that composes them into one
//! `resilient_call` primitive, grounded on
//! `original_source/src/infra_mind/core/resilience.py`.

pub mod circuit_breaker;
pub mod coordinator;
pub mod fallback;
pub mod retry;

pub use circuit_breaker::CircuitBreaker;
pub use coordinator::{ResilienceCoordinator, ResilientCallOptions};
pub use fallback::{FallbackConfig, FallbackManager};
pub use retry::{RetryConfig, RetryEngine};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    Primary,
    RecentFallback,
    StaleCache,
    Default,
    DegradedMode,
    Error,
}

/// Result of `ResilienceCoordinator::resilient_call` (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome<T> {
    pub data: Option<T>,
    pub source: OutcomeSource,
    pub fallback_used: bool,
    pub degraded_mode: bool,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub recovery_attempted: bool,
    pub metadata: HashMap<String, String>,
}

impl<T> Outcome<T> {
    pub fn primary(data: T) -> Self {
        Self {
            data: Some(data),
            source: OutcomeSource::Primary,
            fallback_used: false,
            degraded_mode: false,
            warnings: Vec::new(),
            error: None,
            recovery_attempted: false,
            metadata: HashMap::new(),
        }
    }
}
