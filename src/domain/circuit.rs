use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
    pub call_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-service circuit breaker bookkeeping (§3 "CircuitState (CS)"). Held by
/// `resilience::circuit_breaker::CircuitBreaker` behind a `Mutex`/atomics so
/// transitions are atomic per service (§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitState {
    pub service: String,
    pub status: CircuitStatus,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    #[serde(skip, default)]
    pub config: Option<CircuitConfig>,
}

impl CircuitState {
    pub fn new(service: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            service: service.into(),
            status: CircuitStatus::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            last_success_time: None,
            config: Some(config),
        }
    }
}

pub type CriticalPath = HashSet<String>;
