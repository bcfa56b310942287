use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-service routable endpoint (§3 "ServiceEndpoint (E)"), owned
/// exclusively by `failover::FailoverOrchestrator`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub name: String,
    pub url: String,
    pub weight: f64,
    pub priority: u32,
    pub is_active: bool,
    pub is_healthy: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub latest_response_time_ms: Option<f64>,
    pub latest_error_rate: f64,
}

impl ServiceEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>, priority: u32, weight: f64) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            weight,
            priority,
            is_active: true,
            is_healthy: true,
            last_health_check: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            latest_response_time_ms: None,
            latest_error_rate: 0.0,
        }
    }

    pub fn record_success(&mut self, response_time_ms: f64) {
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;
        self.latest_response_time_ms = Some(response_time_ms);
        self.last_health_check = Some(Utc::now());
        self.is_healthy = true;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;
        self.last_health_check = Some(Utc::now());
    }
}
