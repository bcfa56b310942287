//! Failover orchestration (C10), grounded on
//! `original_source/src/infra_mind/core/failover.py`. Ranks each service's
//! registered `ServiceEndpoint`s and selects among them per strategy,
//! tracking cooldown and auto-failback.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::ServiceEndpoint;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverStrategy {
    ActivePassive,
    RoundRobin,
    Weighted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverTrigger {
    ConsecutiveFailures,
    ResponseTimeBreach,
    ErrorRateBreach,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub service: String,
    pub from_endpoint: Option<String>,
    pub to_endpoint: String,
    pub trigger: FailoverTrigger,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FailoverConfig {
    pub strategy: FailoverStrategy,
    pub cooldown: Duration,
    pub auto_failback: bool,
    pub failback_health_checks: u32,
    pub consecutive_failure_threshold: u32,
    pub response_time_threshold_ms: f64,
    pub error_rate_threshold: f64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            strategy: FailoverStrategy::ActivePassive,
            cooldown: Duration::from_secs(300),
            auto_failback: true,
            failback_health_checks: 3,
            consecutive_failure_threshold: 3,
            response_time_threshold_ms: 5000.0,
            error_rate_threshold: 0.5,
        }
    }
}

struct ServiceGroup {
    endpoints: Vec<ServiceEndpoint>,
    current: String,
    config: FailoverConfig,
    last_failover: Option<Instant>,
    round_robin_cursor: usize,
    consecutive_healthy_since_failback: u32,
    history: Vec<FailoverEvent>,
}

const MAX_FAILOVER_HISTORY: usize = 200;

/// Owns every registered service's endpoint set and failover state (C10).
pub struct FailoverOrchestrator {
    services: Mutex<HashMap<String, ServiceGroup>>,
}

impl FailoverOrchestrator {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_service(&self, service: impl Into<String>, endpoints: Vec<ServiceEndpoint>, config: FailoverConfig) {
        let service = service.into();
        let current = endpoints
            .iter()
            .min_by_key(|e| e.priority)
            .map(|e| e.name.clone())
            .unwrap_or_default();
        self.services.lock().insert(
            service,
            ServiceGroup {
                endpoints,
                current,
                config,
                last_failover: None,
                round_robin_cursor: 0,
                consecutive_healthy_since_failback: 0,
                history: Vec::new(),
            },
        );
    }

    /// §4.3 `getCurrent()`: selects the current endpoint per strategy.
    pub fn current_endpoint(&self, service: &str) -> CoreResult<ServiceEndpoint> {
        let mut services = self.services.lock();
        let group = services
            .get_mut(service)
            .ok_or_else(|| CoreError::NotFound { what: format!("failover service {service}") })?;
        Ok(select_endpoint(group))
    }

    pub fn record_success(&self, service: &str, endpoint_name: &str, response_time_ms: f64) {
        let mut services = self.services.lock();
        if let Some(group) = services.get_mut(service) {
            if let Some(endpoint) = group.endpoints.iter_mut().find(|e| e.name == endpoint_name) {
                endpoint.record_success(response_time_ms);
            }
            maybe_failback(group);
        }
    }

    pub fn record_failure(&self, service: &str, endpoint_name: &str) {
        let trigger = {
            let mut services = self.services.lock();
            let Some(group) = services.get_mut(service) else { return };
            let threshold = group.config.consecutive_failure_threshold;
            if let Some(endpoint) = group.endpoints.iter_mut().find(|e| e.name == endpoint_name) {
                endpoint.record_failure();
                if endpoint.consecutive_failures >= threshold && endpoint.name == group.current {
                    Some(FailoverTrigger::ConsecutiveFailures)
                } else {
                    None
                }
            } else {
                None
            }
        };
        if let Some(trigger) = trigger {
            let _ = self.trigger_failover(service, trigger);
        }
    }

    pub fn trigger_failover(&self, service: &str, trigger: FailoverTrigger) -> CoreResult<ServiceEndpoint> {
        let mut services = self.services.lock();
        let group = services
            .get_mut(service)
            .ok_or_else(|| CoreError::NotFound { what: format!("failover service {service}") })?;

        if let Some(last) = group.last_failover {
            if last.elapsed() < group.config.cooldown {
                warn!(service, "failover suppressed by cooldown");
                return group
                    .endpoints
                    .iter()
                    .find(|e| e.name == group.current)
                    .cloned()
                    .ok_or_else(|| CoreError::NotFound { what: format!("current endpoint for {service}") });
            }
        }

        let previous = group.current.clone();
        if let Some(endpoint) = group.endpoints.iter_mut().find(|e| e.name == previous) {
            endpoint.is_active = false;
        }
        let selected = select_endpoint(group);
        group.current = selected.name.clone();
        group.last_failover = Some(Instant::now());
        group.consecutive_healthy_since_failback = 0;

        let event = FailoverEvent {
            service: service.to_string(),
            from_endpoint: Some(previous),
            to_endpoint: selected.name.clone(),
            trigger,
            at: Utc::now(),
        };
        info!(service, to = %selected.name, ?trigger, "failover triggered");
        group.history.push(event);
        if group.history.len() > MAX_FAILOVER_HISTORY {
            group.history.remove(0);
        }

        Ok(selected)
    }

    pub fn history(&self, service: &str) -> Vec<FailoverEvent> {
        self.services
            .lock()
            .get(service)
            .map(|g| g.history.clone())
            .unwrap_or_default()
    }
}

impl Default for FailoverOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

fn select_endpoint(group: &mut ServiceGroup) -> ServiceEndpoint {
    let healthy: Vec<&ServiceEndpoint> = group.endpoints.iter().filter(|e| e.is_active && e.is_healthy).collect();

    match group.config.strategy {
        FailoverStrategy::ActivePassive => {
            if let Some(endpoint) = healthy.iter().min_by_key(|e| e.priority) {
                (*endpoint).clone()
            } else {
                group
                    .endpoints
                    .iter()
                    .find(|e| e.is_active)
                    .cloned()
                    .or_else(|| group.endpoints.first().cloned())
                    .expect("at least one endpoint registered")
            }
        }
        FailoverStrategy::RoundRobin => {
            if healthy.is_empty() {
                return group
                    .endpoints
                    .iter()
                    .find(|e| e.is_active)
                    .cloned()
                    .or_else(|| group.endpoints.first().cloned())
                    .expect("at least one endpoint registered");
            }
            let idx = group.round_robin_cursor % healthy.len();
            group.round_robin_cursor = group.round_robin_cursor.wrapping_add(1);
            healthy[idx].clone()
        }
        FailoverStrategy::Weighted => {
            if healthy.is_empty() {
                return group
                    .endpoints
                    .iter()
                    .find(|e| e.is_active)
                    .cloned()
                    .or_else(|| group.endpoints.first().cloned())
                    .expect("at least one endpoint registered");
            }
            let total_weight: f64 = healthy.iter().map(|e| e.weight.max(0.0)).sum();
            if total_weight <= 0.0 {
                return healthy[0].clone();
            }
            let mut pick = rand::thread_rng().gen_range(0.0..total_weight);
            for endpoint in &healthy {
                pick -= endpoint.weight.max(0.0);
                if pick <= 0.0 {
                    return (*endpoint).clone();
                }
            }
            (*healthy.last().unwrap()).clone()
        }
    }
}

fn maybe_failback(group: &mut ServiceGroup) {
    if !group.config.auto_failback {
        return;
    }
    let primary = group.endpoints.iter().min_by_key(|e| e.priority).cloned();
    let Some(primary) = primary else { return };
    if primary.name == group.current {
        return;
    }
    if primary.is_healthy {
        group.consecutive_healthy_since_failback += 1;
    } else {
        group.consecutive_healthy_since_failback = 0;
    }
    if group.consecutive_healthy_since_failback >= group.config.failback_health_checks {
        if let Some(endpoint) = group.endpoints.iter_mut().find(|e| e.name == primary.name) {
            endpoint.is_active = true;
        }
        group.current = primary.name.clone();
        group.consecutive_healthy_since_failback = 0;
        group.history.push(FailoverEvent {
            service: String::new(),
            from_endpoint: None,
            to_endpoint: primary.name,
            trigger: FailoverTrigger::Manual,
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Vec<ServiceEndpoint> {
        vec![
            ServiceEndpoint::new("primary", "https://primary", 0, 0.7),
            ServiceEndpoint::new("secondary", "https://secondary", 1, 0.3),
        ]
    }

    #[test]
    fn active_passive_prefers_lowest_priority_healthy() {
        let orchestrator = FailoverOrchestrator::new();
        orchestrator.register_service("aws_pricing", endpoints(), FailoverConfig::default());
        let current = orchestrator.current_endpoint("aws_pricing").unwrap();
        assert_eq!(current.name, "primary");
    }

    #[test]
    fn repeated_failures_trigger_failover_to_secondary() {
        let orchestrator = FailoverOrchestrator::new();
        orchestrator.register_service("aws_pricing", endpoints(), FailoverConfig::default());
        for _ in 0..3 {
            orchestrator.record_failure("aws_pricing", "primary");
        }
        let current = orchestrator.current_endpoint("aws_pricing").unwrap();
        assert_eq!(current.name, "secondary");
    }

    #[test]
    fn cooldown_suppresses_rapid_repeated_failover() {
        let mut config = FailoverConfig::default();
        config.cooldown = Duration::from_secs(300);
        let orchestrator = FailoverOrchestrator::new();
        orchestrator.register_service("aws_pricing", endpoints(), config);
        orchestrator.trigger_failover("aws_pricing", FailoverTrigger::Manual).unwrap();
        let second = orchestrator.trigger_failover("aws_pricing", FailoverTrigger::Manual).unwrap();
        // still on secondary: cooldown blocked a second flip back to primary
        assert_eq!(second.name, "secondary");
    }
}
