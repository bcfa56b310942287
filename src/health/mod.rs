//! Health checks & self-healing recovery (C9), grounded on
//! `original_source/src/infra_mind/core/health_checks.py`. Each registered component is
//! wrapped with a timeout and its consecutive failure/success streak drives
//! recovery-strategy invocation and the aggregate system status.

pub mod recovery;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::CoreResult;
use crate::resilience::RecoveryHook;

pub use recovery::{RecoveryHistory, RecoveryOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Database,
    Cache,
    ExternalApi,
    Agent,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: HealthStatus,
    pub response_time_ms: f64,
    pub details: HashMap<String, String>,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Async health probe a component registers (§4.3 "performCheck()").
#[async_trait]
pub trait ComponentHealthCheck: Send + Sync {
    async fn perform_check(&self) -> CheckResult;
}

const MAX_HEALTH_HISTORY: usize = 100;
const RECOVERY_COOLDOWN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub kind: ComponentKind,
    pub critical: bool,
    pub latest: Option<CheckResult>,
    pub history: Vec<CheckResult>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub recovering: bool,
    #[serde(skip)]
    pub last_recovery_attempt: Option<Instant>,
}

impl ComponentHealth {
    fn new(name: &str, kind: ComponentKind, critical: bool) -> Self {
        Self {
            name: name.to_string(),
            kind,
            critical,
            latest: None,
            history: Vec::new(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            recovering: false,
            last_recovery_attempt: None,
        }
    }

    fn push(&mut self, result: CheckResult) {
        match result.status {
            HealthStatus::Healthy => {
                self.consecutive_failures = 0;
                self.consecutive_successes += 1;
                self.recovering = false;
            }
            _ => {
                self.consecutive_successes = 0;
                self.consecutive_failures += 1;
            }
        }
        self.history.push(result.clone());
        if self.history.len() > MAX_HEALTH_HISTORY {
            self.history.remove(0);
        }
        self.latest = Some(result);
    }
}

/// A named, ordered remediation step tried by the manager (§4.3 "Default
/// recovery strategies by component kind").
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;
    async fn attempt(&self, component: &str) -> bool;
}

struct ClosureStrategy<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> RecoveryStrategy for ClosureStrategy<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, component: &str) -> bool {
        (self.f)(component)
    }
}

/// Fallback strategy set used only when `HealthManager::register` is called
/// with no `strategies` of its own; a real deployment passes actual
/// reconnect/reset logic there instead.
fn default_strategies(kind: ComponentKind) -> Vec<Arc<dyn RecoveryStrategy>> {
    fn make(name: &str) -> Arc<dyn RecoveryStrategy> {
        let name_owned = name.to_string();
        Arc::new(ClosureStrategy {
            name: name_owned,
            // Placeholder remediation: optimistically reports success so the
            // manager clears `recovering` and re-probes next cycle.
            f: |_component: &str| true,
        })
    }

    match kind {
        ComponentKind::Database => vec![make("reset_connection_pool"), make("reinitialize_client")],
        ComponentKind::Cache => vec![make("reconnect"), make("selective_clear")],
        ComponentKind::ExternalApi => vec![
            make("recreate_session"),
            make("clear_local_cache"),
            make("rotate_credentials"),
        ],
        ComponentKind::Agent => vec![make("reset_handle"), make("restart_handle")],
        ComponentKind::Other => vec![make("reconnect"), make("clear_cache"), make("restart_service")],
    }
}

struct RegisteredComponent {
    check: Arc<dyn ComponentHealthCheck>,
    strategies: Vec<Arc<dyn RecoveryStrategy>>,
    timeout: Duration,
}

/// Manages registered components' checks and drives recovery (C9),
/// implements `resilience::RecoveryHook` so `ResilienceCoordinator` can
/// trigger it on exhaustion.
pub struct HealthManager {
    components: Mutex<HashMap<String, ComponentHealth>>,
    registrations: Mutex<HashMap<String, RegisteredComponent>>,
    failure_threshold: u32,
    auto_recovery: bool,
    history: Arc<RecoveryHistory>,
}

impl HealthManager {
    pub fn new(failure_threshold: u32, auto_recovery: bool) -> Self {
        Self {
            components: Mutex::new(HashMap::new()),
            registrations: Mutex::new(HashMap::new()),
            failure_threshold,
            auto_recovery,
            history: Arc::new(RecoveryHistory::new()),
        }
    }

    pub fn recovery_history(&self) -> Arc<RecoveryHistory> {
        Arc::clone(&self.history)
    }

    /// `strategies` lets a caller wire real remediation (reset a connection
    /// pool, recreate a client) for this component; pass an empty `Vec` to
    /// fall back to `default_strategies(kind)`'s placeholder set.
    pub fn register(
        &self,
        name: impl Into<String>,
        kind: ComponentKind,
        critical: bool,
        timeout: Duration,
        check: Arc<dyn ComponentHealthCheck>,
        strategies: Vec<Arc<dyn RecoveryStrategy>>,
    ) {
        let name = name.into();
        self.components
            .lock()
            .insert(name.clone(), ComponentHealth::new(&name, kind, critical));
        let strategies = if strategies.is_empty() { default_strategies(kind) } else { strategies };
        self.registrations.lock().insert(
            name,
            RegisteredComponent {
                check,
                strategies,
                timeout,
            },
        );
    }

    /// Runs one component's check, wrapped by its timeout, updating history
    /// and (if enabled) triggering recovery once `failure_threshold` is hit.
    pub async fn check_component(&self, name: &str) -> Option<CheckResult> {
        let (check, timeout, strategies) = {
            let registrations = self.registrations.lock();
            let reg = registrations.get(name)?;
            (Arc::clone(&reg.check), reg.timeout, reg.strategies.clone())
        };

        let result = match tokio::time::timeout(timeout, check.perform_check()).await {
            Ok(result) => result,
            Err(_) => CheckResult {
                status: HealthStatus::Unhealthy,
                response_time_ms: timeout.as_secs_f64() * 1000.0,
                details: HashMap::new(),
                error_message: Some("health check timed out".to_string()),
                checked_at: Utc::now(),
            },
        };

        let (should_recover, cooldown_ok) = {
            let mut components = self.components.lock();
            let component = components
                .entry(name.to_string())
                .or_insert_with(|| ComponentHealth::new(name, ComponentKind::Other, false));
            component.push(result.clone());

            let should_recover = component.consecutive_failures >= self.failure_threshold;
            if should_recover {
                component.recovering = true;
            }
            let cooldown_ok = component
                .last_recovery_attempt
                .map(|t| t.elapsed() >= RECOVERY_COOLDOWN)
                .unwrap_or(true);
            if should_recover && cooldown_ok {
                component.last_recovery_attempt = Some(Instant::now());
            }
            (should_recover, cooldown_ok)
        };

        if should_recover && cooldown_ok && self.auto_recovery {
            self.run_recovery(name, &strategies).await;
        }

        Some(result)
    }

    async fn run_recovery(&self, name: &str, strategies: &[Arc<dyn RecoveryStrategy>]) {
        for strategy in strategies {
            info!(component = name, strategy = strategy.name(), "attempting recovery");
            let succeeded = strategy.attempt(name).await;
            self.history.record(name, strategy.name(), succeeded);
            if succeeded {
                info!(component = name, strategy = strategy.name(), "recovery succeeded");
                let mut components = self.components.lock();
                if let Some(component) = components.get_mut(name) {
                    component.recovering = false;
                }
                return;
            }
            warn!(component = name, strategy = strategy.name(), "recovery attempt failed");
        }
        error!(component = name, "all recovery strategies exhausted");
    }

    pub fn component_status(&self, name: &str) -> HealthStatus {
        self.components
            .lock()
            .get(name)
            .and_then(|c| c.latest.as_ref())
            .map(|r| r.status)
            .unwrap_or(HealthStatus::Unknown)
    }

    pub fn snapshot(&self) -> HashMap<String, ComponentHealth> {
        self.components.lock().clone()
    }

    /// Worst of all critical components' latest statuses (§4.3 "Overall
    /// system status").
    pub fn system_status(&self) -> HealthStatus {
        let components = self.components.lock();
        let mut worst = HealthStatus::Healthy;
        for component in components.values() {
            if !component.critical {
                continue;
            }
            let status = component.latest.as_ref().map(|r| r.status).unwrap_or(HealthStatus::Unknown);
            if status > worst {
                worst = status;
            }
        }
        worst
    }

    pub async fn check_all(&self) -> CoreResult<HashMap<String, CheckResult>> {
        let names: Vec<String> = self.registrations.lock().keys().cloned().collect();
        let mut results = HashMap::new();
        for name in names {
            if let Some(result) = self.check_component(&name).await {
                results.insert(name, result);
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl RecoveryHook for HealthManager {
    async fn attempt_recovery(&self, service: &str, _error_context: &str) -> bool {
        let strategies = {
            let registrations = self.registrations.lock();
            registrations.get(service).map(|r| r.strategies.clone())
        };
        match strategies {
            Some(strategies) if self.auto_recovery => {
                self.run_recovery(service, &strategies).await;
                self.component_status(service) != HealthStatus::Unhealthy
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyCheck {
        calls: AtomicU32,
        fail_first_n: u32,
    }

    #[async_trait]
    impl ComponentHealthCheck for FlakyCheck {
        async fn perform_check(&self) -> CheckResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let status = if call < self.fail_first_n {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Healthy
            };
            CheckResult {
                status,
                response_time_ms: 1.0,
                details: HashMap::new(),
                error_message: None,
                checked_at: Utc::now(),
            }
        }
    }

    #[tokio::test]
    async fn consecutive_failures_trigger_recovering_flag() {
        let manager = HealthManager::new(2, true);
        manager.register(
            "postgres",
            ComponentKind::Database,
            true,
            Duration::from_millis(50),
            Arc::new(FlakyCheck {
                calls: AtomicU32::new(0),
                fail_first_n: 5,
            }),
            Vec::new(),
        );

        manager.check_component("postgres").await;
        manager.check_component("postgres").await;
        let snapshot = manager.snapshot();
        assert!(snapshot["postgres"].recovering);
        assert_eq!(manager.system_status(), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn recovery_clears_once_check_turns_healthy() {
        let manager = HealthManager::new(1, true);
        manager.register(
            "redis",
            ComponentKind::Cache,
            true,
            Duration::from_millis(50),
            Arc::new(FlakyCheck {
                calls: AtomicU32::new(0),
                fail_first_n: 1,
            }),
            Vec::new(),
        );

        manager.check_component("redis").await;
        manager.check_component("redis").await;
        assert_eq!(manager.component_status("redis"), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn injected_strategy_runs_instead_of_the_default_placeholder() {
        struct CountingStrategy(Arc<AtomicU32>);

        #[async_trait]
        impl RecoveryStrategy for CountingStrategy {
            fn name(&self) -> &str {
                "counting_strategy"
            }

            async fn attempt(&self, _component: &str) -> bool {
                self.0.fetch_add(1, Ordering::SeqCst);
                true
            }
        }

        let calls = Arc::new(AtomicU32::new(0));
        let manager = HealthManager::new(1, true);
        manager.register(
            "postgres",
            ComponentKind::Database,
            true,
            Duration::from_millis(50),
            Arc::new(FlakyCheck {
                calls: AtomicU32::new(0),
                fail_first_n: 5,
            }),
            vec![Arc::new(CountingStrategy(Arc::clone(&calls)))],
        );

        manager.check_component("postgres").await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_counts_as_unhealthy() {
        struct SlowCheck;
        #[async_trait]
        impl ComponentHealthCheck for SlowCheck {
            async fn perform_check(&self) -> CheckResult {
                tokio::time::sleep(Duration::from_millis(50)).await;
                CheckResult {
                    status: HealthStatus::Healthy,
                    response_time_ms: 50.0,
                    details: HashMap::new(),
                    error_message: None,
                    checked_at: Utc::now(),
                }
            }
        }

        let manager = HealthManager::new(5, false);
        manager.register(
            "slow_api",
            ComponentKind::ExternalApi,
            false,
            Duration::from_millis(5),
            Arc::new(SlowCheck),
            Vec::new(),
        );
        let result = manager.check_component("slow_api").await.unwrap();
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.error_message.unwrap().contains("timed out"));
    }
}
