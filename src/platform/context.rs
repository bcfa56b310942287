//! Shared application context: every long-lived component (C1–C13) behind
//! `Arc`, handed to request handlers and background services alike. Built
//! once in `platform::runtime::Platform::start`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::agents::AgentRegistry;
use crate::audit_logging::AuditLogger;
use crate::cache::CacheBackend;
use crate::events::EventManager;
use crate::failover::FailoverOrchestrator;
use crate::health::HealthManager;
use crate::ids::{Clock, IdGenerator};
use crate::platform::config::PlatformConfig;
use crate::progress_gateway::ProgressGateway;
use crate::rate_limiting::RateLimiter;
use crate::resilience::{CircuitBreaker, FallbackManager, RecoveryHook, ResilienceCoordinator, RetryEngine};
use crate::store::SharedStore;
use crate::utils::metrics::OrchestratorMetrics;
use crate::workflow::WorkflowEngine;

#[derive(Clone)]
pub struct PlatformContext {
    shared: Arc<SharedState>,
    shutdown: CancellationToken,
}

struct SharedState {
    config: PlatformConfig,
    store: SharedStore,
    cache: Arc<dyn CacheBackend>,
    events: Arc<EventManager>,
    audit_logger: Arc<AuditLogger>,
    agent_registry: AgentRegistry,
    rate_limiter: Arc<RateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
    fallback: Arc<FallbackManager>,
    health: Arc<HealthManager>,
    failover: Arc<FailoverOrchestrator>,
    workflow_engine: Arc<WorkflowEngine>,
    gateway: Arc<ProgressGateway>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    metrics: Arc<OrchestratorMetrics>,
    resilience_coordinators: RwLock<HashMap<String, Arc<ResilienceCoordinator>>>,
}

#[allow(clippy::too_many_arguments)]
impl PlatformContext {
    pub(crate) fn new(
        config: PlatformConfig,
        store: SharedStore,
        cache: Arc<dyn CacheBackend>,
        events: Arc<EventManager>,
        audit_logger: Arc<AuditLogger>,
        agent_registry: AgentRegistry,
        rate_limiter: Arc<RateLimiter>,
        circuit_breaker: Arc<CircuitBreaker>,
        fallback: Arc<FallbackManager>,
        health: Arc<HealthManager>,
        failover: Arc<FailoverOrchestrator>,
        workflow_engine: Arc<WorkflowEngine>,
        gateway: Arc<ProgressGateway>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        metrics: Arc<OrchestratorMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        let shared = SharedState {
            config,
            store,
            cache,
            events,
            audit_logger,
            agent_registry,
            rate_limiter,
            circuit_breaker,
            fallback,
            health,
            failover,
            workflow_engine,
            gateway,
            clock,
            ids,
            metrics,
            resilience_coordinators: RwLock::new(HashMap::new()),
        };

        Self {
            shared: Arc::new(shared),
            shutdown,
        }
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.shared.config
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.shared.store)
    }

    pub fn cache(&self) -> Arc<dyn CacheBackend> {
        Arc::clone(&self.shared.cache)
    }

    pub fn events(&self) -> Arc<EventManager> {
        Arc::clone(&self.shared.events)
    }

    pub fn audit_logger(&self) -> Arc<AuditLogger> {
        Arc::clone(&self.shared.audit_logger)
    }

    pub fn agents(&self) -> AgentRegistry {
        self.shared.agent_registry.clone()
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.shared.rate_limiter)
    }

    pub fn circuit_breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.shared.circuit_breaker)
    }

    pub fn health(&self) -> Arc<HealthManager> {
        Arc::clone(&self.shared.health)
    }

    pub fn failover(&self) -> Arc<FailoverOrchestrator> {
        Arc::clone(&self.shared.failover)
    }

    pub fn workflow_engine(&self) -> Arc<WorkflowEngine> {
        Arc::clone(&self.shared.workflow_engine)
    }

    pub fn gateway(&self) -> Arc<ProgressGateway> {
        Arc::clone(&self.shared.gateway)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.shared.clock)
    }

    pub fn ids(&self) -> Arc<dyn IdGenerator> {
        Arc::clone(&self.shared.ids)
    }

    pub fn metrics(&self) -> Arc<OrchestratorMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    /// Returns (building and caching on first use) the `ResilienceCoordinator`
    /// configured for `service`, sharing the single rate limiter/circuit
    /// breaker/fallback manager but using that service's own retry policy
    /// (§6 per-service config block).
    pub fn resilience_for(&self, service: &str) -> Arc<ResilienceCoordinator> {
        if let Some(existing) = self.shared.resilience_coordinators.read().get(service) {
            return Arc::clone(existing);
        }

        let settings = self.shared.config.service_settings(service);
        let retry = RetryEngine::new(settings.retry_config());
        let coordinator = Arc::new(ResilienceCoordinator::new(
            Some(Arc::clone(&self.shared.rate_limiter)),
            Arc::clone(&self.shared.circuit_breaker),
            retry,
            Arc::clone(&self.shared.fallback),
            Some(Arc::clone(&self.shared.health) as Arc<dyn RecoveryHook>),
        ));

        self.shared
            .resilience_coordinators
            .write()
            .insert(service.to_string(), Arc::clone(&coordinator));
        coordinator
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
