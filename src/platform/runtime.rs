use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agents::AgentRegistry;
use crate::audit_logging::AuditLogger;
use crate::cache::{CacheBackend, InMemoryCacheBackend, RedisCacheBackend};
use crate::domain::CircuitConfig;
use crate::events::EventManager;
use crate::failover::FailoverOrchestrator;
use crate::health::HealthManager;
use crate::ids::{Clock, IdGenerator, SystemClock, UuidGenerator};
use crate::platform::config::{AuditSettings, PlatformConfig};
use crate::platform::context::PlatformContext;
use crate::platform::service::ServiceRegistration;
use crate::platform::telemetry::telemetry_service;
use crate::progress_gateway::{GatewayConfig, ProgressGateway};
use crate::rate_limiting::RateLimiter;
use crate::resilience::{CircuitBreaker, FallbackConfig, FallbackManager, RecoveryHook};
use crate::store::{InMemoryStore, PostgresStore, SharedStore, Store};
use crate::utils::metrics::OrchestratorMetrics;
use crate::workflow::WorkflowEngine;

/// Assembles and boots every C1–C13 component, then hands callers a
/// `PlatformContext` plus whatever background services (telemetry, health
/// probes, workflow cleanup) were registered. Mirrors the teacher's
/// `Platform`/`PlatformRuntime` split: construction is synchronous and
/// fallible, `start` is async and owns the running services.
pub struct Platform {
    config: PlatformConfig,
    services: Vec<ServiceRegistration>,
}

impl Platform {
    pub fn new(config: PlatformConfig) -> Self {
        let mut services = Vec::new();
        services.push(telemetry_service(config.observability.clone()));

        Self { config, services }
    }

    pub fn register_service(&mut self, service: ServiceRegistration) {
        self.services.push(service);
    }

    pub async fn start(self) -> Result<PlatformRuntime> {
        initialize_logging(&self.config);

        let audit_logger = Arc::new(init_audit_logger(&self.config.audit)?);
        let store: SharedStore = build_store(&self.config).await?;
        let cache: Arc<dyn CacheBackend> = build_cache(&self.config).await?;
        let events = EventManager::new(Arc::clone(&cache), self.config.metadata.instance_id.clone());
        let agent_registry = AgentRegistry::new();

        let metrics = OrchestratorMetrics::new().map_err(|e| anyhow::anyhow!(e.to_string()))?;
        metrics.subscribe_events(&events).await;

        let mut circuit_configs: HashMap<String, CircuitConfig> = HashMap::new();
        let mut rate_limit_configs = HashMap::new();
        for (service, settings) in &self.config.services {
            circuit_configs.insert(service.clone(), settings.circuit_config());
            rate_limit_configs.insert(service.clone(), settings.rate_limit_config());
        }

        let circuit_breaker = Arc::new(CircuitBreaker::new(Arc::clone(&cache), circuit_configs));
        let rate_limiter = Arc::new(RateLimiter::new(Arc::clone(&cache), rate_limit_configs));
        let fallback = Arc::new(FallbackManager::new(Arc::clone(&cache), FallbackConfig::default()));

        let health = Arc::new(HealthManager::new(self.config.health.failure_threshold, self.config.health.auto_recovery));
        let failover = Arc::new(FailoverOrchestrator::new());

        let gateway = ProgressGateway::new(GatewayConfig {
            heartbeat_interval: std::time::Duration::from_secs(self.config.gateway.heartbeat_interval_seconds),
            heartbeat_timeout: std::time::Duration::from_secs(self.config.gateway.heartbeat_timeout_seconds),
            session_buffer: self.config.gateway.session_buffer,
        });
        gateway.subscribe_events(&events).await;

        let root_token = CancellationToken::new();

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids: Arc<dyn IdGenerator> = Arc::new(UuidGenerator);

        let workflow_engine = build_workflow_engine(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&events),
            agent_registry.clone(),
            Arc::clone(&rate_limiter),
            Arc::clone(&circuit_breaker),
            Arc::clone(&fallback),
            Arc::clone(&health),
            &self.config,
        );

        let context = PlatformContext::new(
            self.config.clone(),
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&events),
            audit_logger,
            agent_registry.clone(),
            Arc::clone(&rate_limiter),
            Arc::clone(&circuit_breaker),
            Arc::clone(&fallback),
            Arc::clone(&health),
            Arc::clone(&failover),
            workflow_engine,
            Arc::clone(&gateway),
            clock,
            ids,
            Arc::clone(&metrics),
            root_token.child_token(),
        );

        let mut tasks = Vec::new();
        let mut services = self.services;
        services.push(gateway_heartbeat_service(Arc::clone(&gateway)));
        services.push(workflow_cleanup_service(store, cache));

        for service in services {
            let handle = service.spawn(context.clone(), root_token.child_token());
            tasks.push((service.name().to_string(), handle));
        }

        info!("platform boot completed");

        Ok(PlatformRuntime {
            context,
            cancel_token: root_token,
            tasks,
        })
    }
}

/// `WorkflowEngine` takes a single `ResilienceCoordinator`, while the rest
/// of the platform gets one per service via `PlatformContext::resilience_for`
/// (different retry policy per service). Node execution already passes the
/// node/agent name as the `service` key into `resilient_call`, and the
/// circuit breaker/rate limiter/fallback manager shared here already key off
/// that string internally, so only the retry policy is uniform across
/// workflow-issued calls; it is built from `default_service` (§6).
#[allow(clippy::too_many_arguments)]
fn build_workflow_engine(
    store: SharedStore,
    cache: Arc<dyn CacheBackend>,
    events: Arc<EventManager>,
    agents: AgentRegistry,
    rate_limiter: Arc<RateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
    fallback: Arc<FallbackManager>,
    health: Arc<HealthManager>,
    config: &PlatformConfig,
) -> Arc<WorkflowEngine> {
    let retry = crate::resilience::RetryEngine::new(config.default_service.retry_config());
    let resilience = Arc::new(crate::resilience::ResilienceCoordinator::new(
        Some(rate_limiter),
        circuit_breaker,
        retry,
        fallback,
        Some(health as Arc<dyn RecoveryHook>),
    ));

    Arc::new(WorkflowEngine::new(store, cache, events, agents, resilience, config.workflow_config()))
}

fn gateway_heartbeat_service(gateway: Arc<ProgressGateway>) -> ServiceRegistration {
    ServiceRegistration::new(
        "progress-gateway-heartbeat",
        Arc::new(move |_ctx, token: CancellationToken| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                let handle = gateway.spawn_heartbeat_loop();
                token.cancelled().await;
                handle.abort();
                Ok(())
            })
        }),
    )
}

fn workflow_cleanup_service(store: SharedStore, cache: Arc<dyn CacheBackend>) -> ServiceRegistration {
    ServiceRegistration::new(
        "workflow-cleanup",
        Arc::new(move |ctx: PlatformContext, token: CancellationToken| {
            let store = Arc::clone(&store);
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                let max_age = chrono::Duration::hours(ctx.config().workflow.workflow_cleanup_max_age_hours as i64);
                let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {
                            match store.purge_terminal_workflows_older_than(max_age).await {
                                Ok(purged) if !purged.is_empty() => {
                                    // §4.5 "Cleanup": purging W records also evicts them from C3.
                                    for id in &purged {
                                        if let Err(err) = cache.delete(&crate::cache::keys::workflow_state(id)).await {
                                            tracing::warn!(workflow_id = %id, error = %err, "failed to evict workflow state from cache");
                                        }
                                    }
                                    info!(count = purged.len(), "purged terminal workflow states past retention");
                                }
                                Ok(_) => {}
                                Err(err) => tracing::warn!(error = %err, "workflow cleanup sweep failed"),
                            }
                        }
                    }
                }
                Ok(())
            })
        }),
    )
}

async fn build_store(config: &PlatformConfig) -> Result<SharedStore> {
    match &config.storage.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            Ok(Arc::new(store) as SharedStore)
        }
        None => Ok(Arc::new(InMemoryStore::new()) as SharedStore),
    }
}

async fn build_cache(config: &PlatformConfig) -> Result<Arc<dyn CacheBackend>> {
    match &config.storage.redis_url {
        Some(url) => {
            let cache = RedisCacheBackend::connect(url).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            Ok(Arc::new(cache) as Arc<dyn CacheBackend>)
        }
        None => Ok(Arc::new(InMemoryCacheBackend::new()) as Arc<dyn CacheBackend>),
    }
}

pub struct PlatformRuntime {
    context: PlatformContext,
    cancel_token: CancellationToken,
    tasks: Vec<(String, JoinHandle<Result<()>>)>,
}

impl PlatformRuntime {
    pub fn context(&self) -> PlatformContext {
        self.context.clone()
    }

    pub async fn shutdown(self) -> Result<()> {
        self.cancel_token.cancel();

        for (name, handle) in self.tasks {
            match handle.await {
                Ok(Ok(())) => info!(service = %name, "service shutdown cleanly"),
                Ok(Err(err)) => {
                    return Err(err);
                }
                Err(err) => {
                    return Err(err.into());
                }
            }
        }

        Ok(())
    }
}

fn initialize_logging(config: &PlatformConfig) {
    let filter = &config.observability.log_level;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter.as_str())
        .try_init();
}

fn init_audit_logger(settings: &AuditSettings) -> Result<AuditLogger> {
    AuditLogger::new(&settings.log_path, settings.retention_days)
        .map_err(|err| anyhow::anyhow!(err.to_string()))
}
