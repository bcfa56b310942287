//! Prometheus metrics for the orchestrator, grounded on the teacher's
//! `layer2::metrics::PlanningMetrics`: a `Registry` plus typed counters and
//! gauges, constructed once and wired to the event bus (C11) instead of
//! threaded through every call site.

use std::sync::Arc;

use prometheus::{Counter, Encoder, Gauge, Registry, TextEncoder};
use tracing::warn;

use crate::domain::EventType;
use crate::error::{CoreError, CoreResult};
use crate::events::EventManager;

pub struct OrchestratorMetrics {
    registry: Registry,
    workflows_started: Counter,
    workflows_completed: Counter,
    workflows_failed: Counter,
    agent_calls_succeeded: Counter,
    agent_calls_failed: Counter,
    circuit_breakers_open: Gauge,
}

impl OrchestratorMetrics {
    pub fn new() -> CoreResult<Arc<Self>> {
        let registry = Registry::new();

        let metrics = Self {
            registry,
            workflows_started: Counter::new("orchestrator_workflows_started_total", "Total workflows started")
                .map_err(|e| CoreError::Other(e.into()))?,
            workflows_completed: Counter::new("orchestrator_workflows_completed_total", "Total workflows completed")
                .map_err(|e| CoreError::Other(e.into()))?,
            workflows_failed: Counter::new("orchestrator_workflows_failed_total", "Total workflows that ended failed")
                .map_err(|e| CoreError::Other(e.into()))?,
            agent_calls_succeeded: Counter::new("orchestrator_agent_calls_succeeded_total", "Total agent node executions that succeeded")
                .map_err(|e| CoreError::Other(e.into()))?,
            agent_calls_failed: Counter::new("orchestrator_agent_calls_failed_total", "Total agent node executions that failed")
                .map_err(|e| CoreError::Other(e.into()))?,
            circuit_breakers_open: Gauge::new("orchestrator_circuit_breakers_open", "Number of services with an open circuit breaker")
                .map_err(|e| CoreError::Other(e.into()))?,
        };

        metrics.register_all().map_err(|e| CoreError::Other(e.into()))?;
        Ok(Arc::new(metrics))
    }

    fn register_all(&self) -> Result<(), prometheus::Error> {
        self.registry.register(Box::new(self.workflows_started.clone()))?;
        self.registry.register(Box::new(self.workflows_completed.clone()))?;
        self.registry.register(Box::new(self.workflows_failed.clone()))?;
        self.registry.register(Box::new(self.agent_calls_succeeded.clone()))?;
        self.registry.register(Box::new(self.agent_calls_failed.clone()))?;
        self.registry.register(Box::new(self.circuit_breakers_open.clone()))?;
        Ok(())
    }

    /// Subscribes to the event bus (C11) so metrics stay current without
    /// every caller of `WorkflowEngine`/`ResilienceCoordinator` threading a
    /// metrics handle through. Mirrors `ProgressGateway::subscribe_events`.
    pub async fn subscribe_events(self: &Arc<Self>, events: &Arc<EventManager>) {
        let started = Arc::clone(self);
        let _ = events
            .subscribe(EventType::WorkflowStarted, move |_event| started.workflows_started.inc())
            .await;

        let completed = Arc::clone(self);
        let _ = events
            .subscribe(EventType::WorkflowCompleted, move |_event| completed.workflows_completed.inc())
            .await;

        let failed = Arc::clone(self);
        let _ = events
            .subscribe(EventType::WorkflowFailed, move |_event| failed.workflows_failed.inc())
            .await;

        let agent_outcome = Arc::clone(self);
        let _ = events
            .subscribe(EventType::AgentCompleted, move |event| {
                let succeeded = event
                    .data
                    .get("success")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if succeeded {
                    agent_outcome.agent_calls_succeeded.inc();
                } else {
                    agent_outcome.agent_calls_failed.inc();
                }
            })
            .await;
    }

    pub fn set_circuit_breakers_open(&self, count: usize) {
        self.circuit_breakers_open.set(count as f64);
    }

    /// Renders the registry in Prometheus text exposition format for the
    /// `/metrics` endpoint.
    pub fn export(&self) -> CoreResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| CoreError::Other(e.into()))?;
        String::from_utf8(buffer).map_err(|e| {
            warn!(error = %e, "metrics export produced non-utf8 output");
            CoreError::Other(e.into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;
    use std::collections::HashMap as StdHashMap;

    #[tokio::test]
    async fn workflow_lifecycle_events_increment_counters() {
        let cache: Arc<dyn crate::cache::CacheBackend> = Arc::new(InMemoryCacheBackend::new());
        let events = EventManager::new(cache, "test");
        let metrics = OrchestratorMetrics::new().unwrap();
        metrics.subscribe_events(&events).await;

        events.emit(EventType::WorkflowStarted, StdHashMap::new()).await.unwrap();
        events.emit(EventType::WorkflowCompleted, StdHashMap::new()).await.unwrap();

        let exported = metrics.export().unwrap();
        assert!(exported.contains("orchestrator_workflows_started_total 1"));
        assert!(exported.contains("orchestrator_workflows_completed_total 1"));
    }

    #[test]
    fn circuit_breaker_gauge_reflects_latest_count() {
        let metrics = OrchestratorMetrics::new().unwrap();
        metrics.set_circuit_breakers_open(3);
        let exported = metrics.export().unwrap();
        assert!(exported.contains("orchestrator_circuit_breakers_open 3"));
    }
}
