//! Agent capability interface and registry.
//!
//! Agents vary in role but share one execution contract (§9 design note:
//! "model them as a capability interface plus a tagged role, not as a class
//! hierarchy"). Prompt text and model invocation are out of scope here; this
//! module only defines the contract the workflow engine's agent-node
//! dispatcher calls through `resilience::ResilienceCoordinator`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Assessment, Recommendation};
use crate::error::CoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Strategic,
    Technical,
    Research,
    Compliance,
    CostModeling,
    Security,
    Reliability,
    Migration,
    Reporting,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Error,
    Maintenance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_name: String,
    pub role: AgentRole,
    pub capabilities: Vec<String>,
    pub max_concurrent_requests: usize,
    pub timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: "agent".to_string(),
            role: AgentRole::General,
            capabilities: Vec::new(),
            max_concurrent_requests: 4,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub requests_processed: u64,
    pub average_response_time_ms: f64,
    pub success_rate: f64,
    #[serde(skip, default = "SystemTime::now")]
    pub last_activity: SystemTime,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self {
            requests_processed: 0,
            average_response_time_ms: 0.0,
            success_rate: 1.0,
            last_activity: SystemTime::now(),
        }
    }
}

impl AgentMetrics {
    fn record(&mut self, elapsed_ms: f64, success: bool) {
        let n = self.requests_processed as f64;
        self.average_response_time_ms = (self.average_response_time_ms * n + elapsed_ms) / (n + 1.0);
        self.success_rate = (self.success_rate * n + if success { 1.0 } else { 0.0 }) / (n + 1.0);
        self.requests_processed += 1;
        self.last_activity = SystemTime::now();
    }
}

/// Outcome of one agent invocation (§9: `{status, recommendations, data,
/// metrics, error?}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    pub success: bool,
    pub recommendations: Vec<Recommendation>,
    pub data: HashMap<String, Value>,
    pub metrics: HashMap<String, f64>,
    pub error: Option<String>,
}

impl AgentOutput {
    pub fn success(recommendations: Vec<Recommendation>) -> Self {
        Self {
            success: true,
            recommendations,
            data: HashMap::new(),
            metrics: HashMap::new(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            recommendations: Vec::new(),
            data: HashMap::new(),
            metrics: HashMap::new(),
            error: Some(error.into()),
        }
    }
}

/// Shared data an agent reads from its declared dependencies and writes
/// back into, mirroring `WorkflowState.shared_data`.
#[derive(Debug, Clone, Default)]
pub struct AgentExecutionContext {
    pub shared_data: HashMap<String, Value>,
}

/// The uniform contract every agent implements regardless of role.
#[async_trait]
pub trait AgentWorker: Send + Sync {
    fn name(&self) -> &str;
    fn role(&self) -> AgentRole;
    async fn execute(&self, assessment: &Assessment, context: &AgentExecutionContext) -> CoreResult<AgentOutput>;
}

struct RegisteredAgent {
    worker: Arc<dyn AgentWorker>,
    config: AgentConfig,
    status: AgentStatus,
    metrics: AgentMetrics,
}

/// Looks agents up by name for the workflow engine's agent-node dispatcher.
#[derive(Clone)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<String, RegisteredAgent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register(&self, config: AgentConfig, worker: Arc<dyn AgentWorker>) {
        let mut agents = self.agents.write();
        agents.insert(
            config.agent_name.clone(),
            RegisteredAgent {
                worker,
                config,
                status: AgentStatus::Idle,
                metrics: AgentMetrics::default(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentWorker>> {
        self.agents.read().get(name).map(|a| Arc::clone(&a.worker))
    }

    pub fn config(&self, name: &str) -> Option<AgentConfig> {
        self.agents.read().get(name).map(|a| a.config.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.read().keys().cloned().collect()
    }

    pub fn record_outcome(&self, name: &str, elapsed_ms: f64, success: bool) {
        let mut agents = self.agents.write();
        if let Some(agent) = agents.get_mut(name) {
            agent.metrics.record(elapsed_ms, success);
            agent.status = if success { AgentStatus::Idle } else { AgentStatus::Error };
        }
    }

    pub fn metrics(&self, name: &str) -> Option<AgentMetrics> {
        self.agents.read().get(name).map(|a| a.metrics.clone())
    }

    pub fn by_role(&self, role: AgentRole) -> Vec<String> {
        self.agents
            .read()
            .iter()
            .filter(|(_, a)| a.config.role == role)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Assessment;

    struct EchoAgent {
        name: String,
    }

    #[async_trait]
    impl AgentWorker for EchoAgent {
        fn name(&self) -> &str {
            &self.name
        }

        fn role(&self) -> AgentRole {
            AgentRole::General
        }

        async fn execute(&self, _assessment: &Assessment, _context: &AgentExecutionContext) -> CoreResult<AgentOutput> {
            Ok(AgentOutput::success(Vec::new()))
        }
    }

    #[tokio::test]
    async fn registry_roundtrips_and_tracks_metrics() {
        let registry = AgentRegistry::new();
        registry.register(
            AgentConfig {
                agent_name: "strategic_agent".to_string(),
                role: AgentRole::Strategic,
                ..AgentConfig::default()
            },
            Arc::new(EchoAgent { name: "strategic_agent".to_string() }),
        );

        let worker = registry.get("strategic_agent").unwrap();
        let assessment = Assessment::new("owner", 10);
        let output = worker.execute(&assessment, &AgentExecutionContext::default()).await.unwrap();
        assert!(output.success);

        registry.record_outcome("strategic_agent", 12.0, true);
        let metrics = registry.metrics("strategic_agent").unwrap();
        assert_eq!(metrics.requests_processed, 1);
        assert_eq!(registry.by_role(AgentRole::Strategic), vec!["strategic_agent".to_string()]);
    }
}
