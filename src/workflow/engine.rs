use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::{AgentExecutionContext, AgentOutput};
use crate::cache::{keys, CacheBackend, WORKFLOW_STATE_TTL};
use crate::domain::{
    Assessment, AssessmentStatus, Node, NodeKind, NodeStatus, Recommendation, WorkflowState, WorkflowStatus,
};
use crate::error::{CoreError, CoreResult};
use crate::events::EventManager;
use crate::resilience::{ResilienceCoordinator, ResilientCallOptions};
use crate::store::SharedStore;

use super::dag::{self, ErrorTolerance, WorkflowConfig};

/// Drives one DAG to completion for one assessment (C12), grounded on
/// `original_source/src/infra_mind/orchestration/langgraph_orchestrator.py` (its
/// `AgentNode`/`LangGraphOrchestrator` node-dispatch loop) and
/// `original_source/src/infra_mind/workflows/assessment_workflow.py` for the concrete node
/// table. Owns no long-lived mutable state itself — each run loads its
/// `WorkflowState` from `store` so it can resume after a crash (§4.5
/// "Checkpointing").
pub struct WorkflowEngine {
    store: SharedStore,
    cache: Arc<dyn CacheBackend>,
    events: Arc<EventManager>,
    agents: crate::agents::AgentRegistry,
    resilience: Arc<ResilienceCoordinator>,
    config: WorkflowConfig,
    cancel_tokens: Mutex<HashMap<String, CancellationToken>>,
}

struct NodeOutcome {
    node_id: String,
    status: NodeStatus,
    result: Option<Value>,
    agent_name: Option<String>,
    agent_succeeded: bool,
}

impl WorkflowEngine {
    pub fn new(
        store: SharedStore,
        cache: Arc<dyn CacheBackend>,
        events: Arc<EventManager>,
        agents: crate::agents::AgentRegistry,
        resilience: Arc<ResilienceCoordinator>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            cache,
            events,
            agents,
            resilience,
            config,
            cancel_tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Materialises the standard DAG for `assessment` over every currently
    /// registered agent, persists the initial state, and runs it to
    /// completion. Returns the workflow id.
    pub async fn start(&self, mut assessment: Assessment) -> CoreResult<String> {
        let agent_names = self.agents.names();
        let nodes = dag::build_standard_dag(&agent_names, self.config.default_node_timeout);
        let critical_path = dag::default_critical_path(&nodes);

        let workflow_id = format!("wf-{}", Uuid::new_v4());
        let state = WorkflowState::new(workflow_id.clone(), assessment.id, nodes);

        assessment.apply_progress(0.0, AssessmentStatus::InProgress);
        self.store.save_assessment(&assessment).await?;
        self.checkpoint(&state).await?;

        let token = CancellationToken::new();
        self.cancel_tokens.lock().insert(workflow_id.clone(), token.clone());

        self.events
            .emit(
                crate::domain::EventType::WorkflowStarted,
                HashMap::from([("workflow_id".to_string(), Value::String(workflow_id.clone()))]),
            )
            .await?;

        self.drive(workflow_id.clone(), assessment.id, critical_path, token).await?;
        Ok(workflow_id)
    }

    /// Resumes a previously checkpointed run (e.g. after a restart). RUNNING
    /// nodes are re-queued as PENDING first (§4.5 "Cancellation"/"Checkpointing").
    pub async fn resume(&self, workflow_id: &str) -> CoreResult<()> {
        let mut state = self.store.get_workflow_state(workflow_id).await?;
        for entry in state.nodes.values_mut() {
            if entry.status == NodeStatus::Running {
                entry.status = NodeStatus::Pending;
            }
        }
        let critical_path = dag::default_critical_path(&state.nodes.values().map(|e| e.node.clone()).collect::<Vec<Node>>());
        self.checkpoint(&state).await?;

        let token = CancellationToken::new();
        self.cancel_tokens.lock().insert(workflow_id.to_string(), token.clone());
        self.drive(workflow_id.to_string(), state.assessment_id, critical_path, token).await
    }

    /// Idempotent cancellation (§8 property 12): cancelling an already
    /// terminal or already-cancelled workflow is a no-op.
    pub async fn cancel(&self, workflow_id: &str) -> CoreResult<()> {
        if let Some(token) = self.cancel_tokens.lock().get(workflow_id) {
            token.cancel();
        }
        Ok(())
    }

    async fn checkpoint(&self, state: &WorkflowState) -> CoreResult<()> {
        self.store.save_workflow_state(state).await?;
        if let Ok(serialized) = serde_json::to_string(state) {
            let _ = self
                .cache
                .set_ex(&keys::workflow_state(&state.workflow_id), serialized, WORKFLOW_STATE_TTL)
                .await;
        }
        Ok(())
    }

    async fn persist_assessment_retrying_once(&self, assessment: &Assessment) {
        if self.store.save_assessment(assessment).await.is_err() {
            warn!(assessment_id = %assessment.id, "assessment persistence failed, retrying once");
            if let Err(err) = self.store.save_assessment(assessment).await {
                warn!(assessment_id = %assessment.id, error = %err, "assessment persistence degraded after retry");
            }
        }
    }

    async fn drive(
        &self,
        workflow_id: String,
        assessment_id: Uuid,
        critical_path: HashSet<String>,
        cancel: CancellationToken,
    ) -> CoreResult<()> {
        let mut state = self.store.get_workflow_state(&workflow_id).await?;
        let mut assessment = self.store.get_assessment(assessment_id).await?;
        state.status = WorkflowStatus::Running;

        loop {
            if cancel.is_cancelled() {
                state.status = WorkflowStatus::Cancelled;
                state.end_time = Some(Utc::now());
                state.push_message("workflow cancelled".to_string());
                break;
            }
            if state.all_terminal() {
                break;
            }

            let eligible = state.eligible_nodes();
            if eligible.is_empty() {
                state.status = WorkflowStatus::Failed;
                state.error = Some("no eligible nodes remain but workflow is not complete".to_string());
                state.push_message("deadlock: no node became eligible".to_string());
                break;
            }

            for node_id in &eligible {
                state.set_node_status(node_id, NodeStatus::Running);
            }

            let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
            let mut handles = Vec::new();
            for node_id in &eligible {
                let node = state.nodes[node_id].node.clone();
                let shared_data = state.shared_data.clone();
                let recommendations = self.store.list_recommendations(assessment_id).await.unwrap_or_default();
                let assessment_snapshot = assessment.clone();
                let permit = Arc::clone(&semaphore);
                let this = self;
                handles.push(async move {
                    let _permit = permit.acquire_owned().await.expect("semaphore not closed");
                    this.execute_node(&node, &shared_data, &recommendations, &assessment_snapshot).await
                });
            }

            let outcomes: Vec<NodeOutcome> = futures::future::join_all(handles).await;

            for outcome in outcomes {
                state.set_node_status(&outcome.node_id, outcome.status);
                if let Some(result) = outcome.result.clone() {
                    state.set_node_result(&outcome.node_id, result.clone());
                    if let Some(key) = node_result_shared_key(&outcome.node_id) {
                        state.shared_data.insert(key, result);
                    }
                }
                if let Some(agent_name) = &outcome.agent_name {
                    if outcome.agent_succeeded {
                        state.mark_agent_completed(agent_name.clone());
                    } else {
                        state.mark_agent_failed(agent_name.clone());
                    }
                }
                if outcome.status == NodeStatus::Failed {
                    state.push_message(format!("node {} failed", outcome.node_id));
                }
            }

            let total = state.nodes.len().max(1) as f64;
            let finished = state
                .nodes
                .values()
                .filter(|e| matches!(e.status, NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Cancelled))
                .count() as f64;
            let progress = (finished / total) * 100.0;
            assessment.apply_progress(progress, AssessmentStatus::AgentAnalysis);
            state.progress.completed_steps = finished as u32;
            state.progress.updated_at = Utc::now();

            self.persist_assessment_retrying_once(&assessment).await;
            self.checkpoint(&state).await?;
            self.events
                .emit(
                    crate::domain::EventType::WorkflowProgress,
                    HashMap::from([
                        ("workflow_id".to_string(), Value::String(workflow_id.clone())),
                        ("percentage".to_string(), serde_json::json!(progress)),
                    ]),
                )
                .await
                .ok();
        }

        let final_status = if state.status == WorkflowStatus::Cancelled {
            WorkflowStatus::Cancelled
        } else {
            let critical_failed = state.has_failed_critical_path(&critical_path);
            let should_fail = match self.config.error_tolerance {
                ErrorTolerance::Low => state.nodes.values().any(|e| e.status == NodeStatus::Failed),
                ErrorTolerance::Medium => critical_failed,
                ErrorTolerance::High => false,
            };
            if should_fail {
                WorkflowStatus::Failed
            } else {
                WorkflowStatus::Completed
            }
        };
        state.status = final_status;
        state.end_time = Some(Utc::now());

        match final_status {
            WorkflowStatus::Completed => {
                assessment.apply_progress(100.0, AssessmentStatus::Completed);
            }
            WorkflowStatus::Failed => {
                assessment.fail(state.error.clone().unwrap_or_else(|| "workflow failed".to_string()));
            }
            _ => {}
        }

        self.store.save_assessment(&assessment).await?;
        self.checkpoint(&state).await?;

        match final_status {
            WorkflowStatus::Completed => {
                self.events
                    .emit(
                        crate::domain::EventType::WorkflowCompleted,
                        HashMap::from([("workflow_id".to_string(), Value::String(workflow_id.clone()))]),
                    )
                    .await
                    .ok();
            }
            WorkflowStatus::Failed => {
                self.events
                    .emit(
                        crate::domain::EventType::WorkflowFailed,
                        HashMap::from([("workflow_id".to_string(), Value::String(workflow_id.clone()))]),
                    )
                    .await
                    .ok();
            }
            _ => {}
        }

        self.cancel_tokens.lock().remove(&workflow_id);
        info!(workflow_id, status = ?final_status, "workflow run finished");
        Ok(())
    }

    async fn execute_node(
        &self,
        node: &Node,
        shared_data: &HashMap<String, Value>,
        existing_recommendations: &[Recommendation],
        assessment: &Assessment,
    ) -> NodeOutcome {
        match node.kind {
            NodeKind::Agent => self.execute_agent_node(node, shared_data, assessment).await,
            NodeKind::Synthesis => self.execute_synthesis_node(node, existing_recommendations),
            NodeKind::ProfessionalService => self.execute_service_node(node, shared_data).await,
            NodeKind::Validation => self.execute_validation_node(node, shared_data),
            NodeKind::Decision => NodeOutcome {
                node_id: node.id.clone(),
                status: NodeStatus::Completed,
                result: Some(serde_json::json!({"decision": "default"})),
                agent_name: None,
                agent_succeeded: true,
            },
        }
    }

    /// Wraps the agent node body in its configured timeout (§4.5 "A node
    /// runs with its configured timeout"; §5: a per-node timeout is itself a
    /// cancellation, distinguished here by the `"timed out"` message). On
    /// elapse the node is recorded FAILED with the same fallback-recommendation
    /// and event emissions a primary-call failure would produce, so the
    /// workflow continues exactly as it would for any other agent failure.
    async fn execute_agent_node(&self, node: &Node, shared_data: &HashMap<String, Value>, assessment: &Assessment) -> NodeOutcome {
        let timeout = Duration::from_secs(node.config.timeout_seconds.max(1));
        match tokio::time::timeout(timeout, self.execute_agent_node_inner(node, shared_data, assessment)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let agent_name = node.name.clone();
                warn!(agent_name, timeout_seconds = node.config.timeout_seconds, "agent node timed out");
                self.agent_failure_outcome(
                    node,
                    shared_data,
                    agent_name,
                    Some(format!("node timed out after {}s", node.config.timeout_seconds)),
                    false,
                )
                .await
            }
        }
    }

    async fn execute_agent_node_inner(&self, node: &Node, shared_data: &HashMap<String, Value>, assessment: &Assessment) -> NodeOutcome {
        let agent_name = node.name.clone();
        let Some(worker) = self.agents.get(&agent_name) else {
            return NodeOutcome {
                node_id: node.id.clone(),
                status: NodeStatus::Failed,
                result: Some(serde_json::json!({"error": "agent not registered"})),
                agent_name: Some(agent_name),
                agent_succeeded: false,
            };
        };

        self.events
            .emit(
                crate::domain::EventType::AgentStarted,
                HashMap::from([("agent_name".to_string(), Value::String(agent_name.clone()))]),
            )
            .await
            .ok();

        let context = AgentExecutionContext {
            shared_data: shared_data.clone(),
        };
        let assessment = assessment.clone();
        let worker_ref = Arc::clone(&worker);
        let opts = ResilientCallOptions {
            fallback_key: Some(format!("agent:{agent_name}")),
            default_data: None,
        };

        let outcome = self
            .resilience
            .resilient_call(&agent_name, opts, move || {
                let worker_ref = Arc::clone(&worker_ref);
                let assessment = assessment.clone();
                let context = context.clone();
                async move { worker_ref.execute(&assessment, &context).await }
            })
            .await;

        match outcome.data {
            Some(output) if output.success => {
                for recommendation in &output.recommendations {
                    if let Err(err) = self.store.save_recommendation(recommendation).await {
                        warn!(agent_name, error = %err, "failed to persist recommendation");
                    }
                }
                self.events
                    .emit(
                        crate::domain::EventType::AgentCompleted,
                        HashMap::from([
                            ("agent_name".to_string(), Value::String(agent_name.clone())),
                            ("success".to_string(), Value::Bool(true)),
                        ]),
                    )
                    .await
                    .ok();
                NodeOutcome {
                    node_id: node.id.clone(),
                    status: NodeStatus::Completed,
                    result: serde_json::to_value(&output).ok(),
                    agent_name: Some(agent_name),
                    agent_succeeded: true,
                }
            }
            _ => {
                self.agent_failure_outcome(node, shared_data, agent_name, outcome.error, outcome.fallback_used)
                    .await
            }
        }
    }

    /// Shared failure path for an agent node: persists a deterministic
    /// fallback recommendation, emits `AGENT_COMPLETED(success=false)` and
    /// `AGENT_FAILED`, and records the node FAILED. Used both when the
    /// primary call (plus its resilience fallback chain) is exhausted and
    /// when the node's whole execution elapses its configured timeout.
    async fn agent_failure_outcome(
        &self,
        node: &Node,
        shared_data: &HashMap<String, Value>,
        agent_name: String,
        error_message: Option<String>,
        fallback_used: bool,
    ) -> NodeOutcome {
        let fallback = fallback_recommendation(&agent_name, assessment_id_from(shared_data));
        if let Some(recommendation) = &fallback {
            let _ = self.store.save_recommendation(recommendation).await;
        }
        self.events
            .emit(
                crate::domain::EventType::AgentCompleted,
                HashMap::from([
                    ("agent_name".to_string(), Value::String(agent_name.clone())),
                    ("success".to_string(), Value::Bool(false)),
                ]),
            )
            .await
            .ok();
        self.events
            .emit(
                crate::domain::EventType::AgentFailed,
                HashMap::from([("agent_name".to_string(), Value::String(agent_name.clone()))]),
            )
            .await
            .ok();
        NodeOutcome {
            node_id: node.id.clone(),
            status: NodeStatus::Failed,
            result: Some(serde_json::json!({"error": error_message, "fallback_used": fallback_used})),
            agent_name: Some(agent_name),
            agent_succeeded: false,
        }
    }

    fn execute_synthesis_node(&self, node: &Node, recommendations: &[Recommendation]) -> NodeOutcome {
        let synthesis = super::nodes::synthesize(recommendations);
        NodeOutcome {
            node_id: node.id.clone(),
            status: NodeStatus::Completed,
            result: serde_json::to_value(&synthesis).ok(),
            agent_name: None,
            agent_succeeded: true,
        }
    }

    /// Wraps the service node body in its configured timeout, same as
    /// `execute_agent_node` (§4.5, §7 "Node timeout" row). On elapse the node
    /// is recorded FAILED rather than COMPLETED — professional-service nodes
    /// are advisory to downstream nodes but a node that never returns is not
    /// a successful one.
    async fn execute_service_node(&self, node: &Node, shared_data: &HashMap<String, Value>) -> NodeOutcome {
        let timeout = Duration::from_secs(node.config.timeout_seconds.max(1));
        match tokio::time::timeout(timeout, self.execute_service_node_inner(node, shared_data)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(node_id = %node.id, timeout_seconds = node.config.timeout_seconds, "service node timed out");
                NodeOutcome {
                    node_id: node.id.clone(),
                    status: NodeStatus::Failed,
                    result: Some(serde_json::json!({
                        "error": format!("node timed out after {}s", node.config.timeout_seconds),
                    })),
                    agent_name: None,
                    agent_succeeded: false,
                }
            }
        }
    }

    /// Professional-service nodes (compliance/cost/report generation) are
    /// opaque beyond `{status, quality_score?, summary?}` (§4.5); their
    /// concrete integrations are out of scope here, so the call made
    /// through `resilient_call` is a synthetic placeholder that still
    /// exercises rate limiting, circuit breaking and fallback the same way
    /// a real integration would.
    async fn execute_service_node_inner(&self, node: &Node, shared_data: &HashMap<String, Value>) -> NodeOutcome {
        let service = node.config.operation.clone();
        let opts = ResilientCallOptions {
            fallback_key: Some(format!("service:{service}")),
            default_data: Some(serde_json::json!({
                "status": "degraded",
                "quality_score": 0.5,
                "summary": format!("{service} unavailable, using default"),
            })),
        };
        let node_name = node.name.clone();
        let shared_data = shared_data.clone();

        let outcome = self
            .resilience
            .resilient_call(&service, opts, move || {
                let node_name = node_name.clone();
                let shared_data = shared_data.clone();
                async move {
                    let confidence = shared_data
                        .get("recommendation_synthesis")
                        .and_then(|v| v.get("overall_confidence"))
                        .and_then(|v| v.as_f64())
                        .unwrap_or(0.75);
                    Ok::<Value, CoreError>(serde_json::json!({
                        "status": "completed",
                        "quality_score": confidence,
                        "summary": format!("{node_name} completed"),
                    }))
                }
            })
            .await;

        NodeOutcome {
            node_id: node.id.clone(),
            status: NodeStatus::Completed,
            result: outcome.data,
            agent_name: None,
            agent_succeeded: true,
        }
    }

    fn execute_validation_node(&self, node: &Node, shared_data: &HashMap<String, Value>) -> NodeOutcome {
        if node.id == "data_validation" {
            return NodeOutcome {
                node_id: node.id.clone(),
                status: NodeStatus::Completed,
                result: Some(serde_json::json!({"status": "completed"})),
                agent_name: None,
                agent_succeeded: true,
            };
        }

        let upstream: Vec<Value> = shared_data.values().cloned().collect();
        let result = super::nodes::validate_quality(&upstream, None);
        NodeOutcome {
            node_id: node.id.clone(),
            status: NodeStatus::Completed,
            result: serde_json::to_value(&result).ok(),
            agent_name: None,
            agent_succeeded: true,
        }
    }
}

fn node_result_shared_key(node_id: &str) -> Option<String> {
    match node_id {
        "recommendation_synthesis" => Some("recommendation_synthesis".to_string()),
        "compliance_assessment" | "cost_modeling" | "executive_report" | "technical_report" | "stakeholder_summaries" => {
            Some(node_id.to_string())
        }
        _ => None,
    }
}

fn assessment_id_from(shared_data: &HashMap<String, Value>) -> Uuid {
    shared_data
        .get("assessment_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4)
}

/// Deterministic, low-confidence placeholder recommendation substituted when
/// an agent node exhausts all resilience options (§4.5 "on failure,
/// substitutes a deterministic fallback structure specific to the agent
/// role so the workflow continues").
fn fallback_recommendation(agent_name: &str, assessment_id: Uuid) -> Option<Recommendation> {
    let mut recommendation = Recommendation::new(
        assessment_id,
        agent_name,
        format!("{agent_name} unavailable, manual review recommended"),
        0.1,
    );
    recommendation.category = "unavailable".to_string();
    recommendation.set_summary(format!("{agent_name} could not complete analysis; this is a placeholder result."));
    Some(recommendation)
}
