use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::assessment::ProgressRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Agent,
    Synthesis,
    Decision,
    ProfessionalService,
    Validation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    pub operation: String,
    pub timeout_seconds: u64,
    pub extra: HashMap<String, String>,
}

/// Static DAG node definition (§3 "Node (N)"). Immutable for the lifetime of
/// one `WorkflowState`; per-run mutable data (status, result) lives alongside
/// it in `WorkflowState::nodes`, not on this type, mirroring the split the
/// spec draws between "N" (definition) and the per-node entries of "W".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub config: NodeConfig,
    pub dependencies: Vec<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            config: NodeConfig::default(),
            dependencies: Vec::new(),
        }
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.dependencies = ids.into_iter().collect();
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.config.timeout_seconds = seconds;
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.config.operation = operation.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Initialized,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub node: Node,
    pub status: NodeStatus,
    pub result: Option<serde_json::Value>,
}

/// Runtime execution state of one workflow (§3 "Workflow state (W)"),
/// exclusively owned and mutated by `workflow::WorkflowEngine`; every other
/// component reads a checkpointed copy via `store`/`cache`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub assessment_id: Uuid,
    pub shared_data: HashMap<String, serde_json::Value>,
    pub nodes: HashMap<String, NodeEntry>,
    pub completed_agents: Vec<String>,
    pub failed_agents: Vec<String>,
    pub current_agent: Option<String>,
    pub status: WorkflowStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub messages: Vec<String>,
    pub progress: ProgressRecord,
    pub error: Option<String>,
}

const MAX_MESSAGE_LOG: usize = 200;

impl WorkflowState {
    pub fn new(workflow_id: impl Into<String>, assessment_id: Uuid, nodes: Vec<Node>) -> Self {
        let total = nodes.len() as u32;
        let entries = nodes
            .into_iter()
            .map(|n| {
                (
                    n.id.clone(),
                    NodeEntry {
                        node: n,
                        status: NodeStatus::Pending,
                        result: None,
                    },
                )
            })
            .collect();

        Self {
            workflow_id: workflow_id.into(),
            assessment_id,
            shared_data: HashMap::new(),
            nodes: entries,
            completed_agents: Vec::new(),
            failed_agents: Vec::new(),
            current_agent: None,
            status: WorkflowStatus::Initialized,
            start_time: Utc::now(),
            end_time: None,
            messages: Vec::new(),
            progress: ProgressRecord::new(total),
            error: None,
        }
    }

    pub fn push_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
        if self.messages.len() > MAX_MESSAGE_LOG {
            let excess = self.messages.len() - MAX_MESSAGE_LOG;
            self.messages.drain(0..excess);
        }
    }

    /// §3 invariant: `completed_agents ∪ failed_agents` never share a member.
    pub fn mark_agent_completed(&mut self, agent: impl Into<String>) {
        let agent = agent.into();
        self.failed_agents.retain(|a| a != &agent);
        if !self.completed_agents.contains(&agent) {
            self.completed_agents.push(agent);
        }
    }

    pub fn mark_agent_failed(&mut self, agent: impl Into<String>) {
        let agent = agent.into();
        if self.completed_agents.contains(&agent) {
            return;
        }
        if !self.failed_agents.contains(&agent) {
            self.failed_agents.push(agent);
        }
    }

    /// §8 property 3: dependency obedience — a node is eligible only once
    /// every declared dependency has status `Completed`.
    pub fn is_eligible(&self, node_id: &str) -> bool {
        let Some(entry) = self.nodes.get(node_id) else {
            return false;
        };
        if entry.status != NodeStatus::Pending {
            return false;
        }
        entry.node.dependencies.iter().all(|dep| {
            self.nodes
                .get(dep)
                .map(|e| e.status == NodeStatus::Completed)
                .unwrap_or(false)
        })
    }

    pub fn eligible_nodes(&self) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|id| self.is_eligible(id))
            .cloned()
            .collect()
    }

    pub fn set_node_status(&mut self, node_id: &str, status: NodeStatus) {
        if let Some(entry) = self.nodes.get_mut(node_id) {
            entry.status = status;
        }
    }

    pub fn set_node_result(&mut self, node_id: &str, result: serde_json::Value) {
        if let Some(entry) = self.nodes.get_mut(node_id) {
            entry.result = Some(result);
        }
    }

    pub fn all_terminal(&self) -> bool {
        self.nodes
            .values()
            .all(|e| matches!(e.status, NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Cancelled))
    }

    pub fn has_failed_critical_path(&self, critical: &HashSet<String>) -> bool {
        self.nodes
            .iter()
            .any(|(id, e)| e.status == NodeStatus::Failed && critical.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorkflowState {
        let a = Node::new("a", "agent-a", NodeKind::Agent);
        let b = Node::new("b", "synthesis", NodeKind::Synthesis).depends_on(["a".to_string()]);
        WorkflowState::new("wf-1", Uuid::new_v4(), vec![a, b])
    }

    #[test]
    fn node_is_not_eligible_until_dependencies_complete() {
        let mut wf = sample();
        assert_eq!(wf.eligible_nodes(), vec!["a".to_string()]);
        wf.set_node_status("a", NodeStatus::Completed);
        assert_eq!(wf.eligible_nodes(), vec!["b".to_string()]);
    }

    #[test]
    fn completed_and_failed_agents_never_overlap() {
        let mut wf = sample();
        wf.mark_agent_failed("agent-a");
        wf.mark_agent_completed("agent-a");
        assert!(wf.completed_agents.contains(&"agent-a".to_string()));
        assert!(!wf.failed_agents.contains(&"agent-a".to_string()));
    }

    #[test]
    fn message_log_is_bounded() {
        let mut wf = sample();
        for i in 0..(MAX_MESSAGE_LOG + 50) {
            wf.push_message(format!("m{i}"));
        }
        assert_eq!(wf.messages.len(), MAX_MESSAGE_LOG);
        assert_eq!(wf.messages.last().unwrap(), &format!("m{}", MAX_MESSAGE_LOG + 49));
    }
}
