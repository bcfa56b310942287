use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Node, NodeKind};

/// How a node failure on the critical path should affect the overall
/// workflow outcome (§9 Open Question 1: "pick one semantics and document
/// it" — see DESIGN.md for the reasoning).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTolerance {
    /// Any node failure, critical or not, fails the workflow.
    Low,
    /// Only a critical-path node failure fails the workflow; others get a
    /// fallback result and the run continues (matches scenario S2).
    Medium,
    /// Node failures are recorded but never flip the workflow to FAILED.
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub parallelism: usize,
    pub error_tolerance: ErrorTolerance,
    pub default_node_timeout: Duration,
    pub grace_timeout: Duration,
    pub checkpoint_max_age: chrono::Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            parallelism: 5,
            error_tolerance: ErrorTolerance::Medium,
            default_node_timeout: Duration::from_secs(120),
            grace_timeout: Duration::from_secs(10),
            checkpoint_max_age: chrono::Duration::days(7),
        }
    }
}

/// Assembles the fixed infrastructure-assessment DAG (§2's node-type list,
/// §4.5 "Graph assembly"): data validation gates ten parallel agent nodes,
/// which feed synthesis, then professional-service nodes, then reports,
/// then a final advisory validation node. `agent_names` names the
/// registered agents that back each of the ten agent nodes, in order.
pub fn build_standard_dag(agent_names: &[String], node_timeout: Duration) -> Vec<Node> {
    let timeout = node_timeout.as_secs();
    let mut nodes = Vec::new();

    nodes.push(
        Node::new("data_validation", "data_validation", NodeKind::Validation)
            .with_operation("validate_input")
            .with_timeout(timeout),
    );

    let mut agent_ids = Vec::new();
    for name in agent_names {
        let id = format!("agent_{name}");
        nodes.push(
            Node::new(&id, name.clone(), NodeKind::Agent)
                .depends_on(["data_validation".to_string()])
                .with_operation(name.clone())
                .with_timeout(timeout),
        );
        agent_ids.push(id);
    }

    nodes.push(
        Node::new("recommendation_synthesis", "recommendation_synthesis", NodeKind::Synthesis)
            .depends_on(agent_ids.clone())
            .with_operation("synthesize")
            .with_timeout(timeout),
    );

    nodes.push(
        Node::new("compliance_assessment", "compliance_assessment", NodeKind::ProfessionalService)
            .depends_on(["recommendation_synthesis".to_string()])
            .with_operation("compliance_engine")
            .with_timeout(timeout),
    );
    nodes.push(
        Node::new("cost_modeling", "cost_modeling", NodeKind::ProfessionalService)
            .depends_on(["recommendation_synthesis".to_string()])
            .with_operation("cost_modeller")
            .with_timeout(timeout),
    );

    let service_deps = vec!["compliance_assessment".to_string(), "cost_modeling".to_string()];
    nodes.push(
        Node::new("executive_report", "executive_report", NodeKind::ProfessionalService)
            .depends_on(service_deps.clone())
            .with_operation("report_generator")
            .with_timeout(timeout),
    );
    nodes.push(
        Node::new("technical_report", "technical_report", NodeKind::ProfessionalService)
            .depends_on(service_deps)
            .with_operation("report_generator")
            .with_timeout(timeout),
    );

    nodes.push(
        Node::new("stakeholder_summaries", "stakeholder_summaries", NodeKind::ProfessionalService)
            .depends_on(["executive_report".to_string(), "technical_report".to_string()])
            .with_operation("report_generator")
            .with_timeout(timeout),
    );

    nodes.push(
        Node::new("validation", "validation", NodeKind::Validation)
            .depends_on(["stakeholder_summaries".to_string()])
            .with_operation("quality_gate")
            .with_timeout(timeout),
    );

    nodes
}

/// Nodes whose failure should be treated as critical-path under
/// `ErrorTolerance::Medium`: the gating validation node, synthesis, and the
/// final report/validation chain. Agent nodes are deliberately excluded —
/// a single failed agent must not fail the run (scenario S2).
pub fn default_critical_path(nodes: &[Node]) -> HashSet<String> {
    nodes
        .iter()
        .filter(|n| !matches!(n.kind, NodeKind::Agent))
        .map(|n| n.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_dag_gates_agents_behind_validation() {
        let nodes = build_standard_dag(&["strategic_agent".to_string(), "compliance_agent".to_string()], Duration::from_secs(30));
        let validation = nodes.iter().find(|n| n.id == "data_validation").unwrap();
        assert!(validation.dependencies.is_empty());
        let agent = nodes.iter().find(|n| n.id == "agent_strategic_agent").unwrap();
        assert_eq!(agent.dependencies, vec!["data_validation".to_string()]);
        let synthesis = nodes.iter().find(|n| n.id == "recommendation_synthesis").unwrap();
        assert_eq!(synthesis.dependencies.len(), 2);
    }

    #[test]
    fn critical_path_excludes_agent_nodes() {
        let nodes = build_standard_dag(&["strategic_agent".to_string()], Duration::from_secs(30));
        let critical = default_critical_path(&nodes);
        assert!(!critical.contains("agent_strategic_agent"));
        assert!(critical.contains("recommendation_synthesis"));
    }
}
