//! Shared data model (§3): the types every component reads or writes.
//!
//! Modelled after `layer2::types` — `uuid::Uuid` identifiers,
//! `chrono::DateTime<Utc>` timestamps, `validator::Validate` derives on
//! anything constructed from request input, and `HashMap<String, String>`
//! metadata bags throughout.

mod assessment;
mod circuit;
mod event;
mod rate_limit;
mod recommendation;
mod service_endpoint;
mod workflow_state;

pub use assessment::{Assessment, AssessmentStatus, ProgressRecord};
pub use circuit::{CircuitConfig, CircuitState, CircuitStatus};
pub use event::{Event, EventType};
pub use rate_limit::{RateLimitAlgorithmKind, RateLimitBucket, RateLimitScope};
pub use recommendation::{
    ConfidenceLevel, CostEstimate, ImplementationStep, Priority, Recommendation, Risk,
    ServiceProvider, ServiceRecommendation,
};
pub use service_endpoint::ServiceEndpoint;
pub use workflow_state::{Node, NodeConfig, NodeKind, NodeStatus, WorkflowState, WorkflowStatus};
