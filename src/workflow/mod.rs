//! Workflow engine (C12): drives a DAG of agent/synthesis/service/validation
//! nodes for one assessment, checkpointing through `store`/`cache` after
//! every transition (§4.5).

pub mod dag;
pub mod engine;
pub mod nodes;

pub use dag::{build_standard_dag, default_critical_path, ErrorTolerance, WorkflowConfig};
pub use engine::WorkflowEngine;
