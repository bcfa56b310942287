//! Resilient multi-agent orchestration substrate.
//!
//! Coordinates AI agents (C1/C-agents), persists assessment and workflow
//! state (C2/C3), enforces per-service rate limits (C4), and composes
//! circuit breaking, retry, and fallback (C5-C8) behind one
//! `ResilienceCoordinator` so that every outbound call into an unreliable
//! dependency degrades gracefully instead of cascading. Health checks and
//! failover (C9/C10) watch those dependencies; a pub/sub event bus (C11)
//! and WebSocket gateway (C13) carry progress out to observers while the
//! DAG-based workflow engine (C12) drives an assessment from start to
//! finish, checkpointing after every node transition.

pub mod agents;
pub mod audit_logging;
pub mod cache;
pub mod domain;
pub mod error;
pub mod events;
pub mod failover;
pub mod health;
pub mod ids;
pub mod platform;
pub mod progress_gateway;
pub mod rate_limiting;
pub mod resilience;
pub mod store;
pub mod utils;
pub mod workflow;

pub use error::{CoreError, CoreResult};
pub use platform::{Platform, PlatformConfig, PlatformContext, PlatformRuntime};
