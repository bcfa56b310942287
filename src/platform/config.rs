//! Typed configuration (§6 "Environment / config"), layered file → env the
//! same way the teacher's original platform config did, but naming exactly
//! the keys the orchestration substrate recognizes rather than inference/
//! training settings that have no counterpart here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::resilience::RetryConfig;
use crate::workflow::{ErrorTolerance, WorkflowConfig};

const DEFAULT_CONFIG_PATH: &str = "configs/platform.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub metadata: MetadataSettings,
    pub observability: ObservabilitySettings,
    pub audit: AuditSettings,
    pub storage: StorageSettings,
    pub workflow: WorkflowSettings,
    pub gateway: GatewaySettings,
    pub health: HealthSettings,
    /// Per-service resilience/rate-limit settings (§6's per-service block);
    /// absent services fall back to `default_service`.
    pub services: HashMap<String, ServiceSettings>,
    pub default_service: ServiceSettings,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            metadata: MetadataSettings::default(),
            observability: ObservabilitySettings::default(),
            audit: AuditSettings::default(),
            storage: StorageSettings::default(),
            workflow: WorkflowSettings::default(),
            gateway: GatewaySettings::default(),
            health: HealthSettings::default(),
            services: HashMap::new(),
            default_service: ServiceSettings::default(),
        }
    }
}

impl PlatformConfig {
    pub fn load() -> Result<Self> {
        Self::load_from_path(None::<PathBuf>)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            File::from(PathBuf::from(DEFAULT_CONFIG_PATH))
                .format(FileFormat::Toml)
                .required(false),
        );

        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path.as_ref())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(Environment::with_prefix("ORCHESTRATOR").separator("__"));

        let config = builder.build()?;
        config
            .try_deserialize()
            .context("invalid platform configuration")
    }

    pub fn service_settings(&self, service: &str) -> ServiceSettings {
        self.services.get(service).cloned().unwrap_or_else(|| self.default_service.clone())
    }

    pub fn workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            parallelism: self.workflow.parallel_execution_limit,
            error_tolerance: self.workflow.error_tolerance,
            default_node_timeout: Duration::from_secs(self.workflow.default_node_timeout_seconds),
            grace_timeout: Duration::from_secs(self.workflow.grace_timeout_seconds),
            checkpoint_max_age: chrono::Duration::hours(self.workflow.workflow_cleanup_max_age_hours as i64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataSettings {
    pub name: String,
    pub environment: String,
    pub instance_id: String,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            name: "assessment-orchestrator".to_string(),
            environment: "development".to_string(),
            instance_id: "instance-0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    pub log_level: String,
    pub metrics_port: u16,
    pub enable_metrics: bool,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: 9090,
            enable_metrics: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub log_path: String,
    pub retention_days: u32,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            log_path: "logs/audit.log".to_string(),
            retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
        }
    }
}

/// §6 "Environment / config": `parallel_execution`, `error_tolerance`,
/// `retry_failed_nodes`, `workflow_cleanup_max_age_hours`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub parallel_execution_limit: usize,
    pub error_tolerance: ErrorTolerance,
    pub retry_failed_nodes: bool,
    pub default_node_timeout_seconds: u64,
    pub grace_timeout_seconds: u64,
    pub workflow_cleanup_max_age_hours: u32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            parallel_execution_limit: 5,
            error_tolerance: ErrorTolerance::Medium,
            retry_failed_nodes: true,
            default_node_timeout_seconds: 120,
            grace_timeout_seconds: 10,
            workflow_cleanup_max_age_hours: 24 * 7,
        }
    }
}

/// §6 `heartbeat_interval`, `heartbeat_timeout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub heartbeat_interval_seconds: u64,
    pub heartbeat_timeout_seconds: u64,
    pub session_buffer: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 30,
            heartbeat_timeout_seconds: 60,
            session_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub failure_threshold: u32,
    pub auto_recovery: bool,
    pub check_interval_seconds: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            auto_recovery: true,
            check_interval_seconds: 30,
        }
    }
}

/// Per-service block from §6: resilience (circuit breaker + retry) and
/// rate-limit fields together, since both key off the same service name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
    pub success_threshold: u32,
    pub call_timeout_seconds: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter: bool,
    pub algorithm: crate::domain::RateLimitAlgorithmKind,
    pub requests_per_minute: u32,
    pub burst_capacity: u32,
    pub refill_rate: f64,
    pub adaptive_threshold: f64,
    pub backoff_factor: f64,
    pub recovery_factor: f64,
    pub window_seconds: u64,
    pub cooldown_seconds: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 30,
            success_threshold: 2,
            call_timeout_seconds: 10,
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            exponential_base: 2.0,
            jitter: true,
            algorithm: crate::domain::RateLimitAlgorithmKind::SlidingWindow,
            requests_per_minute: 60,
            burst_capacity: 10,
            refill_rate: 1.0,
            adaptive_threshold: 0.8,
            backoff_factor: 0.5,
            recovery_factor: 1.2,
            window_seconds: 60,
            cooldown_seconds: 300,
        }
    }
}

impl ServiceSettings {
    pub fn circuit_config(&self) -> crate::domain::CircuitConfig {
        crate::domain::CircuitConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_seconds),
            success_threshold: self.success_threshold,
            call_timeout: Duration::from_secs(self.call_timeout_seconds),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            exponential_base: self.exponential_base,
            jitter: self.jitter,
        }
    }

    pub fn rate_limit_config(&self) -> crate::rate_limiting::RateLimitConfig {
        crate::rate_limiting::RateLimitConfig {
            algorithm: self.algorithm,
            requests_per_minute: self.requests_per_minute,
            burst_capacity: self.burst_capacity,
            refill_rate: self.refill_rate,
            window_seconds: self.window_seconds,
            adaptive_threshold: self.adaptive_threshold,
            backoff_factor: self.backoff_factor,
            recovery_factor: self.recovery_factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize_without_a_config_file() {
        let config = PlatformConfig::default();
        assert_eq!(config.workflow.parallel_execution_limit, 5);
        assert_eq!(config.default_service.requests_per_minute, 60);
    }
}
