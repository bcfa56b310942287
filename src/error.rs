//! Core error taxonomy shared by every orchestration component.
//!
//! Call sites match on `CoreError` variants rather than inspecting opaque
//! strings so retry/fallback decisions can be made mechanically (see
//! `resilience::coordinator`).

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    #[error("circuit breaker open for service {service}")]
    CircuitBreakerOpen { service: String },

    #[error("retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        last_error: Box<CoreError>,
    },

    #[error("fallback chain exhausted for key {fallback_key}")]
    FallbackFailed { fallback_key: String },

    #[error("operation timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("operation cancelled")]
    Cancelled,

    #[error("not connected to {target}")]
    NotConnected { target: String },

    #[error("validation failed: {message}")]
    ValidationError { message: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("upstream error: {message}")]
    Upstream { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Whether the coordinator's retry engine should attempt this call again.
    ///
    /// Mirrors §7's table: transient/rate-limited errors are retried, CB-open
    /// short-circuits straight to the fallback chain, and validation/conflict
    /// errors are surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Upstream { .. } | CoreError::Timeout { .. } | CoreError::RateLimitExceeded { .. }
        )
    }

    pub fn validation<M: Into<String>>(message: M) -> Self {
        CoreError::ValidationError {
            message: message.into(),
        }
    }

    pub fn not_found<W: Into<String>>(what: W) -> Self {
        CoreError::NotFound { what: what.into() }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_and_timeout_are_retryable() {
        assert!(CoreError::Upstream {
            message: "502".into()
        }
        .is_retryable());
        assert!(CoreError::Timeout {
            elapsed: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(CoreError::RateLimitExceeded {
            retry_after: Duration::from_secs(1)
        }
        .is_retryable());
    }

    #[test]
    fn validation_and_circuit_open_are_not_retryable() {
        assert!(!CoreError::validation("bad input").is_retryable());
        assert!(!CoreError::CircuitBreakerOpen {
            service: "aws_pricing".into()
        }
        .is_retryable());
    }
}
