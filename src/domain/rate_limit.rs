use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    Global,
    PerService,
    PerUser,
    PerIp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithmKind {
    SlidingWindow,
    TokenBucket,
    FixedWindow,
    Adaptive,
}

/// Persisted bucket state (§3 "RateLimitBucket (B)"). The cache-backed
/// representation differs per algorithm (sorted set vs. two floats vs.
/// counter); this struct is the normalized view returned to callers/tests,
/// not the literal wire encoding in `cache`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub service: String,
    pub scope: RateLimitScope,
    pub identifier: Option<String>,
    pub algorithm: RateLimitAlgorithmKind,
    pub current_limit: f64,
    pub last_adjustment: Option<DateTime<Utc>>,
    pub adjustment_count: u32,
}
