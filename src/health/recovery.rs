use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

const MAX_RECOVERY_HISTORY: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub component: String,
    pub strategy: String,
    pub succeeded: bool,
    pub at: DateTime<Utc>,
}

/// Queryable recovery attempt log, supplementing the health checker with
/// first-class state an operator can inspect (`original_source` only logs
/// these to stdout).
pub struct RecoveryHistory {
    entries: Mutex<VecDeque<RecoveryOutcome>>,
}

impl RecoveryHistory {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, component: &str, strategy: &str, succeeded: bool) {
        let mut entries = self.entries.lock();
        entries.push_back(RecoveryOutcome {
            component: component.to_string(),
            strategy: strategy.to_string(),
            succeeded,
            at: Utc::now(),
        });
        if entries.len() > MAX_RECOVERY_HISTORY {
            entries.pop_front();
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<RecoveryOutcome> {
        let entries = self.entries.lock();
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn success_rate(&self, component: &str) -> Option<f64> {
        let entries = self.entries.lock();
        let relevant: Vec<&RecoveryOutcome> = entries.iter().filter(|e| e.component == component).collect();
        if relevant.is_empty() {
            return None;
        }
        let succeeded = relevant.iter().filter(|e| e.succeeded).count() as f64;
        Some(succeeded / relevant.len() as f64)
    }
}

impl Default for RecoveryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_history_and_computes_success_rate() {
        let history = RecoveryHistory::new();
        history.record("redis", "reconnect", false);
        history.record("redis", "reconnect", true);
        assert_eq!(history.success_rate("redis"), Some(0.5));
        assert_eq!(history.recent(10).len(), 2);
        assert!(history.success_rate("postgres").is_none());
    }
}
