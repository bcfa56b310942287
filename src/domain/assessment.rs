use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Lifecycle status of an assessment (§3 "Assessment (A)").
///
/// `completion_percentage` on `Assessment` must never decrease once an
/// assessment enters `Completed` or `Failed`; see `Assessment::apply_progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    Draft,
    InProgress,
    AgentAnalysis,
    GeneratingReport,
    Completed,
    Failed,
}

impl AssessmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssessmentStatus::Completed | AssessmentStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub current_step: String,
    pub completed_steps: u32,
    pub total_steps: u32,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn new(total_steps: u32) -> Self {
        Self {
            current_step: String::new(),
            completed_steps: 0,
            total_steps,
            message: String::new(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Assessment {
    pub id: Uuid,
    pub principal_id: String,
    pub business_requirements: HashMap<String, String>,
    pub technical_requirements: HashMap<String, String>,
    pub status: AssessmentStatus,
    completion_percentage: f64,
    pub progress: ProgressRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl Assessment {
    pub fn new(principal_id: impl Into<String>, total_steps: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            principal_id: principal_id.into(),
            business_requirements: HashMap::new(),
            technical_requirements: HashMap::new(),
            status: AssessmentStatus::Draft,
            completion_percentage: 0.0,
            progress: ProgressRecord::new(total_steps),
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    pub fn completion_percentage(&self) -> f64 {
        self.completion_percentage
    }

    /// Advances `completion_percentage` to `max(observed, previous)` (§4.5
    /// "Progress" / §8 property 1). No-op once the assessment is terminal.
    pub fn apply_progress(&mut self, observed_percentage: f64, status: AssessmentStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.completion_percentage = self.completion_percentage.max(observed_percentage.clamp(0.0, 100.0));
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = AssessmentStatus::Failed;
        self.progress.message = message.into();
        self.progress.updated_at = Utc::now();
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_percentage_never_decreases() {
        let mut a = Assessment::new("user-1", 4);
        a.apply_progress(25.0, AssessmentStatus::InProgress);
        a.apply_progress(10.0, AssessmentStatus::InProgress);
        assert_eq!(a.completion_percentage(), 25.0);
        a.apply_progress(90.0, AssessmentStatus::AgentAnalysis);
        assert_eq!(a.completion_percentage(), 90.0);
    }

    #[test]
    fn terminal_status_is_sticky() {
        let mut a = Assessment::new("user-1", 4);
        a.apply_progress(100.0, AssessmentStatus::Completed);
        a.apply_progress(50.0, AssessmentStatus::InProgress);
        assert_eq!(a.completion_percentage(), 100.0);
        assert_eq!(a.status, AssessmentStatus::Completed);
    }
}
