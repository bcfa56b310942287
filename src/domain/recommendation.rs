use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

const MAX_SUMMARY_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    /// §3: "confidence level is derived from confidence score via fixed
    /// thresholds (≥0.8 HIGH, ≥0.6 MEDIUM, else LOW)".
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            ConfidenceLevel::High
        } else if score >= 0.6 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceProvider {
    Aws,
    Azure,
    Gcp,
    Alibaba,
    Ibm,
    Multi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub monthly: f64,
    pub setup: f64,
    pub annual: f64,
    pub breakdown: HashMap<String, f64>,
    pub roi_months: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecommendation {
    pub provider: ServiceProvider,
    pub service_name: String,
    pub monthly_cost_estimate: f64,
    pub setup_complexity: String,
    pub configuration: HashMap<String, String>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementationStep {
    pub order: u32,
    pub description: String,
    pub estimated_effort_hours: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    pub description: String,
    pub impact: ImpactLevel,
    pub mitigation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Recommendation {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub agent_name: String,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    summary: String,
    confidence_score: f64,
    pub category: String,
    pub priority: Priority,
    pub cost_estimate: CostEstimate,
    pub services: Vec<ServiceRecommendation>,
    pub implementation_steps: Vec<ImplementationStep>,
    pub risks: Vec<Risk>,
    pub tags: Vec<String>,
}

impl Recommendation {
    pub fn new(
        assessment_id: Uuid,
        agent_name: impl Into<String>,
        title: impl Into<String>,
        confidence_score: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            assessment_id,
            agent_name: agent_name.into(),
            title: title.into(),
            summary: String::new(),
            confidence_score: confidence_score.clamp(0.0, 1.0),
            category: String::new(),
            priority: Priority::Medium,
            cost_estimate: CostEstimate {
                monthly: 0.0,
                setup: 0.0,
                annual: 0.0,
                breakdown: HashMap::new(),
                roi_months: None,
            },
            services: Vec::new(),
            implementation_steps: Vec::new(),
            risks: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    pub fn confidence_level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_score(self.confidence_score)
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Enforces the §3 500-char summary cap at the write site rather than
    /// trusting callers; longer input is truncated, matching
    /// `utils::truncate_string`'s existing convention elsewhere in this crate.
    pub fn set_summary(&mut self, summary: impl Into<String>) {
        let summary = summary.into();
        self.summary = if summary.len() > MAX_SUMMARY_LEN {
            format!("{}...", &summary[..MAX_SUMMARY_LEN.saturating_sub(3)])
        } else {
            summary
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_level_thresholds() {
        assert_eq!(ConfidenceLevel::from_score(0.8), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.79), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.6), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.59), ConfidenceLevel::Low);
    }

    #[test]
    fn summary_is_capped_at_500_chars() {
        let mut r = Recommendation::new(Uuid::new_v4(), "cost_agent", "Use reserved instances", 0.9);
        r.set_summary("x".repeat(600));
        assert_eq!(r.summary().len(), 500);
    }
}
