use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::Recommendation;

/// Synthesis-node output (§4.5 "Synthesis node"): aggregates every
/// dependency agent's recommendations, the mean confidence across them, and
/// a grouping by category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub overall_confidence: f64,
    pub recommendation_count: usize,
    pub by_category: HashMap<String, Vec<String>>,
}

pub fn synthesize(recommendations: &[Recommendation]) -> SynthesisResult {
    let mut by_category: HashMap<String, Vec<String>> = HashMap::new();
    for rec in recommendations {
        by_category.entry(rec.category.clone()).or_default().push(rec.id.to_string());
    }

    let overall_confidence = if recommendations.is_empty() {
        0.0
    } else {
        recommendations.iter().map(|r| r.confidence_score()).sum::<f64>() / recommendations.len() as f64
    };

    SynthesisResult {
        overall_confidence,
        recommendation_count: recommendations.len(),
        by_category,
    }
}

/// Validation-node output (§4.5 "Validation node"): advisory unless the
/// caller's configuration says otherwise — the engine never fails a
/// workflow on a low quality score by itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub quality_score: f64,
    pub meets_standard: bool,
    pub improvement_notes: Vec<String>,
}

const DEFAULT_QUALITY_STANDARD: f64 = 0.6;

/// Aggregates a quality score across declared upstream node outputs. Each
/// upstream result may carry an optional `quality_score` field (professional
/// service nodes) or fall back to `overall_confidence` (synthesis).
pub fn validate_quality(upstream_results: &[serde_json::Value], standard: Option<f64>) -> ValidationResult {
    let standard = standard.unwrap_or(DEFAULT_QUALITY_STANDARD);
    let scores: Vec<f64> = upstream_results
        .iter()
        .filter_map(|v| {
            v.get("quality_score")
                .or_else(|| v.get("overall_confidence"))
                .and_then(|s| s.as_f64())
        })
        .collect();

    let quality_score = if scores.is_empty() {
        standard
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };

    let meets_standard = quality_score >= standard;
    let improvement_notes = if meets_standard {
        Vec::new()
    } else {
        vec![format!(
            "aggregate quality score {quality_score:.2} is below the configured standard {standard:.2}"
        )]
    };

    ValidationResult {
        quality_score,
        meets_standard,
        improvement_notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn synthesis_averages_confidence_and_groups_by_category() {
        let assessment_id = Uuid::new_v4();
        let mut a = Recommendation::new(assessment_id, "strategic_agent", "Use reserved instances", 0.9);
        a.category = "cost".to_string();
        let mut b = Recommendation::new(assessment_id, "technical_agent", "Adopt autoscaling", 0.7);
        b.category = "reliability".to_string();

        let result = synthesize(&[a, b]);
        assert!((result.overall_confidence - 0.8).abs() < 1e-9);
        assert_eq!(result.recommendation_count, 2);
        assert_eq!(result.by_category.len(), 2);
    }

    #[test]
    fn validation_flags_scores_below_standard() {
        let result = validate_quality(&[serde_json::json!({"quality_score": 0.4})], Some(0.6));
        assert!(!result.meets_standard);
        assert_eq!(result.improvement_notes.len(), 1);
    }

    #[test]
    fn validation_passes_scores_above_standard() {
        let result = validate_quality(&[serde_json::json!({"overall_confidence": 0.75})], None);
        assert!(result.meets_standard);
        assert!(result.improvement_notes.is_empty());
    }
}
