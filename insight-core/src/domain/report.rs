use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::ids::TaskId;

/// Derived aggregate joining fresh model predictions with stored (or re-run)
/// statistical analyses, each paired with an external commentary string.
/// Non-durable in principle; cached to the task directory as a convenience.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComprehensiveReport {
    pub task_id: TaskId,
    pub generated_at: DateTime<Utc>,
    pub model_predictions: BTreeMap<String, Value>,
    pub statistical_analyses: BTreeMap<String, Value>,
    pub comments: BTreeMap<String, String>,
}

impl ComprehensiveReport {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            generated_at: Utc::now(),
            model_predictions: BTreeMap::new(),
            statistical_analyses: BTreeMap::new(),
            comments: BTreeMap::new(),
        }
    }

    pub fn add_prediction(&mut self, name: &str, result: Value, comment: String) {
        self.model_predictions.insert(name.to_string(), result);
        self.comments.insert(name.to_string(), comment);
    }

    pub fn add_analysis(&mut self, name: &str, result: Value, comment: String) {
        self.statistical_analyses.insert(name.to_string(), result);
        self.comments.insert(name.to_string(), comment);
    }

    /// A per-unit failure during report generation is folded in as an inline
    /// error payload for that unit only.
    pub fn add_prediction_error(&mut self, name: &str, error: impl Into<String>) {
        self.model_predictions
            .insert(name.to_string(), serde_json::json!({ "error": error.into() }));
    }

    pub fn add_analysis_error(&mut self, name: &str, error: impl Into<String>) {
        self.statistical_analyses
            .insert(name.to_string(), serde_json::json!({ "error": error.into() }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_collects_entries_and_comments() {
        let mut report = ComprehensiveReport::new(TaskId::new());
        report.add_analysis("radar", json!([1, 2]), "looks balanced".to_string());
        report.add_prediction_error("portrait", "artifact missing");

        assert_eq!(report.statistical_analyses["radar"], json!([1, 2]));
        assert_eq!(report.comments["radar"], "looks balanced");
        assert_eq!(
            report.model_predictions["portrait"]["error"],
            "artifact missing"
        );
    }
}
