use serde::{Deserialize, Serialize};

/// Per-task execution configuration.
///
/// Written once to `{root}/{task_id}/config.json` when the task is created
/// and never mutated afterwards; execution reads it back from disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    /// Model trainer unit names to run, in order.
    pub models_to_train: Vec<String>,
    /// Statistical analyzer unit names to run, in order.
    pub analyses_to_run: Vec<String>,
    /// Target column for supervised trainers; ignored by the rest.
    pub target_column: String,
    /// Feature-selection score threshold for trainers that use one.
    pub feature_score_threshold: f64,
    #[serde(default)]
    pub description: String,
}

impl TaskConfig {
    pub const DEFAULT_TARGET_COLUMN: &'static str = "overall_satisfaction";
    pub const DEFAULT_FEATURE_THRESHOLD: f64 = 0.16;

    pub fn new(models_to_train: Vec<String>, analyses_to_run: Vec<String>) -> Self {
        Self {
            models_to_train,
            analyses_to_run,
            target_column: Self::DEFAULT_TARGET_COLUMN.to_string(),
            feature_score_threshold: Self::DEFAULT_FEATURE_THRESHOLD,
            description: String::new(),
        }
    }

    pub fn with_target_column(mut self, target_column: impl Into<String>) -> Self {
        self.target_column = target_column.into();
        self
    }

    pub fn with_feature_score_threshold(mut self, threshold: f64) -> Self {
        self.feature_score_threshold = threshold;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = TaskConfig::new(
            vec!["what_if_decision_simulator".to_string()],
            vec!["group_comparison_radar_chart".to_string()],
        )
        .with_target_column("overall_satisfaction")
        .with_feature_score_threshold(0.16);

        assert_eq!(config.models_to_train.len(), 1);
        assert_eq!(config.target_column, "overall_satisfaction");
        assert!((config.feature_score_threshold - 0.16).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_description_defaults_empty() {
        let json = r#"{
            "models_to_train": [],
            "analyses_to_run": ["descriptive_summary"],
            "target_column": "score",
            "feature_score_threshold": 0.1
        }"#;
        let config: TaskConfig = serde_json::from_str(json).unwrap();
        assert!(config.description.is_empty());
    }
}
