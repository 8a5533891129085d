//! Built-in analysis units for survey datasets: the what-if decision
//! simulator model and the statistical chart analyzers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use insight_core::{CoreError, DataTable, Result};
use insight_workflow::{Analyzer, TrainContext, Trainer};

pub const WHAT_IF_SIMULATOR: &str = "what_if_decision_simulator";
pub const GROUP_COMPARISON_RADAR: &str = "group_comparison_radar_chart";
pub const DESCRIPTIVE_SUMMARY: &str = "descriptive_summary";

const DEFAULT_GROUP_COLUMN: &str = "grade";

// ===== Shared numeric helpers =====

/// Row-aligned numeric pairs from two columns; rows where either cell is
/// non-numeric are dropped.
fn paired_numeric(data: &DataTable, a: usize, b: usize) -> (Vec<f64>, Vec<f64>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for row in &data.rows {
        if let (Some(x), Some(y)) = (row[a].as_f64(), row[b].as_f64()) {
            xs.push(x);
            ys.push(y);
        }
    }
    (xs, ys)
}

/// Pearson correlation; 0.0 for degenerate inputs (fewer than two pairs or
/// zero variance) so such features simply never pass a selection threshold.
fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len();
    if n < 2 {
        return 0.0;
    }
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Columns with at least one numeric cell, in table order.
fn numeric_columns(data: &DataTable) -> Vec<usize> {
    (0..data.columns.len())
        .filter(|&idx| data.rows.iter().any(|row| row[idx].as_f64().is_some()))
        .collect()
}

/// Stable string label for a grouping cell. Strings keep their raw text;
/// everything else uses its JSON rendering.
fn value_label(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

// ===== What-if decision simulator =====

#[derive(Debug, Serialize, Deserialize)]
struct WhatIfModel {
    target_column: String,
    /// Selected feature names with their absolute-correlation scores, in
    /// table order.
    features: Vec<(String, f64)>,
    /// Per-class mean of each selected feature, keyed by target label.
    class_profiles: BTreeMap<String, Vec<f64>>,
    majority_class: String,
}

/// Supervised simulator: selects the features whose correlation with the
/// target clears the configured threshold, profiles each target class by
/// its feature means, and predicts a scenario's class by nearest profile.
///
/// Batch inference is opted out: simulations only make sense against
/// caller-supplied hypothetical scenarios, never against the full training
/// dataset, so the composite report skips this model.
pub struct WhatIfSimulatorTrainer;

#[async_trait]
impl Trainer for WhatIfSimulatorTrainer {
    fn requires_target(&self) -> bool {
        true
    }

    fn supports_batch_inference(&self) -> bool {
        false
    }

    async fn train(&self, data: &DataTable, ctx: TrainContext<'_>) -> Result<Value> {
        let target = ctx
            .target_column
            .ok_or_else(|| CoreError::Validation("simulator requires a target column".into()))?;
        let target_idx = data
            .column_index(target)
            .ok_or_else(|| CoreError::NotFound(format!("column not found: {target}")))?;
        if data.is_empty() {
            return Err(CoreError::Validation("cannot train on an empty dataset".into()));
        }

        let mut features = Vec::new();
        for idx in numeric_columns(data) {
            if idx == target_idx {
                continue;
            }
            let (xs, ys) = paired_numeric(data, idx, target_idx);
            let score = pearson(&xs, &ys).abs();
            if score >= ctx.feature_score_threshold {
                features.push((data.columns[idx].clone(), score));
            }
        }
        if features.is_empty() {
            return Err(CoreError::Validation(format!(
                "no feature cleared the score threshold {}",
                ctx.feature_score_threshold
            )));
        }

        let feature_indices: Vec<usize> = features
            .iter()
            .map(|(name, _)| data.column_index(name).unwrap_or_default())
            .collect();

        let mut class_rows: BTreeMap<String, Vec<&Vec<Value>>> = BTreeMap::new();
        for row in &data.rows {
            class_rows
                .entry(value_label(&row[target_idx]))
                .or_default()
                .push(row);
        }

        let mut class_profiles = BTreeMap::new();
        for (label, rows) in &class_rows {
            let profile: Vec<f64> = feature_indices
                .iter()
                .map(|&idx| {
                    let values: Vec<f64> =
                        rows.iter().filter_map(|row| row[idx].as_f64()).collect();
                    if values.is_empty() {
                        0.0
                    } else {
                        mean(&values)
                    }
                })
                .collect();
            class_profiles.insert(label.clone(), profile);
        }

        let majority_class = class_rows
            .iter()
            .max_by_key(|(_, rows)| rows.len())
            .map(|(label, _)| label.clone())
            .unwrap_or_default();

        let model = WhatIfModel {
            target_column: target.to_string(),
            features,
            class_profiles,
            majority_class,
        };

        let bytes = serde_json::to_vec(&model)?;
        let (version, _) = ctx.store.save(WHAT_IF_SIMULATOR, Some(ctx.task_id), &bytes).await?;

        Ok(json!({
            "target_column": model.target_column,
            "selected_features": model.features,
            "classes": model.class_profiles.keys().collect::<Vec<_>>(),
            "majority_class": model.majority_class,
            "training_rows": data.num_rows(),
            "artifact_version": version,
        }))
    }

    /// Classify each scenario row by the nearest class profile. Rows with no
    /// usable feature values fall back to the majority class.
    async fn predict(&self, artifact: &[u8], input: Option<&DataTable>) -> Result<Value> {
        let model: WhatIfModel = serde_json::from_slice(artifact)?;
        let scenarios = input.ok_or_else(|| {
            CoreError::Validation("simulator requires explicit scenario input".into())
        })?;

        let feature_indices: Vec<Option<usize>> = model
            .features
            .iter()
            .map(|(name, _)| scenarios.column_index(name))
            .collect();

        let mut predictions = Vec::with_capacity(scenarios.num_rows());
        for row in &scenarios.rows {
            let vector: Vec<Option<f64>> = feature_indices
                .iter()
                .map(|idx| idx.and_then(|i| row[i].as_f64()))
                .collect();

            if vector.iter().all(Option::is_none) {
                predictions.push(json!({
                    "predicted": model.majority_class,
                    "basis": "majority_class",
                }));
                continue;
            }

            let mut best: Option<(&String, f64)> = None;
            for (label, profile) in &model.class_profiles {
                let distance: f64 = vector
                    .iter()
                    .zip(profile)
                    .filter_map(|(v, p)| v.map(|v| (v - p).powi(2)))
                    .sum::<f64>()
                    .sqrt();
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((label, distance));
                }
            }
            let (predicted, distance) = match best {
                Some((label, distance)) => (label.clone(), distance),
                None => (model.majority_class.clone(), 0.0),
            };
            predictions.push(json!({
                "predicted": predicted,
                "distance": distance,
                "basis": "nearest_profile",
            }));
        }

        Ok(json!({
            "target_column": model.target_column,
            "features": model.features.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            "predictions": predictions,
        }))
    }
}

// ===== Group comparison radar chart =====

/// Mean of every numeric dimension per group, shaped for a radar chart.
pub struct GroupComparisonRadarAnalyzer {
    group_column: String,
}

impl GroupComparisonRadarAnalyzer {
    pub fn new(group_column: impl Into<String>) -> Self {
        Self {
            group_column: group_column.into(),
        }
    }
}

impl Default for GroupComparisonRadarAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_GROUP_COLUMN)
    }
}

impl Analyzer for GroupComparisonRadarAnalyzer {
    fn analyze(&self, data: &DataTable) -> Result<Value> {
        let group_idx = data.column_index(&self.group_column).ok_or_else(|| {
            CoreError::Validation(format!("group column not found: {}", self.group_column))
        })?;

        let dimension_indices: Vec<usize> = numeric_columns(data)
            .into_iter()
            .filter(|&idx| idx != group_idx)
            .collect();
        let dimensions: Vec<&String> =
            dimension_indices.iter().map(|&idx| &data.columns[idx]).collect();

        let mut grouped: BTreeMap<String, Vec<&Vec<Value>>> = BTreeMap::new();
        for row in &data.rows {
            grouped
                .entry(value_label(&row[group_idx]))
                .or_default()
                .push(row);
        }

        let groups: Vec<Value> = grouped
            .iter()
            .map(|(name, rows)| {
                let values: Vec<f64> = dimension_indices
                    .iter()
                    .map(|&idx| {
                        let column: Vec<f64> =
                            rows.iter().filter_map(|row| row[idx].as_f64()).collect();
                        if column.is_empty() {
                            0.0
                        } else {
                            mean(&column)
                        }
                    })
                    .collect();
                json!({ "name": name, "values": values })
            })
            .collect();

        Ok(json!({
            "group_column": self.group_column,
            "dimensions": dimensions,
            "groups": groups,
        }))
    }
}

// ===== Descriptive summary =====

/// Count, mean, sample standard deviation, min and max for every numeric
/// column.
pub struct DescriptiveSummaryAnalyzer;

impl Analyzer for DescriptiveSummaryAnalyzer {
    fn analyze(&self, data: &DataTable) -> Result<Value> {
        let mut summary = BTreeMap::new();
        for idx in numeric_columns(data) {
            let values: Vec<f64> =
                data.rows.iter().filter_map(|row| row[idx].as_f64()).collect();
            let m = mean(&values);
            let std = if values.len() > 1 {
                (values.iter().map(|v| (v - m).powi(2)).sum::<f64>()
                    / (values.len() - 1) as f64)
                    .sqrt()
            } else {
                0.0
            };
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            summary.insert(
                data.columns[idx].clone(),
                json!({
                    "count": values.len(),
                    "mean": m,
                    "std": std,
                    "min": min,
                    "max": max,
                }),
            );
        }
        Ok(json!(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insight_core::TaskId;
    use insight_storage::ArtifactStore;
    use pretty_assertions::assert_eq;

    fn table() -> DataTable {
        let mut data = DataTable::new(vec![
            "grade".to_string(),
            "study_hours".to_string(),
            "noise".to_string(),
            "overall_satisfaction".to_string(),
        ]);
        // study_hours tracks satisfaction perfectly; noise is constant.
        for (hours, satisfaction) in [(1.0, 1), (2.0, 2), (3.0, 3), (4.0, 4), (5.0, 4)] {
            data.push_row(vec![
                json!(if satisfaction < 3 { 1 } else { 2 }),
                json!(hours),
                json!(7),
                json!(satisfaction),
            ])
            .unwrap();
        }
        data
    }

    #[test]
    fn test_pearson_perfect_and_degenerate() {
        assert!((pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]) - 1.0).abs() < 1e-9);
        assert!((pearson(&[1.0, 2.0, 3.0], &[6.0, 4.0, 2.0]) + 1.0).abs() < 1e-9);
        assert_eq!(pearson(&[1.0, 2.0], &[5.0, 5.0]), 0.0);
        assert_eq!(pearson(&[1.0], &[1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_simulator_selects_features_above_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let task_id = TaskId::new();
        let ctx = TrainContext {
            task_id: &task_id,
            target_column: Some("overall_satisfaction"),
            feature_score_threshold: 0.16,
            store: &store,
        };

        let result = WhatIfSimulatorTrainer.train(&table(), ctx).await.unwrap();
        let selected: Vec<String> = result["selected_features"]
            .as_array()
            .unwrap()
            .iter()
            .map(|pair| pair[0].as_str().unwrap().to_string())
            .collect();

        // Constant "noise" scores 0.0 and is dropped; the correlated
        // columns survive.
        assert!(selected.contains(&"study_hours".to_string()));
        assert!(!selected.contains(&"noise".to_string()));
        assert_eq!(result["artifact_version"], 1);
    }

    #[tokio::test]
    async fn test_simulator_predicts_nearest_class() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let task_id = TaskId::new();
        let ctx = TrainContext {
            task_id: &task_id,
            target_column: Some("overall_satisfaction"),
            feature_score_threshold: 0.16,
            store: &store,
        };
        WhatIfSimulatorTrainer.train(&table(), ctx).await.unwrap();
        let artifact = store
            .load(WHAT_IF_SIMULATOR, None, Some(&task_id))
            .await
            .unwrap();

        let mut scenarios = DataTable::new(vec!["study_hours".to_string()]);
        scenarios.push_row(vec![json!(1.0)]).unwrap();
        scenarios.push_row(vec![json!(4.5)]).unwrap();

        let result = WhatIfSimulatorTrainer
            .predict(&artifact, Some(&scenarios))
            .await
            .unwrap();
        let predictions = result["predictions"].as_array().unwrap();
        assert_eq!(predictions[0]["predicted"], "1");
        assert_eq!(predictions[1]["predicted"], "4");
    }

    #[tokio::test]
    async fn test_simulator_predict_requires_input() {
        let model = WhatIfModel {
            target_column: "t".into(),
            features: vec![("a".into(), 0.5)],
            class_profiles: BTreeMap::new(),
            majority_class: "1".into(),
        };
        let bytes = serde_json::to_vec(&model).unwrap();
        let err = WhatIfSimulatorTrainer.predict(&bytes, None).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_radar_groups_by_label_with_sorted_groups() {
        let result = GroupComparisonRadarAnalyzer::default().analyze(&table()).unwrap();
        assert_eq!(result["group_column"], "grade");

        let dimensions: Vec<&str> = result["dimensions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d.as_str().unwrap())
            .collect();
        assert_eq!(dimensions, vec!["study_hours", "noise", "overall_satisfaction"]);

        let groups = result["groups"].as_array().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0]["name"], "1");
        // Group 1 holds the two low-satisfaction rows: hours 1 and 2.
        assert_eq!(groups[0]["values"][0], 1.5);
    }

    #[test]
    fn test_radar_missing_group_column_is_validation_error() {
        let data = DataTable::new(vec!["score".to_string()]);
        let err = GroupComparisonRadarAnalyzer::default().analyze(&data).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_descriptive_summary_stats() {
        let result = DescriptiveSummaryAnalyzer.analyze(&table()).unwrap();
        let hours = &result["study_hours"];
        assert_eq!(hours["count"], 5);
        assert_eq!(hours["mean"], 3.0);
        assert_eq!(hours["min"], 1.0);
        assert_eq!(hours["max"], 5.0);
        assert_eq!(result["noise"]["std"], 0.0);
    }
}
