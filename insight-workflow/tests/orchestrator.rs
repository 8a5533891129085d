//! End-to-end orchestrator runs against a temporary output directory, with
//! stub trainer and analyzer units standing in for the real analytics.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

use insight_core::{DataTable, Result, TaskConfig, TaskId, TaskStatus};
use insight_storage::{ArtifactLoadCache, MemoryCache, RecordRepository};
use insight_workflow::{
    Analyzer, FallbackSummarizer, TaskOrchestrator, TrainContext, Trainer, UnitRegistry,
};

struct EchoTrainer {
    requires_target: bool,
}

impl EchoTrainer {
    fn new(requires_target: bool) -> Self {
        Self { requires_target }
    }
}

#[async_trait]
impl Trainer for EchoTrainer {
    fn requires_target(&self) -> bool {
        self.requires_target
    }

    async fn train(&self, data: &DataTable, ctx: TrainContext<'_>) -> Result<Value> {
        ctx.store
            .save("what_if_decision_simulator", Some(ctx.task_id), b"model-bytes")
            .await?;
        Ok(json!({
            "rows_seen": data.num_rows(),
            "target": ctx.target_column,
            "threshold": ctx.feature_score_threshold,
        }))
    }

    async fn predict(&self, artifact: &[u8], _input: Option<&DataTable>) -> Result<Value> {
        Ok(json!({ "artifact_len": artifact.len() }))
    }
}

struct RowCountAnalyzer;

impl Analyzer for RowCountAnalyzer {
    fn analyze(&self, data: &DataTable) -> Result<Value> {
        Ok(json!({ "row_count": data.num_rows() }))
    }
}

fn survey_table(with_target: bool) -> DataTable {
    let mut columns = vec!["grade".to_string(), "study_hours".to_string()];
    if with_target {
        columns.push("overall_satisfaction".to_string());
    }
    let mut table = DataTable::new(columns);
    for i in 0..4 {
        let mut row = vec![json!(i % 2 + 1), json!(2.5 * i as f64)];
        if with_target {
            row.push(json!(4));
        }
        table.push_row(row).unwrap();
    }
    table
}

fn test_registry() -> Arc<UnitRegistry> {
    Arc::new(
        UnitRegistry::new()
            .with_trainer("what_if_decision_simulator", Arc::new(EchoTrainer::new(true)))
            .with_analyzer("group_comparison_radar_chart", Arc::new(RowCountAnalyzer)),
    )
}

fn orchestrator(root: impl Into<std::path::PathBuf>, registry: Arc<UnitRegistry>) -> TaskOrchestrator {
    TaskOrchestrator::new(
        root,
        registry,
        Arc::new(FallbackSummarizer),
        ArtifactLoadCache::with_default_ttl(Arc::new(MemoryCache::new())),
    )
}

async fn write_config(root: &Path, task_id: &TaskId, config: &TaskConfig) {
    let dir = root.join(task_id.to_string());
    tokio::fs::create_dir_all(&dir).await.unwrap();
    tokio::fs::write(
        dir.join("config.json"),
        serde_json::to_vec_pretty(config).unwrap(),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_execute_runs_configured_units() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), test_registry());
    let task_id = TaskId::new();

    let config = TaskConfig::new(
        vec!["what_if_decision_simulator".to_string()],
        vec!["group_comparison_radar_chart".to_string()],
    )
    .with_target_column("overall_satisfaction")
    .with_feature_score_threshold(0.16);
    write_config(dir.path(), &task_id, &config).await;

    let envelope = orchestrator
        .execute_task(&task_id, &survey_table(true))
        .await
        .unwrap();

    assert_eq!(envelope.task_info.status, TaskStatus::Completed);
    assert_eq!(
        envelope.task_info.models_trained,
        vec!["what_if_decision_simulator"]
    );
    assert_eq!(
        envelope.task_info.analyses_completed,
        vec!["group_comparison_radar_chart"]
    );

    let trained = envelope.model_results["what_if_decision_simulator"]
        .result()
        .unwrap();
    assert_eq!(trained["target"], "overall_satisfaction");
    assert_eq!(trained["threshold"], 0.16);
    assert_eq!(trained["rows_seen"], 4);

    // Training wrote a task-scoped artifact at version 1.
    let versions = orchestrator
        .store()
        .registry()
        .list_versions("what_if_decision_simulator", Some(&task_id))
        .unwrap();
    assert_eq!(versions, vec![1]);
}

#[tokio::test]
async fn test_unknown_units_are_skipped_not_failed() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), test_registry());
    let task_id = TaskId::new();

    let config = TaskConfig::new(
        vec![
            "nonexistent_model".to_string(),
            "what_if_decision_simulator".to_string(),
        ],
        vec!["group_comparison_radar_chart".to_string()],
    );
    write_config(dir.path(), &task_id, &config).await;

    let envelope = orchestrator
        .execute_task(&task_id, &survey_table(true))
        .await
        .unwrap();

    // No entry at all for the unknown unit: skipped, not recorded as failed.
    assert!(!envelope.model_results.contains_key("nonexistent_model"));
    assert!(envelope
        .model_results
        .contains_key("what_if_decision_simulator"));
    assert_eq!(envelope.task_info.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_missing_target_fails_unit_but_not_task() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), test_registry());
    let task_id = TaskId::new();

    let config = TaskConfig::new(
        vec!["what_if_decision_simulator".to_string()],
        vec!["group_comparison_radar_chart".to_string()],
    )
    .with_target_column("overall_satisfaction");
    write_config(dir.path(), &task_id, &config).await;

    let envelope = orchestrator
        .execute_task(&task_id, &survey_table(false))
        .await
        .unwrap();

    let failure = &envelope.model_results["what_if_decision_simulator"];
    assert!(!failure.is_success());
    assert!(failure.message().unwrap().contains("overall_satisfaction"));

    // The analyzer still ran and the task as a whole completed.
    assert_eq!(
        envelope.task_info.analyses_completed,
        vec!["group_comparison_radar_chart"]
    );
    assert_eq!(envelope.task_info.status, TaskStatus::Completed);
    assert!(envelope.task_info.models_trained.is_empty());
}

#[tokio::test]
async fn test_empty_unit_lists_leave_envelope_empty() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), test_registry());
    let task_id = TaskId::new();

    write_config(dir.path(), &task_id, &TaskConfig::new(vec![], vec![])).await;

    let envelope = orchestrator
        .execute_task(&task_id, &survey_table(true))
        .await
        .unwrap();
    assert!(envelope.model_results.is_empty());
    assert!(envelope.analysis_results.is_empty());
    assert_eq!(envelope.task_info.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_execute_without_config_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), test_registry());

    let err = orchestrator
        .execute_task(&TaskId::new(), &survey_table(true))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_generate_report_predicts_and_folds_storage_failures_inline() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), test_registry());
    let task_id = TaskId::new();

    let config = TaskConfig::new(
        vec!["what_if_decision_simulator".to_string()],
        vec!["group_comparison_radar_chart".to_string()],
    )
    .with_target_column("overall_satisfaction");
    write_config(dir.path(), &task_id, &config).await;
    orchestrator
        .execute_task(&task_id, &survey_table(true))
        .await
        .unwrap();

    // A lazy pool that can never connect: record writes for mapped kinds
    // fail, which must fold into the report instead of aborting it.
    let options = "postgres://nobody@127.0.0.1:9/none".parse().unwrap();
    let pool = sqlx::postgres::PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_millis(200))
        .connect_lazy_with(options);
    let records = RecordRepository::new(pool);

    let report = orchestrator
        .generate_report(&task_id, &records, None, None)
        .await
        .unwrap();

    // The model prediction ran against the task-scoped artifact; its kind
    // has no record table, so nothing was written and nothing failed.
    let prediction = &report.model_predictions["what_if_decision_simulator"];
    assert_eq!(prediction["artifact_len"], "model-bytes".len());
    assert!(report.comments.contains_key("what_if_decision_simulator"));

    // The analysis kind maps to a table; the unreachable pool becomes an
    // inline error payload for that unit only.
    let analysis = &report.statistical_analyses["group_comparison_radar_chart"];
    assert!(analysis["error"].as_str().unwrap().contains("persisting"));

    // The report was still cached to the task directory.
    let cached = orchestrator.comprehensive_report(&task_id).await.unwrap();
    assert_eq!(cached.model_predictions, report.model_predictions);
}

#[tokio::test]
async fn test_result_envelope_reads_are_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), test_registry());
    let task_id = TaskId::new();

    let config = TaskConfig::new(
        vec!["what_if_decision_simulator".to_string()],
        vec!["group_comparison_radar_chart".to_string()],
    );
    write_config(dir.path(), &task_id, &config).await;
    let executed = orchestrator
        .execute_task(&task_id, &survey_table(true))
        .await
        .unwrap();

    let first = orchestrator.result_envelope(&task_id).await.unwrap();
    let second = orchestrator.result_envelope(&task_id).await.unwrap();
    assert_eq!(first, executed);
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
}

#[tokio::test]
async fn test_result_envelope_missing_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), test_registry());
    let err = orchestrator
        .result_envelope(&TaskId::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_list_tasks_newest_first_and_skips_incomplete_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), test_registry());

    let older = TaskId::new();
    let newer = TaskId::new();
    let config = TaskConfig::new(vec![], vec!["group_comparison_radar_chart".to_string()]);
    write_config(dir.path(), &older, &config).await;
    orchestrator
        .execute_task(&older, &survey_table(true))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    write_config(dir.path(), &newer, &config).await;
    orchestrator
        .execute_task(&newer, &survey_table(true))
        .await
        .unwrap();

    // A task directory with only a config (never executed) is not listed.
    write_config(dir.path(), &TaskId::new(), &config).await;

    let listings = orchestrator.list_tasks().await.unwrap();
    assert_eq!(listings.len(), 2);
    assert_eq!(listings[0].task_id, newer);
    assert_eq!(listings[1].task_id, older);
}

#[tokio::test]
async fn test_list_tasks_empty_root() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(
        dir.path().join("never-created"),
        test_registry(),
    );
    assert!(orchestrator.list_tasks().await.unwrap().is_empty());
}
