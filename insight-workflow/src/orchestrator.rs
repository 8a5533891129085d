use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use insight_core::{
    AnalysisTask, ComprehensiveReport, CoreError, DataTable, DatasetId, Result, ResultEnvelope,
    TaskConfig, TaskId, TaskStatus, UnitResult,
};
use insight_storage::{ArtifactLoadCache, ArtifactStore, RecordRepository, TaskRepository};

use crate::registry::{SummaryKind, Summarizer, TrainContext, UnitRegistry};

const CONFIG_FILE: &str = "config.json";
const RESULTS_FILE: &str = "results.json";
const REPORT_FILE: &str = "comprehensive_analysis.json";

/// Listing entry assembled from a task directory's result envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskListing {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub models_trained: Vec<String>,
    pub analyses_completed: Vec<String>,
}

/// Owns a task's on-disk configuration and result envelope, runs the
/// registered units against a dataset, and assembles the composite report.
///
/// Layout under `output_dir`:
/// `{task_id}/config.json`, `{task_id}/results.json`,
/// `{task_id}/comprehensive_analysis.json`, and versioned artifacts either
/// at the root or under the task's directory.
pub struct TaskOrchestrator {
    output_dir: PathBuf,
    store: ArtifactStore,
    cache: ArtifactLoadCache,
    registry: Arc<UnitRegistry>,
    summarizer: Arc<dyn Summarizer>,
}

impl TaskOrchestrator {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        registry: Arc<UnitRegistry>,
        summarizer: Arc<dyn Summarizer>,
        cache: ArtifactLoadCache,
    ) -> Self {
        let output_dir = output_dir.into();
        Self {
            store: ArtifactStore::new(&output_dir),
            output_dir,
            cache,
            registry,
            summarizer,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn task_dir(&self, task_id: &TaskId) -> PathBuf {
        self.output_dir.join(task_id.to_string())
    }

    // ===== Task creation =====

    /// Create the durable task record and write its immutable configuration.
    /// No execution happens here; API latency stays decoupled from analysis
    /// latency. Empty unit lists default to every registered unit.
    pub async fn create_task(
        &self,
        tasks: &TaskRepository,
        dataset_id: DatasetId,
        mut config: TaskConfig,
    ) -> Result<AnalysisTask> {
        if config.models_to_train.is_empty() {
            config.models_to_train = self.registry.trainer_names();
        }
        if config.analyses_to_run.is_empty() {
            config.analyses_to_run = self.registry.analyzer_names();
        }

        let task = tasks.create(&AnalysisTask::new(dataset_id)).await?;

        let task_dir = self.task_dir(&task.id);
        tokio::fs::create_dir_all(&task_dir).await?;
        let bytes = serde_json::to_vec_pretty(&config)?;
        tokio::fs::write(task_dir.join(CONFIG_FILE), bytes).await?;

        tracing::info!(task_id = %task.id, dataset_id = %dataset_id, "created analysis task");
        Ok(task)
    }

    async fn load_config(&self, task_id: &TaskId) -> Result<TaskConfig> {
        let path = self.task_dir(task_id).join(CONFIG_FILE);
        let bytes = read_or_not_found(&path, &format!("task configuration: {task_id}")).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    // ===== Execution =====

    /// Run every configured unit against `data` and persist the envelope.
    ///
    /// Individual unit failures are captured per unit and never abort the
    /// run; an orchestration-level fault marks the whole attempt Failed and
    /// is reported through the envelope's status field, not the error
    /// channel. Only a missing task namespace/configuration is an `Err`.
    pub async fn execute_task(
        &self,
        task_id: &TaskId,
        data: &DataTable,
    ) -> Result<ResultEnvelope> {
        let config = self.load_config(task_id).await?;
        let mut envelope = ResultEnvelope::started(*task_id, config.description.clone());

        tracing::info!(task_id = %task_id, "executing analysis task");

        self.run_trainers(task_id, &config, data, &mut envelope).await;
        self.run_analyzers(&config, data, &mut envelope);
        envelope.finish();

        if let Err(err) = self.write_envelope(task_id, &envelope).await {
            tracing::error!(task_id = %task_id, %err, "failed to persist result envelope");
            envelope.abort(format!("failed to persist result envelope: {err}"));
            // Best effort: the storage fault may have been transient.
            let _ = self.write_envelope(task_id, &envelope).await;
        }

        tracing::info!(
            task_id = %task_id,
            status = envelope.task_info.status.as_str(),
            "analysis task finished"
        );
        Ok(envelope)
    }

    async fn run_trainers(
        &self,
        task_id: &TaskId,
        config: &TaskConfig,
        data: &DataTable,
        envelope: &mut ResultEnvelope,
    ) {
        for name in &config.models_to_train {
            let Some(trainer) = self.registry.trainer(name) else {
                tracing::warn!(unit = %name, "unknown trainer unit, skipping");
                continue;
            };

            let mut target_column = None;
            if trainer.requires_target() {
                let target = config.target_column.as_str();
                if target.is_empty() {
                    envelope.record_model(
                        name,
                        UnitResult::failed(format!("trainer {name} requires a target column")),
                    );
                    continue;
                }
                if !data.has_column(target) {
                    envelope.record_model(
                        name,
                        UnitResult::failed(format!("target column not found in dataset: {target}")),
                    );
                    continue;
                }
                target_column = Some(target);
            }

            tracing::info!(unit = %name, "training model");
            let ctx = TrainContext {
                task_id,
                target_column,
                feature_score_threshold: config.feature_score_threshold,
                store: &self.store,
            };
            match trainer.train(data, ctx).await {
                Ok(result) => {
                    tracing::info!(unit = %name, "model trained");
                    envelope.record_model(name, UnitResult::success(result));
                }
                Err(err) => {
                    tracing::error!(unit = %name, %err, "model training failed");
                    envelope.record_model(
                        name,
                        UnitResult::failed(format!("training {name} failed: {err}")),
                    );
                }
            }
        }
    }

    fn run_analyzers(&self, config: &TaskConfig, data: &DataTable, envelope: &mut ResultEnvelope) {
        for name in &config.analyses_to_run {
            let Some(analyzer) = self.registry.analyzer(name) else {
                tracing::warn!(unit = %name, "unknown analyzer unit, skipping");
                continue;
            };

            tracing::info!(unit = %name, "running statistical analysis");
            match analyzer.analyze(data) {
                Ok(result) => {
                    envelope.record_analysis(name, UnitResult::success(result));
                }
                Err(err) => {
                    tracing::error!(unit = %name, %err, "statistical analysis failed");
                    envelope.record_analysis(
                        name,
                        UnitResult::failed(format!("analysis {name} failed: {err}")),
                    );
                }
            }
        }
    }

    async fn write_envelope(&self, task_id: &TaskId, envelope: &ResultEnvelope) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(envelope)?;
        tokio::fs::write(self.task_dir(task_id).join(RESULTS_FILE), bytes).await?;
        Ok(())
    }

    // ===== Report generation =====

    /// Assemble the comprehensive report for a previously executed task:
    /// fresh predictions for each batch-capable trained model, re-run (or
    /// reused) statistical analyses, a commentary string per entry, and a
    /// typed record per entry in the durable store. Per-unit failures fold
    /// in as inline error payloads; the report itself always materializes.
    pub async fn generate_report(
        &self,
        task_id: &TaskId,
        records: &RecordRepository,
        input_data: Option<&DataTable>,
        model_versions: Option<&HashMap<String, u32>>,
    ) -> Result<ComprehensiveReport> {
        let envelope = self.result_envelope(task_id).await?;
        let mut report = ComprehensiveReport::new(*task_id);

        tracing::info!(task_id = %task_id, "generating comprehensive report");

        for name in &envelope.task_info.models_trained {
            let Some(trainer) = self.registry.trainer(name) else {
                tracing::warn!(unit = %name, "trained model no longer registered");
                report.add_prediction_error(name, format!("unknown model unit: {name}"));
                continue;
            };
            if !trainer.supports_batch_inference() {
                // Served through the synchronous prediction endpoint only.
                tracing::debug!(unit = %name, "skipping explicit-input model");
                continue;
            }

            let version = model_versions.and_then(|m| m.get(name.as_str())).copied();
            match self
                .predict_one(task_id, name, trainer.as_ref(), version, input_data)
                .await
            {
                Ok(prediction) => {
                    let comment = self
                        .summarizer
                        .summarize(SummaryKind::Model, name, &prediction)
                        .await;
                    if let Err(err) = records.insert(name, task_id, &prediction, &comment).await {
                        tracing::error!(unit = %name, %err, "failed to persist model record");
                        report.add_prediction_error(name, format!("persisting {name} failed: {err}"));
                        continue;
                    }
                    report.add_prediction(name, prediction, comment);
                }
                Err(err) => {
                    tracing::error!(unit = %name, %err, "model prediction failed");
                    report.add_prediction_error(name, format!("prediction {name} failed: {err}"));
                }
            }
        }

        for name in &envelope.task_info.analyses_completed {
            let result = match input_data {
                // A fresh dataset was supplied: re-run the analyzer on it.
                Some(data) => match self.registry.analyzer(name) {
                    Some(analyzer) => analyzer.analyze(data),
                    None => Err(CoreError::NotFound(format!("unknown analyzer unit: {name}"))),
                },
                // Otherwise reuse the stored result from the envelope.
                None => envelope
                    .analysis_results
                    .get(name)
                    .and_then(|r| r.result().cloned())
                    .ok_or_else(|| {
                        CoreError::NotFound(format!("no stored result for analysis: {name}"))
                    }),
            };

            match result {
                Ok(result) => {
                    let comment = self
                        .summarizer
                        .summarize(SummaryKind::Analysis, name, &result)
                        .await;
                    if let Err(err) = records.insert(name, task_id, &result, &comment).await {
                        tracing::error!(unit = %name, %err, "failed to persist analysis record");
                        report.add_analysis_error(name, format!("persisting {name} failed: {err}"));
                        continue;
                    }
                    report.add_analysis(name, result, comment);
                }
                Err(err) => {
                    tracing::error!(unit = %name, %err, "analysis re-run failed");
                    report.add_analysis_error(name, format!("analysis {name} failed: {err}"));
                }
            }
        }

        // Cached convenience copy; the report was already assembled, so a
        // write failure is logged rather than losing the result.
        match serde_json::to_vec_pretty(&report) {
            Ok(bytes) => {
                let path = self.task_dir(task_id).join(REPORT_FILE);
                if let Err(err) = tokio::fs::write(&path, bytes).await {
                    tracing::warn!(task_id = %task_id, %err, "failed to cache report to disk");
                }
            }
            Err(err) => tracing::warn!(task_id = %task_id, %err, "failed to serialize report"),
        }

        tracing::info!(task_id = %task_id, "comprehensive report generated");
        Ok(report)
    }

    /// Resolve the model artifact (task scope first, then global), fetch it
    /// through the load cache, and run the trainer's inference.
    async fn predict_one(
        &self,
        task_id: &TaskId,
        name: &str,
        trainer: &dyn crate::registry::Trainer,
        version: Option<u32>,
        input_data: Option<&DataTable>,
    ) -> Result<serde_json::Value> {
        let registry = self.store.registry();
        let scope = if registry.list_versions(name, Some(task_id))?.is_empty() {
            None
        } else {
            Some(task_id)
        };

        let bytes = self
            .cache
            .get_or_load(registry, name, scope, version, |v| {
                self.store.load(name, Some(v), scope)
            })
            .await?;

        trainer.predict(&bytes, input_data).await
    }

    // ===== Read-only accessors =====

    /// The persisted envelope of the last execution attempt. Reads straight
    /// from storage, so repeated calls return identical bytes.
    pub async fn result_envelope(&self, task_id: &TaskId) -> Result<ResultEnvelope> {
        let path = self.task_dir(task_id).join(RESULTS_FILE);
        let bytes = read_or_not_found(&path, &format!("result envelope: {task_id}")).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn comprehensive_report(&self, task_id: &TaskId) -> Result<ComprehensiveReport> {
        let path = self.task_dir(task_id).join(REPORT_FILE);
        let bytes = read_or_not_found(&path, &format!("comprehensive report: {task_id}")).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// All tasks with a persisted envelope, newest first. Unreadable
    /// entries are logged and skipped.
    pub async fn list_tasks(&self) -> Result<Vec<TaskListing>> {
        let mut entries = match tokio::fs::read_dir(&self.output_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut listings = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let results_path = entry.path().join(RESULTS_FILE);
            let bytes = match tokio::fs::read(&results_path).await {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    tracing::warn!(path = %results_path.display(), %err, "unreadable task entry");
                    continue;
                }
            };
            match serde_json::from_slice::<ResultEnvelope>(&bytes) {
                Ok(envelope) => listings.push(TaskListing {
                    task_id: envelope.task_info.task_id,
                    status: envelope.task_info.status,
                    created_at: envelope.task_info.created_at,
                    completed_at: envelope.task_info.completed_at,
                    models_trained: envelope.task_info.models_trained,
                    analyses_completed: envelope.task_info.analyses_completed,
                }),
                Err(err) => {
                    tracing::warn!(path = %results_path.display(), %err, "corrupt task entry");
                }
            }
        }

        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listings)
    }
}

async fn read_or_not_found(path: &Path, what: &str) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(CoreError::NotFound(what.to_string()))
        }
        Err(err) => Err(err.into()),
    }
}
