use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;

use insight_core::{DataTable, DatasetId, Result, TaskId};
use insight_storage::ArtifactStore;

// ===== Trainer units =====

/// Everything a trainer gets besides the dataset itself.
pub struct TrainContext<'a> {
    pub task_id: &'a TaskId,
    /// Validated target column; `None` for trainers that do not require one.
    pub target_column: Option<&'a str>,
    pub feature_score_threshold: f64,
    /// Where the trainer persists its versioned artifact.
    pub store: &'a ArtifactStore,
}

/// A registered model trainer unit. Training persists a versioned artifact
/// through the context's store and returns an opaque JSON summary.
#[async_trait]
pub trait Trainer: Send + Sync {
    /// Whether the unit needs a target column present in the dataset.
    fn requires_target(&self) -> bool {
        false
    }

    /// Units that only predict on explicit caller input (served through a
    /// separate synchronous endpoint) opt out of batch report inference.
    fn supports_batch_inference(&self) -> bool {
        true
    }

    async fn train(&self, data: &DataTable, ctx: TrainContext<'_>) -> Result<Value>;

    /// Run inference with a previously trained artifact. `input` is the
    /// optional fresh dataset supplied at report time.
    async fn predict(&self, artifact: &[u8], input: Option<&DataTable>) -> Result<Value>;
}

// ===== Analyzer units =====

/// A registered statistical analyzer: a pure `DataTable -> JSON` function.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, data: &DataTable) -> Result<Value>;
}

// ===== Registry =====

/// Explicit, constructed mapping from unit name to unit. Passed into the
/// orchestrator so the unit set is test-substitutable and carries no hidden
/// global state.
#[derive(Default)]
pub struct UnitRegistry {
    trainers: HashMap<String, Arc<dyn Trainer>>,
    analyzers: HashMap<String, Arc<dyn Analyzer>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trainer(mut self, name: impl Into<String>, trainer: Arc<dyn Trainer>) -> Self {
        self.trainers.insert(name.into(), trainer);
        self
    }

    pub fn with_analyzer(mut self, name: impl Into<String>, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzers.insert(name.into(), analyzer);
        self
    }

    pub fn trainer(&self, name: &str) -> Option<&Arc<dyn Trainer>> {
        self.trainers.get(name)
    }

    pub fn analyzer(&self, name: &str) -> Option<&Arc<dyn Analyzer>> {
        self.analyzers.get(name)
    }

    pub fn trainer_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.trainers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn analyzer_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.analyzers.keys().cloned().collect();
        names.sort();
        names
    }
}

// ===== Summarizer collaborator =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    Model,
    Analysis,
}

impl SummaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryKind::Model => "model",
            SummaryKind::Analysis => "analysis",
        }
    }
}

/// External commentary generator. Implementations must not fail: report
/// generation never aborts because commentary did, so a broken backend
/// returns a degraded placeholder string instead.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, kind: SummaryKind, name: &str, result: &Value) -> String;
}

/// Degraded default used when no commentary service is wired in.
pub struct FallbackSummarizer;

#[async_trait]
impl Summarizer for FallbackSummarizer {
    async fn summarize(&self, kind: SummaryKind, name: &str, _result: &Value) -> String {
        format!("Commentary unavailable for {} '{}'.", kind.as_str(), name)
    }
}

// ===== Dataset collaborator =====

/// Loads the cleaned tabular dataset for a task. Opaque to the orchestrator;
/// failures propagate as task-level errors from the bridge.
#[async_trait]
pub trait DatasetLoader: Send + Sync {
    async fn load_cleaned_dataset(
        &self,
        task_id: &TaskId,
        dataset_id: &DatasetId,
        pool: &PgPool,
    ) -> Result<DataTable>;
}
