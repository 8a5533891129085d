use std::sync::Arc;

use sqlx::PgPool;

use insight_core::{Result, ResultEnvelope, TaskStatus};
use insight_storage::{create_pool_with_config, Dispatch, PostgresConfig, TaskRepository};

use crate::orchestrator::TaskOrchestrator;
use crate::registry::DatasetLoader;

/// What the bridge did with a claimed dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// All units attempted; envelope persisted with Completed status.
    Completed,
    /// The envelope carries a Failed status, or an orchestration fault was
    /// recovered into a Failed task row.
    Failed,
    /// The task was no longer Pending when the dispatch arrived (cancelled
    /// or already handled); nothing was executed.
    Skipped,
}

/// Connects a claimed dispatch to one full orchestrator run.
///
/// Each invocation opens its own connection pool and closes it on every
/// exit path: the hosting worker process handles exactly one task and then
/// exits, so connections must never outlive the invocation.
pub struct ExecutionBridge {
    db: PostgresConfig,
    orchestrator: Arc<TaskOrchestrator>,
    loader: Arc<dyn DatasetLoader>,
}

impl ExecutionBridge {
    pub fn new(
        db: PostgresConfig,
        orchestrator: Arc<TaskOrchestrator>,
        loader: Arc<dyn DatasetLoader>,
    ) -> Self {
        Self {
            db,
            orchestrator,
            loader,
        }
    }

    /// Execute a claimed dispatch end to end. Errors from the run are
    /// recovered into a Failed task row on a fresh pool before propagating;
    /// domain-level failures (failed units, Failed envelope) are not errors
    /// and come back as `BridgeOutcome::Failed`.
    pub async fn handle(&self, dispatch: &Dispatch) -> Result<BridgeOutcome> {
        let pool = create_pool_with_config(&self.db).await?;
        let outcome = self.run(&pool, dispatch).await;
        pool.close().await;

        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::error!(task_id = %dispatch.task_id, %err, "task execution faulted");
                self.recover_mark_failed(dispatch, &err).await;
                Err(err)
            }
        }
    }

    async fn run(&self, pool: &PgPool, dispatch: &Dispatch) -> Result<BridgeOutcome> {
        let tasks = TaskRepository::new(pool.clone());

        // Commit the Processing transition before any heavy work. A guard
        // miss means the task was cancelled (or otherwise moved on) between
        // enqueue and claim.
        if !tasks.mark_processing(&dispatch.task_id).await? {
            let current = tasks.require(&dispatch.task_id).await?;
            tracing::warn!(
                task_id = %dispatch.task_id,
                status = current.status.as_str(),
                "dispatch arrived for a non-pending task, skipping"
            );
            return Ok(BridgeOutcome::Skipped);
        }

        let data = self
            .loader
            .load_cleaned_dataset(&dispatch.task_id, &dispatch.dataset_id, pool)
            .await?;
        tracing::info!(
            task_id = %dispatch.task_id,
            rows = data.rows.len(),
            columns = data.columns.len(),
            "cleaned dataset loaded"
        );

        let envelope = self
            .orchestrator
            .execute_task(&dispatch.task_id, &data)
            .await?;

        let summary = summarize_envelope(&envelope);
        if envelope.is_completed() {
            if !tasks.complete(&dispatch.task_id, &summary).await? {
                // Cancelled mid-run; the envelope stays on disk but the row
                // keeps its cancelled status.
                tracing::warn!(task_id = %dispatch.task_id, "completion lost to a status race");
            }
            Ok(BridgeOutcome::Completed)
        } else {
            tasks.fail(&dispatch.task_id, &summary).await?;
            Ok(BridgeOutcome::Failed)
        }
    }

    /// Last-resort status recovery after a fault. Uses a fresh pool because
    /// the original one may be the thing that broke, and swallows its own
    /// errors: the requeue sweep will eventually retire the row if even this
    /// write cannot land.
    async fn recover_mark_failed(&self, dispatch: &Dispatch, cause: &insight_core::CoreError) {
        let summary = format!("task execution faulted: {cause}");
        match create_pool_with_config(&self.db).await {
            Ok(pool) => {
                let tasks = TaskRepository::new(pool.clone());
                if let Err(err) = tasks.fail(&dispatch.task_id, &summary).await {
                    tracing::error!(task_id = %dispatch.task_id, %err, "failure recovery write lost");
                }
                pool.close().await;
            }
            Err(err) => {
                tracing::error!(task_id = %dispatch.task_id, %err, "failure recovery pool unavailable");
            }
        }
    }

}

/// Human-readable one-liner stored in the task row's summary column.
pub fn summarize_envelope(envelope: &ResultEnvelope) -> String {
    let info = &envelope.task_info;
    let failed_models: Vec<&str> = envelope
        .model_results
        .iter()
        .filter(|(_, r)| !r.is_success())
        .map(|(name, _)| name.as_str())
        .collect();
    let failed_analyses: Vec<&str> = envelope
        .analysis_results
        .iter()
        .filter(|(_, r)| !r.is_success())
        .map(|(name, _)| name.as_str())
        .collect();

    let mut summary = format!(
        "trained {} models, completed {} analyses",
        info.models_trained.len(),
        info.analyses_completed.len()
    );
    if !failed_models.is_empty() {
        summary.push_str(&format!("; failed models: {}", failed_models.join(", ")));
    }
    if !failed_analyses.is_empty() {
        summary.push_str(&format!("; failed analyses: {}", failed_analyses.join(", ")));
    }
    if info.status == TaskStatus::Failed {
        if let Some(error) = &info.error {
            summary = format!("aborted: {error} ({summary})");
        }
    }
    summary
}
