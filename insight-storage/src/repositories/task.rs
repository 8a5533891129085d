use chrono::{Duration, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use insight_core::{AnalysisTask, CoreError, DatasetId, Result, TaskId, TaskStatus};

/// Repository for analysis task rows.
///
/// Status transitions are guarded in SQL (`WHERE status IN (...)`) so the
/// monotonic state machine holds even when an update races with a cancel:
/// a guard miss returns `false` instead of clobbering the row.
pub struct TaskRepository {
    pool: PgPool,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create(&self, task: &AnalysisTask) -> Result<AnalysisTask> {
        let row = sqlx::query(
            r#"
            INSERT INTO analysis_tasks (id, dataset_id, status, summary, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, dataset_id, status, summary, created_at
            "#,
        )
        .bind(task.id.0)
        .bind(task.dataset_id.0)
        .bind(task.status.as_str())
        .bind(&task.summary)
        .bind(task.created_at)
        .fetch_one(&self.pool)
        .await?;

        row_to_task(row)
    }

    pub async fn find_by_id(&self, id: &TaskId) -> Result<Option<AnalysisTask>> {
        let row = sqlx::query(
            r#"
            SELECT id, dataset_id, status, summary, created_at
            FROM analysis_tasks
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_task).transpose()
    }

    /// Like `find_by_id`, but absence is a NotFound error.
    pub async fn require(&self, id: &TaskId) -> Result<AnalysisTask> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task not found: {id}")))
    }

    /// All tasks, newest first.
    pub async fn list_all(&self) -> Result<Vec<AnalysisTask>> {
        let rows = sqlx::query(
            r#"
            SELECT id, dataset_id, status, summary, created_at
            FROM analysis_tasks
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_task).collect()
    }

    /// Pending -> Processing, committed before any heavy work so observers
    /// see progress. Returns false when the task is no longer pending
    /// (e.g. it was cancelled between enqueue and dispatch).
    pub async fn mark_processing(&self, id: &TaskId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE analysis_tasks SET status = 'processing' WHERE id = $1 AND status = 'pending'",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Processing -> Completed with the rendered outcome summary.
    pub async fn complete(&self, id: &TaskId, summary: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE analysis_tasks SET status = 'completed', summary = $2 WHERE id = $1 AND status = 'processing'",
        )
        .bind(id.0)
        .bind(summary)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Terminal failure. Also reachable from Pending: the recovery path may
    /// fire before the Processing transition was ever committed.
    pub async fn fail(&self, id: &TaskId, summary: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE analysis_tasks SET status = 'failed', summary = $2 WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(id.0)
        .bind(summary)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Explicit cancel; only Pending and Processing tasks can be cancelled.
    /// Cancellation is cooperative: an in-flight unit is not interrupted,
    /// but a new dispatch will refuse to proceed.
    pub async fn cancel(&self, id: &TaskId) -> Result<bool> {
        self.require(id).await?;
        let result = sqlx::query(
            "UPDATE analysis_tasks SET status = 'cancelled' WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Explicit retry of a failed task; clears the prior failure summary.
    pub async fn retry(&self, id: &TaskId) -> Result<AnalysisTask> {
        self.require(id).await?;
        let result = sqlx::query(
            "UPDATE analysis_tasks SET status = 'pending', summary = '' WHERE id = $1 AND status = 'failed'",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::InvalidState(format!(
                "task {id} is not in a retryable state"
            )));
        }
        self.require(id).await
    }

    /// Tasks still pending past the grace period; candidates for re-enqueue.
    pub async fn find_pending_older_than(&self, grace: Duration) -> Result<Vec<AnalysisTask>> {
        let cutoff = Utc::now() - grace;
        let rows = sqlx::query(
            r#"
            SELECT id, dataset_id, status, summary, created_at
            FROM analysis_tasks
            WHERE status = 'pending' AND created_at < $1
            ORDER BY created_at
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_task).collect()
    }
}

fn row_to_task(row: PgRow) -> Result<AnalysisTask> {
    let status: String = row.get("status");
    Ok(AnalysisTask {
        id: TaskId::from_uuid(row.get::<Uuid, _>("id")),
        dataset_id: DatasetId::from_uuid(row.get::<Uuid, _>("dataset_id")),
        status: status.parse::<TaskStatus>()?,
        summary: row.get("summary"),
        created_at: row.get("created_at"),
    })
}
