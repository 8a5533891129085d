use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use insight_core::{DatasetId, Result, TaskId};

/// One queued execution request. Enqueue is fire-and-forget; a dispatch
/// survives process restarts and is claimed exactly once.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub id: Uuid,
    pub task_id: TaskId,
    pub dataset_id: DatasetId,
    pub enqueued_at: DateTime<Utc>,
}

pub struct DispatchRepository {
    pool: PgPool,
}

impl DispatchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(&self, task_id: &TaskId, dataset_id: &DatasetId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_dispatches (id, task_id, dataset_id, enqueued_at)
            VALUES ($1, $2, $3, now())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(task_id.0)
        .bind(dataset_id.0)
        .execute(&self.pool)
        .await?;

        tracing::info!(task_id = %task_id, "enqueued task dispatch");
        Ok(())
    }

    /// Claim the oldest unclaimed dispatch, if any. `FOR UPDATE SKIP LOCKED`
    /// keeps a restarting worker from double-claiming against a dying one.
    pub async fn claim_next(&self) -> Result<Option<Dispatch>> {
        let row = sqlx::query(
            r#"
            UPDATE task_dispatches
            SET claimed_at = now()
            WHERE id = (
                SELECT id FROM task_dispatches
                WHERE claimed_at IS NULL
                ORDER BY enqueued_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, task_id, dataset_id, enqueued_at
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_dispatch))
    }

    /// Whether an unclaimed dispatch already exists for the task. The
    /// requeue sweep uses this to avoid duplicate enqueues.
    pub async fn has_unclaimed(&self, task_id: &TaskId) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 AS one FROM task_dispatches WHERE task_id = $1 AND claimed_at IS NULL LIMIT 1",
        )
        .bind(task_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}

fn row_to_dispatch(row: PgRow) -> Dispatch {
    Dispatch {
        id: row.get("id"),
        task_id: TaskId::from_uuid(row.get::<Uuid, _>("task_id")),
        dataset_id: DatasetId::from_uuid(row.get::<Uuid, _>("dataset_id")),
        enqueued_at: row.get("enqueued_at"),
    }
}
