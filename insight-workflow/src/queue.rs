use async_trait::async_trait;
use chrono::Duration;
use sqlx::PgPool;

use insight_core::{DatasetId, Result, TaskId};
use insight_storage::{Dispatch, DispatchRepository, TaskRepository};

/// Durable dispatch channel between the API side (enqueue) and the worker
/// side (claim). Dispatches survive process restarts.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task_id: &TaskId, dataset_id: &DatasetId) -> Result<()>;

    /// Claim the oldest unclaimed dispatch, or None when the queue is empty.
    /// A claim is exclusive even across concurrently polling workers.
    async fn claim_next(&self) -> Result<Option<Dispatch>>;
}

/// Postgres-backed queue. Reuses the task database so that enqueue and task
/// creation share one transactional store.
pub struct PgTaskQueue {
    dispatches: DispatchRepository,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            dispatches: DispatchRepository::new(pool),
        }
    }

    /// Re-enqueue Pending tasks older than `min_age` whose dispatch was lost
    /// (worker crash between claim and status update, or an enqueue that
    /// never landed). Tasks with a live unclaimed dispatch are left alone.
    /// Returns the number of dispatches re-created.
    pub async fn requeue_stale_pending(
        &self,
        tasks: &TaskRepository,
        min_age: Duration,
    ) -> Result<usize> {
        let stale = tasks.find_pending_older_than(min_age).await?;
        let mut requeued = 0usize;

        for task in stale {
            if self.dispatches.has_unclaimed(&task.id).await? {
                continue;
            }
            tracing::warn!(
                task_id = %task.id,
                created_at = %task.created_at,
                "pending task has no live dispatch, re-enqueueing"
            );
            self.dispatches.enqueue(&task.id, &task.dataset_id).await?;
            requeued += 1;
        }

        if requeued > 0 {
            tracing::info!(count = requeued, "requeued stale pending tasks");
        }
        Ok(requeued)
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, task_id: &TaskId, dataset_id: &DatasetId) -> Result<()> {
        self.dispatches.enqueue(task_id, dataset_id).await
    }

    async fn claim_next(&self) -> Result<Option<Dispatch>> {
        self.dispatches.claim_next().await
    }
}
