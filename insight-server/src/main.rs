use anyhow::Result;

use insight_storage::TaskRepository;
use insight_workflow::{PgTaskQueue, WorkerConfig, WorkerManager};

use insight_server::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    insight_server::init_tracing(&config);

    tracing::info!("Starting survey insight supervisor");

    let pool = insight_storage::create_pool(&config.database_url).await?;
    insight_storage::postgres::migrate(&pool).await?;
    tracing::info!("Database pool initialized");

    let mut worker_config = WorkerConfig::new(&config.worker_binary);
    worker_config.shutdown_grace = config.worker_shutdown_grace();
    worker_config.respawn_backoff = config.worker_respawn_backoff();
    let manager = WorkerManager::new(worker_config);
    manager.start().await?;

    let queue = PgTaskQueue::new(pool.clone());
    let tasks = TaskRepository::new(pool.clone());

    // Periodic sweep: pending tasks whose dispatch was lost get re-enqueued.
    let mut sweep = tokio::time::interval(config.sweep_interval());
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = sweep.tick() => {
                if let Err(err) = queue.requeue_stale_pending(&tasks, config.pending_grace()).await {
                    tracing::error!(%err, "requeue sweep failed");
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    tracing::error!(%err, "failed to listen for shutdown signal");
                }
                break;
            }
        }
    }

    tracing::info!("Shutting down");
    manager.stop().await?;
    pool.close().await;
    Ok(())
}
