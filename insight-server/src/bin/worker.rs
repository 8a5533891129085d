//! Single-task worker: claims one dispatch, runs it under the configured
//! time limits, and exits so the supervisor can spawn a fresh process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use insight_core::{CoreError, TaskId};
use insight_storage::{Dispatch, TaskRepository};
use insight_workflow::{
    BridgeOutcome, ControlCommand, ExecutionBridge, PgTaskQueue, TaskQueue,
};

use insight_server::config::Config;
use insight_server::dataset::PgDatasetLoader;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    insight_server::init_tracing(&config);

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_control_channel(shutdown.clone()));

    // Claiming uses its own pool, closed before execution starts; the
    // bridge opens a fresh one for the run itself.
    let claim_pool = insight_storage::create_pool(&config.database_url).await?;
    let queue = PgTaskQueue::new(claim_pool.clone());

    let dispatch = loop {
        if shutdown.is_cancelled() {
            tracing::info!("shutdown requested while idle, exiting");
            claim_pool.close().await;
            return Ok(());
        }
        match queue.claim_next().await? {
            Some(dispatch) => break dispatch,
            None => {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(config.worker_poll_interval()) => {}
                }
            }
        }
    };
    claim_pool.close().await;

    tracing::info!(task_id = %dispatch.task_id, "claimed dispatch");

    let bridge = ExecutionBridge::new(
        insight_server::postgres_config(&config),
        insight_server::build_orchestrator(&config),
        Arc::new(PgDatasetLoader),
    );

    let outcome = run_with_limits(
        dispatch.task_id,
        bridge.handle(&dispatch),
        config.soft_time_limit(),
        config.hard_time_limit(),
    )
    .await;

    match outcome {
        Ok(outcome) => {
            tracing::info!(task_id = %dispatch.task_id, ?outcome, "dispatch handled");
            Ok(())
        }
        Err(RunFailure::HardTimeout(limit)) => {
            let cause = CoreError::Internal(format!(
                "hard time limit of {}s exceeded",
                limit.as_secs()
            ));
            mark_failed_best_effort(&config, &dispatch, &cause).await;
            Err(cause.into())
        }
        Err(RunFailure::Fault(err)) => Err(err.into()),
    }
}

/// Why a limited run did not produce an outcome: the hard limit expired, or
/// the bridge itself faulted. Timeouts need their own recovery write, so
/// they are kept distinct from bridge faults (which recover themselves).
#[derive(Debug)]
enum RunFailure {
    HardTimeout(Duration),
    Fault(CoreError),
}

/// Run the bridge under the two time limits: past the soft limit the task
/// gets a loud warning, past the hard limit it is abandoned and the worker
/// exits abnormally.
async fn run_with_limits<F>(
    task_id: TaskId,
    run: F,
    soft: Duration,
    hard: Duration,
) -> std::result::Result<BridgeOutcome, RunFailure>
where
    F: Future<Output = insight_core::Result<BridgeOutcome>>,
{
    let soft_warn = tokio::spawn(async move {
        tokio::time::sleep(soft).await;
        tracing::warn!(
            task_id = %task_id,
            soft_limit_secs = soft.as_secs(),
            "soft time limit exceeded, task still running"
        );
    });

    let result = tokio::time::timeout(hard, run).await;
    soft_warn.abort();

    match result {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(err)) => Err(RunFailure::Fault(err)),
        Err(_) => Err(RunFailure::HardTimeout(hard)),
    }
}

/// A timed-out task never reached the bridge's own recovery path, so the
/// row would stay Processing forever without this.
async fn mark_failed_best_effort(config: &Config, dispatch: &Dispatch, cause: &CoreError) {
    match insight_storage::create_pool(&config.database_url).await {
        Ok(pool) => {
            let tasks = TaskRepository::new(pool.clone());
            if let Err(err) = tasks.fail(&dispatch.task_id, &cause.to_string()).await {
                tracing::error!(task_id = %dispatch.task_id, %err, "failed to record timeout");
            }
            pool.close().await;
        }
        Err(err) => {
            tracing::error!(task_id = %dispatch.task_id, %err, "recovery pool unavailable");
        }
    }
}

/// Reads control commands from stdin, one JSON line each. A shutdown
/// command or a closed stdin (supervisor gone) cancels the token; the
/// in-flight task, if any, still runs to completion.
async fn watch_control_channel(shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<ControlCommand>(line) {
                    Ok(ControlCommand::Shutdown) => {
                        tracing::info!("shutdown command received");
                        shutdown.cancel();
                        return;
                    }
                    Err(err) => {
                        tracing::warn!(%err, line, "unrecognized control line");
                    }
                }
            }
            Ok(None) | Err(_) => {
                tracing::info!("control channel closed, shutting down after current task");
                shutdown.cancel();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_with_limits_passes_outcome_through() {
        let result = run_with_limits(
            TaskId::new(),
            async { Ok(BridgeOutcome::Completed) },
            Duration::from_millis(50),
            Duration::from_millis(100),
        )
        .await;

        assert!(matches!(result, Ok(BridgeOutcome::Completed)));
    }

    #[tokio::test]
    async fn test_run_with_limits_reports_bridge_faults() {
        let result = run_with_limits(
            TaskId::new(),
            async { Err(CoreError::Internal("boom".into())) },
            Duration::from_millis(50),
            Duration::from_millis(100),
        )
        .await;

        match result {
            Err(RunFailure::Fault(CoreError::Internal(msg))) => assert_eq!(msg, "boom"),
            other => panic!("expected bridge fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_with_limits_hard_timeout_abandons_run() {
        let hard = Duration::from_millis(50);
        let result = run_with_limits(
            TaskId::new(),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(BridgeOutcome::Completed)
            },
            Duration::from_millis(20),
            hard,
        )
        .await;

        match result {
            Err(RunFailure::HardTimeout(limit)) => assert_eq!(limit, hard),
            other => panic!("expected hard timeout, got {other:?}"),
        }
    }
}
