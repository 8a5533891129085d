use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use insight_core::{CoreError, Result};

/// Control message written to the worker's stdin as one JSON line. The
/// worker finishes its in-flight task (if any) and exits cleanly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlCommand {
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Path to the single-task worker binary.
    pub worker_binary: PathBuf,
    /// Extra arguments passed to every spawn.
    pub args: Vec<String>,
    /// How long a worker gets to finish up after a shutdown command before
    /// it is killed.
    pub shutdown_grace: Duration,
    /// Pause between a worker exit and the next spawn. Keeps a crashing
    /// binary from respawning in a hot loop.
    pub respawn_backoff: Duration,
}

impl WorkerConfig {
    pub fn new(worker_binary: impl Into<PathBuf>) -> Self {
        Self {
            worker_binary: worker_binary.into(),
            args: Vec::new(),
            shutdown_grace: Duration::from_secs(10),
            respawn_backoff: Duration::from_secs(1),
        }
    }
}

struct Supervisor {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
}

/// Keeps exactly one worker process alive.
///
/// Each worker handles at most one task and then exits, so memory held by
/// an analysis run never outlives the process; the manager's job is to
/// respawn the next one. Stop is graceful: a shutdown line on stdin, a
/// bounded wait, then a kill.
pub struct WorkerManager {
    config: WorkerConfig,
    supervisor: Mutex<Option<Supervisor>>,
}

impl WorkerManager {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            supervisor: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.supervisor.lock().await.is_some()
    }

    /// Start the supervision loop. Idempotent: a second start while running
    /// logs a warning and leaves the existing worker alone.
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.supervisor.lock().await;
        if guard.is_some() {
            tracing::warn!("worker manager already running, ignoring start");
            return Ok(());
        }

        let shutdown = CancellationToken::new();
        let join = tokio::spawn(supervise(self.config.clone(), shutdown.clone()));
        *guard = Some(Supervisor { shutdown, join });

        tracing::info!(binary = %self.config.worker_binary.display(), "worker manager started");
        Ok(())
    }

    /// Stop the current worker and the supervision loop. Idempotent: a stop
    /// while not running logs a warning and succeeds.
    pub async fn stop(&self) -> Result<()> {
        let supervisor = match self.supervisor.lock().await.take() {
            Some(supervisor) => supervisor,
            None => {
                tracing::warn!("worker manager not running, ignoring stop");
                return Ok(());
            }
        };

        supervisor.shutdown.cancel();
        supervisor
            .join
            .await
            .map_err(|err| CoreError::Internal(format!("supervisor task panicked: {err}")))?;

        tracing::info!("worker manager stopped");
        Ok(())
    }

    /// Stop then start, picking up a new binary or arguments.
    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }
}

async fn supervise(config: WorkerConfig, shutdown: CancellationToken) {
    let mut generation: u64 = 0;
    loop {
        generation += 1;
        let mut child = match spawn_worker(&config) {
            Ok(child) => child,
            Err(err) => {
                tracing::error!(%err, "failed to spawn worker process");
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(config.respawn_backoff) => continue,
                }
            }
        };
        tracing::info!(generation, pid = child.id(), "worker process spawned");

        tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) if status.success() => {
                        tracing::debug!(generation, "worker exited cleanly");
                    }
                    Ok(status) => {
                        tracing::warn!(generation, %status, "worker exited abnormally");
                    }
                    Err(err) => {
                        tracing::error!(generation, %err, "failed to reap worker");
                    }
                }
            }
            _ = shutdown.cancelled() => {
                stop_worker(&mut child, config.shutdown_grace).await;
                return;
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(config.respawn_backoff) => {}
        }
    }
}

fn spawn_worker(config: &WorkerConfig) -> Result<Child> {
    let child = Command::new(&config.worker_binary)
        .args(&config.args)
        .stdin(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;
    Ok(child)
}

/// Graceful stop sequence: shutdown line on stdin, bounded wait, kill.
async fn stop_worker(child: &mut Child, grace: Duration) {
    let requested = match child.stdin.take() {
        Some(mut stdin) => {
            let frame = match serde_json::to_vec(&ControlCommand::Shutdown) {
                Ok(mut bytes) => {
                    bytes.push(b'\n');
                    bytes
                }
                Err(err) => {
                    tracing::error!(%err, "failed to encode shutdown command");
                    Vec::new()
                }
            };
            if frame.is_empty() {
                false
            } else {
                match stdin.write_all(&frame).await {
                    Ok(()) => stdin.flush().await.is_ok(),
                    Err(err) => {
                        tracing::warn!(%err, "worker stdin closed before shutdown command");
                        false
                    }
                }
            }
        }
        None => false,
    };

    if requested {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(%status, "worker shut down gracefully");
                return;
            }
            Ok(Err(err)) => {
                tracing::error!(%err, "failed to reap worker during shutdown");
                return;
            }
            Err(_) => {
                tracing::warn!(grace_secs = grace.as_secs(), "worker ignored shutdown, killing");
            }
        }
    }

    if let Err(err) = child.kill().await {
        tracing::error!(%err, "failed to kill worker process");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_command_wire_shape() {
        let line = serde_json::to_string(&ControlCommand::Shutdown).unwrap();
        assert_eq!(line, r#"{"op":"shutdown"}"#);
        let parsed: ControlCommand = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, ControlCommand::Shutdown);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_idempotent() {
        let manager = WorkerManager::new(WorkerConfig::new("/nonexistent/worker"));
        assert!(!manager.is_running().await);
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_kills_child_that_ignores_shutdown() {
        // /bin/sleep never reads stdin, so the shutdown line is ignored and
        // the grace timeout must elapse before the kill.
        let mut config = WorkerConfig::new("/bin/sleep");
        config.args = vec!["60".to_string()];
        config.shutdown_grace = Duration::from_millis(200);
        let manager = WorkerManager::new(config);

        manager.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        manager.stop().await.unwrap();
        let elapsed = started.elapsed();

        assert!(!manager.is_running().await);
        // Bounded: waited out the grace period, then killed, well before
        // the child's own 60s lifetime.
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_start_stop_cycle_with_short_lived_child() {
        let mut config = WorkerConfig::new("/bin/true");
        config.respawn_backoff = Duration::from_millis(50);
        let manager = WorkerManager::new(config);

        manager.start().await.unwrap();
        assert!(manager.is_running().await);
        // Double start is a no-op.
        manager.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        manager.stop().await.unwrap();
        assert!(!manager.is_running().await);
    }
}
