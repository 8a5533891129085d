use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DatasetId, TaskId};
use crate::error::{CoreError, Result};

// ===== Task Status =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Completed and Cancelled are final; Failed is final unless
    /// explicitly retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, TaskStatus::Processing)
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    /// Allowed lifecycle edges. Transitions are monotonic except the
    /// explicit retry (Failed -> Pending) and cancel
    /// (Pending|Processing -> Cancelled) edges.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
                | (Failed, Pending)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(CoreError::Validation(format!(
                "unknown task status: {other}"
            ))),
        }
    }
}

// ===== Analysis Task =====

/// Durable record of one analysis task. The summary column carries a
/// rendered outcome summary once the task reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisTask {
    pub id: TaskId,
    pub dataset_id: DatasetId,
    pub status: TaskStatus,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

impl AnalysisTask {
    pub fn new(dataset_id: DatasetId) -> Self {
        Self {
            id: TaskId::new(),
            dataset_id,
            status: TaskStatus::Pending,
            summary: String::new(),
            created_at: Utc::now(),
        }
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidState(format!(
                "task {} cannot transition from {} to {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn start_processing(&mut self) -> Result<()> {
        self.transition(TaskStatus::Processing)
    }

    pub fn complete(&mut self, summary: String) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.summary = summary;
        Ok(())
    }

    pub fn fail(&mut self, summary: String) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.summary = summary;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(TaskStatus::Cancelled)
    }

    /// Retry clears the prior failure summary and re-queues the task.
    pub fn retry(&mut self) -> Result<()> {
        self.transition(TaskStatus::Pending)?;
        self.summary.clear();
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
