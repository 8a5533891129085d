use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::ids::TaskId;
use super::task::TaskStatus;

// ===== Unit Result =====

/// Outcome of a single trainer or analyzer invocation. A unit either fully
/// succeeds with a payload or fully fails with a message; there is no
/// partial state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitResult {
    Success { result: Value },
    Failed { message: String },
}

impl UnitResult {
    pub fn success(result: Value) -> Self {
        UnitResult::Success { result }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        UnitResult::Failed {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UnitResult::Success { .. })
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            UnitResult::Success { result } => Some(result),
            UnitResult::Failed { .. } => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            UnitResult::Success { .. } => None,
            UnitResult::Failed { message } => Some(message),
        }
    }
}

// ===== Envelope =====

/// Task metadata snapshot embedded in the result envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvelopeInfo {
    pub task_id: TaskId,
    pub description: String,
    /// Authoritative outcome of the execution attempt; callers inspect this
    /// field, not the call's error channel.
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub models_trained: Vec<String>,
    pub analyses_completed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Durable record of one task execution attempt. Written exactly once per
/// attempt (a retry overwrites it). BTreeMaps keep serialization
/// deterministic so repeated reads are byte-identical.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultEnvelope {
    pub task_info: EnvelopeInfo,
    pub model_results: BTreeMap<String, UnitResult>,
    pub analysis_results: BTreeMap<String, UnitResult>,
}

impl ResultEnvelope {
    pub fn started(task_id: TaskId, description: String) -> Self {
        Self {
            task_info: EnvelopeInfo {
                task_id,
                description,
                status: TaskStatus::Processing,
                created_at: Utc::now(),
                completed_at: None,
                models_trained: Vec::new(),
                analyses_completed: Vec::new(),
                error: None,
            },
            model_results: BTreeMap::new(),
            analysis_results: BTreeMap::new(),
        }
    }

    pub fn record_model(&mut self, name: &str, outcome: UnitResult) {
        if outcome.is_success() {
            self.task_info.models_trained.push(name.to_string());
        }
        self.model_results.insert(name.to_string(), outcome);
    }

    pub fn record_analysis(&mut self, name: &str, outcome: UnitResult) {
        if outcome.is_success() {
            self.task_info.analyses_completed.push(name.to_string());
        }
        self.analysis_results.insert(name.to_string(), outcome);
    }

    /// All configured units were attempted; individual failures stay in the
    /// per-unit maps and do not affect the overall status.
    pub fn finish(&mut self) {
        self.task_info.status = TaskStatus::Completed;
        self.task_info.completed_at = Some(Utc::now());
    }

    /// An orchestration-level fault outside the unit loop aborted the attempt.
    pub fn abort(&mut self, error: impl Into<String>) {
        self.task_info.status = TaskStatus::Failed;
        self.task_info.completed_at = Some(Utc::now());
        self.task_info.error = Some(error.into());
    }

    pub fn is_completed(&self) -> bool {
        self.task_info.status == TaskStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unit_result_json_shape() {
        let ok = UnitResult::success(json!({"k": 1}));
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["result"]["k"], 1);

        let bad = UnitResult::failed("missing column");
        let value = serde_json::to_value(&bad).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["message"], "missing column");
    }

    #[test]
    fn test_envelope_tracks_successful_units_only() {
        let mut envelope = ResultEnvelope::started(TaskId::new(), String::new());
        envelope.record_model("what_if_decision_simulator", UnitResult::success(json!({})));
        envelope.record_model("portrait", UnitResult::failed("boom"));
        envelope.record_analysis("radar", UnitResult::success(json!([])));
        envelope.finish();

        assert!(envelope.is_completed());
        assert_eq!(
            envelope.task_info.models_trained,
            vec!["what_if_decision_simulator"]
        );
        assert_eq!(envelope.task_info.analyses_completed, vec!["radar"]);
        assert_eq!(envelope.model_results.len(), 2);
    }

    #[test]
    fn test_abort_sets_failed_status() {
        let mut envelope = ResultEnvelope::started(TaskId::new(), String::new());
        envelope.abort("storage unreachable");

        assert!(!envelope.is_completed());
        assert_eq!(envelope.task_info.status, TaskStatus::Failed);
        assert_eq!(
            envelope.task_info.error.as_deref(),
            Some("storage unreachable")
        );
    }

    #[test]
    fn test_envelope_serialization_is_deterministic() {
        let mut envelope = ResultEnvelope::started(TaskId::new(), "demo".to_string());
        envelope.record_analysis("zeta", UnitResult::success(json!(1)));
        envelope.record_analysis("alpha", UnitResult::success(json!(2)));
        envelope.finish();

        let a = serde_json::to_string(&envelope).unwrap();
        let b = serde_json::to_string(&envelope).unwrap();
        assert_eq!(a, b);
        // BTreeMap ordering: alpha serializes before zeta regardless of
        // insertion order.
        assert!(a.find("alpha").unwrap() < a.find("zeta").unwrap());
    }
}
