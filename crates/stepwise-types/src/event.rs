//! Event types emitted by the execution engine.
//!
//! `EngineEvent` is broadcast on the event bus during a run. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels; delivery and
//! storage are up to subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::execution::{ErrorCode, LogLevel};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEvent {
    /// An execution has started running.
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: String,
        workflow_version: String,
        triggered_by: Option<String>,
    },

    /// An execution reached an end step.
    ExecutionCompleted {
        execution_id: Uuid,
        workflow_id: String,
        duration_ms: u64,
        steps_completed: u32,
    },

    /// An execution terminated with an error.
    ExecutionFailed {
        execution_id: Uuid,
        workflow_id: String,
        code: ErrorCode,
        error: String,
        step_id: Option<String>,
    },

    /// An execution was cancelled by a caller.
    ExecutionCancelled { execution_id: Uuid },

    /// A step attempt has started.
    StepStarted {
        execution_id: Uuid,
        step_id: String,
        step_name: String,
        step_kind: String,
        attempt: u32,
    },

    /// A step attempt succeeded.
    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        attempt: u32,
        duration_ms: u64,
    },

    /// A step attempt failed.
    StepFailed {
        execution_id: Uuid,
        step_id: String,
        attempt: u32,
        error: String,
        will_retry: bool,
    },

    /// Generic structured log record.
    Log {
        execution_id: Uuid,
        level: LogLevel,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
}

impl EngineEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            EngineEvent::ExecutionStarted { execution_id, .. }
            | EngineEvent::ExecutionCompleted { execution_id, .. }
            | EngineEvent::ExecutionFailed { execution_id, .. }
            | EngineEvent::ExecutionCancelled { execution_id }
            | EngineEvent::StepStarted { execution_id, .. }
            | EngineEvent::StepCompleted { execution_id, .. }
            | EngineEvent::StepFailed { execution_id, .. }
            | EngineEvent::Log { execution_id, .. } => *execution_id,
        }
    }
}
