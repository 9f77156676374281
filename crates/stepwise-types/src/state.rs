//! Runtime run state and checkpoints.
//!
//! `State` is the engine-private working copy of an execution: where it is,
//! where it has been, and its live variable bindings. It is serializable so
//! an external persistence layer can export and re-import it.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::execution::ExecutionStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub execution_id: Uuid,
    /// `None` before the run starts and after it finishes.
    pub current_step_id: Option<String>,
    pub visited: HashSet<String>,
    pub variables: HashMap<String, Value>,
    /// Append-only audit trail; never rewound by checkpoint restore.
    pub history: Vec<TransitionRecord>,
    pub checkpoints: Vec<Checkpoint>,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
}

impl State {
    /// Timestamp of the most recent transition, or creation time.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.history
            .last()
            .map(|t| t.timestamp)
            .unwrap_or(self.created_at)
    }

    pub fn checkpoint(&self, checkpoint_id: Uuid) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.id == checkpoint_id)
    }
}

/// One entry of the transition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Option<String>,
    pub to: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Point-in-time snapshot of an execution's variable bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub step_id: String,
    pub variables: HashMap<String, Value>,
    /// Caller-supplied key/value annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}
