//! Execution tracking types: one `Execution` per run, one `StepExecution`
//! per step attempt, plus the run `Context` and its structured error.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::workflow::Workflow;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// The data an execution carries: variable bindings plus run metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub workflow_id: String,
    pub execution_id: Uuid,
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Context {
    pub fn new(workflow_id: impl Into<String>, execution_id: Uuid) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id,
            variables: HashMap::new(),
            metadata: HashMap::new(),
            triggered_by: None,
            tenant_id: None,
            environment: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// JSON view used for dotted path lookups (`metadata.tenant`,
    /// `variables.count`, `executionId`, ...).
    pub fn to_path_root(&self) -> Value {
        let variables: Map<String, Value> = self
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let metadata: Map<String, Value> = self
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        json!({
            "workflowId": self.workflow_id,
            "executionId": self.execution_id.to_string(),
            "variables": variables,
            "metadata": metadata,
            "triggeredBy": self.triggered_by,
            "tenantId": self.tenant_id,
            "environment": self.environment,
            "createdAt": self.created_at.to_rfc3339(),
        })
    }
}

/// Caller-supplied values layered over a workflow's declared defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextOverrides {
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl ContextOverrides {
    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Status of an execution.
///
/// `Pending -> Running -> {Success, Failed, Cancelled}`, with
/// `Running <-> Waiting` while a wait step sleeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Waiting,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Cancelled) | (Pending, Failed) => true,
            (Running, Waiting) | (Waiting, Running) => true,
            (Running | Waiting, Success | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Waiting => "waiting",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Status of a single step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Success,
    Failed,
    Skipped,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// One runtime instance of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_version: String,
    pub status: ExecutionStatus,
    pub context: Context,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
    #[serde(default)]
    pub step_executions: Vec<StepExecution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub metrics: ExecutionMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
}

impl Execution {
    /// A fresh `Pending` execution of `workflow`.
    pub fn new(workflow: &Workflow, context: Context) -> Self {
        Self {
            id: context.execution_id,
            workflow_id: workflow.id.clone(),
            workflow_version: workflow.version.clone(),
            status: ExecutionStatus::Pending,
            current_step_id: None,
            context,
            step_executions: Vec::new(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            metrics: ExecutionMetrics::default(),
            error: None,
        }
    }

    /// Move to `next` if the state machine allows it. Returns whether the
    /// status changed.
    pub fn transition(&mut self, next: ExecutionStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Append a step record and fold it into the metrics.
    pub fn record_step(&mut self, record: StepExecution) {
        self.metrics.record(&record);
        self.step_executions.push(record);
    }

    /// Records for one step ID, in attempt order.
    pub fn attempts_for<'a>(&'a self, step_id: &'a str) -> impl Iterator<Item = &'a StepExecution> {
        self.step_executions.iter().filter(move |r| r.step_id == step_id)
    }
}

/// Aggregate counters for an execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_steps: u32,
    pub completed_steps: u32,
    pub failed_steps: u32,
    pub skipped_steps: u32,
    pub retry_count: u32,
    pub average_step_duration_ms: f64,
}

impl ExecutionMetrics {
    /// Fold one step record into the counters and the rolling average.
    pub fn record(&mut self, record: &StepExecution) {
        self.total_steps += 1;
        match record.status {
            StepStatus::Success => self.completed_steps += 1,
            StepStatus::Failed => self.failed_steps += 1,
            StepStatus::Skipped => self.skipped_steps += 1,
            StepStatus::Running => {}
        }
        let duration = record.duration_ms().unwrap_or(0) as f64;
        let n = f64::from(self.total_steps);
        self.average_step_duration_ms += (duration - self.average_step_duration_ms) / n;
    }
}

// ---------------------------------------------------------------------------
// StepExecution
// ---------------------------------------------------------------------------

/// One attempt at executing one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub status: StepStatus,
    /// 1-based, increments on retry.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl StepExecution {
    pub fn start(step_id: impl Into<String>, attempt: u32) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Running,
            attempt,
            started_at: Utc::now(),
            completed_at: None,
            output: None,
            error: None,
            logs: Vec::new(),
        }
    }

    pub fn succeed(&mut self, output: Value) {
        self.status = StepStatus::Success;
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Skipped;
        self.completed_at = Some(Utc::now());
        self.log(LogLevel::Warn, reason, None);
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>, data: Option<Value>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            data,
        });
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}

/// A log record attached to a step attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

// ---------------------------------------------------------------------------
// ExecutionError
// ---------------------------------------------------------------------------

/// Structured terminal error carried by every failed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Error and its source chain, one cause per line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    pub recoverable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    StepFailed,
    StepNotFound,
    NoNextStep,
    InvalidDefinition,
    EvaluationFailed,
    Timeout,
    Internal,
}
