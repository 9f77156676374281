//! Workflow definition types for stepwise.
//!
//! A `Workflow` is the immutable step graph the engine runs: typed steps,
//! guarded transitions between them, declared variables, and run settings.
//! Definitions are authored elsewhere and are read-only to the engine.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::Condition;

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// The canonical workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Stable workflow identifier (e.g. "order-approval").
    pub id: String,
    /// Human-readable workflow name.
    pub name: String,
    /// Version string (e.g. "1.0.0").
    pub version: String,
    /// Every step in the graph, in authoring order.
    pub steps: Vec<Step>,
    /// Declared variables with their defaults.
    #[serde(default)]
    pub variables: Vec<Variable>,
    /// ID of the first step to execute.
    pub start_step_id: String,
    /// Steps that end the run successfully once they have executed.
    #[serde(default)]
    pub end_step_ids: HashSet<String>,
    /// Run-wide settings.
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl Workflow {
    /// Look up a step by ID.
    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Whether a step with the given ID exists in this workflow.
    pub fn has_step(&self, step_id: &str) -> bool {
        self.steps.iter().any(|s| s.id == step_id)
    }

    /// Whether the step is one of the declared end steps.
    pub fn is_end_step(&self, step_id: &str) -> bool {
        self.end_step_ids.contains(step_id)
    }

    /// Default values of all declared variables that carry one.
    pub fn default_variables(&self) -> HashMap<String, Value> {
        self.variables
            .iter()
            .filter_map(|v| v.default.clone().map(|d| (v.name.clone(), d)))
            .collect()
    }
}

/// A declared workflow variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// A required variable must be bound by a default or a caller override.
    #[serde(default)]
    pub required: bool,
}

/// Type tag of a declared variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    #[default]
    Any,
}

impl VariableType {
    /// Whether `value` conforms to this type tag. `Null` conforms to every tag.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (VariableType::Any, _) => true,
            (VariableType::String, Value::String(_)) => true,
            (VariableType::Number, Value::Number(_)) => true,
            (VariableType::Boolean, Value::Bool(_)) => true,
            (VariableType::Object, Value::Object(_)) => true,
            (VariableType::Array, Value::Array(_)) => true,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Workflow-wide run settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Timeout for the whole run in milliseconds (None = unbounded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// What to do when a step fails and no retry remains.
    #[serde(default)]
    pub error_handling: ErrorHandling,
    /// Retry policy for action steps that do not declare their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

/// Error-handling mode applied to unrecovered step failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    /// Abort the whole execution.
    #[default]
    Fail,
    /// Log a warning and continue with transition resolution.
    Continue,
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry policy attached to an action (or to the workflow settings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffType,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Growth factor for exponential backoff.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound for any computed delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffType::default(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Delay schedule between retry attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// A typed node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the workflow.
    pub id: String,
    pub name: String,
    /// Kind-specific payload; the tag doubles as the step kind.
    #[serde(flatten)]
    pub payload: StepPayload,
    /// Outgoing edges in priority order.
    #[serde(default)]
    pub transitions: Vec<Transition>,
    /// Per-attempt timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        self.payload.kind()
    }

    /// The action descriptor, for action steps.
    pub fn action(&self) -> Option<&Action> {
        match &self.payload {
            StepPayload::Action(action) => Some(action),
            _ => None,
        }
    }
}

/// Discriminant of a step's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Action,
    Condition,
    Parallel,
    Loop,
    Wait,
    Subworkflow,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Action => "action",
            StepKind::Condition => "condition",
            StepKind::Parallel => "parallel",
            StepKind::Loop => "loop",
            StepKind::Wait => "wait",
            StepKind::Subworkflow => "subworkflow",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step payload, internally tagged by `kind`:
///
/// ```yaml
/// id: notify
/// name: Notify owner
/// kind: action
/// type: email
/// config: { to: "ops@example.com" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepPayload {
    Action(Action),
    Condition { condition: Condition },
    Parallel(ParallelConfig),
    Loop(LoopConfig),
    Wait(WaitConfig),
    Subworkflow(SubworkflowRef),
}

impl StepPayload {
    pub fn kind(&self) -> StepKind {
        match self {
            StepPayload::Action(_) => StepKind::Action,
            StepPayload::Condition { .. } => StepKind::Condition,
            StepPayload::Parallel(_) => StepKind::Parallel,
            StepPayload::Loop(_) => StepKind::Loop,
            StepPayload::Wait(_) => StepKind::Wait,
            StepPayload::Subworkflow(_) => StepKind::Subworkflow,
        }
    }
}

/// A pluggable unit of work executed by the external action executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Capability key (e.g. "email", "approval", "webhook").
    #[serde(rename = "type")]
    pub action_type: String,
    /// Opaque configuration handed to the executor.
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Transitions taken when the action succeeds (overrides step transitions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<Vec<Transition>>,
    /// Transitions taken when the action fails (overrides step transitions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<Vec<Transition>>,
    /// Variable that receives the action output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
}

impl Action {
    pub fn new(action_type: impl Into<String>, config: Value) -> Self {
        Self {
            action_type: action_type.into(),
            config,
            retry: None,
            on_success: None,
            on_failure: None,
            output_variable: None,
        }
    }
}

/// Branches executed concurrently by a parallel step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Each branch is an ordered step sequence.
    pub branches: Vec<Vec<Step>>,
    #[serde(default)]
    pub policy: ParallelPolicy,
}

/// Completion policy of a parallel step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ParallelPolicy {
    /// Run every branch to completion, collecting every result.
    #[default]
    All,
    /// Run every branch; fail the step if any branch failed.
    AllOrNothing,
    /// Settle with the first branch to finish.
    Race,
    /// Succeed when the fraction of successful branches reaches `threshold`.
    Threshold { threshold: f64 },
    /// Run at most `limit` branches at a time, admitted in order.
    Bounded { limit: usize },
}

/// Configuration of a loop step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Body steps run in order on every iteration.
    pub body: Vec<Step>,
    /// Loop continues while this holds (None = always).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// Loop stops as soon as this holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_condition: Option<Condition>,
    /// Safety cap; falls back to the engine's configured maximum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    /// Variable bound to the 0-based iteration index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_variable: Option<String>,
}

/// What a wait step suspends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "until", rename_all = "snake_case")]
pub enum WaitConfig {
    /// Sleep for a fixed duration.
    Duration { duration_ms: u64 },
    /// Sleep until an absolute point in time.
    Timestamp { at: chrono::DateTime<chrono::Utc> },
    /// Suspend until a named external event arrives.
    Event { event: String },
}

/// Reference to another workflow run as a sub-workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubworkflowRef {
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// A directed, optionally guarded edge between two steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// Branch label for condition steps ("true" / "false").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Transition {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
            label: None,
        }
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn guarded(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}
