//! Execution engine: drives one workflow run from its start step to an end
//! step.
//!
//! # Execution flow
//!
//! 1. `prepare` refuses graphs with dangling transitions, builds the
//!    `Context` from declared defaults plus overrides, and registers a
//!    `Pending` execution.
//! 2. `run` creates the run state, moves to `Running` and emits
//!    `ExecutionStarted`.
//! 3. Each iteration checks for cancellation, resolves the step, runs it
//!    (retrying per policy), records the attempt, then resolves and moves to
//!    the next step, checkpointing if configured.
//! 4. The run ends `Success` after an end step, `Cancelled` when the token
//!    fires, or `Failed` with a structured `ExecutionError`.
//!
//! One sequential loop per execution. Executions and cancellation tokens
//! live in `DashMap`s keyed by execution id.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use stepwise_types::config::EngineConfig;
use stepwise_types::event::EngineEvent;
use stepwise_types::execution::{
    Context, ContextOverrides, ErrorCode, Execution, ExecutionError, ExecutionStatus, LogLevel,
    StepExecution, StepStatus,
};
use stepwise_types::workflow::{ErrorHandling, Step, StepKind, VariableType, Workflow};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::action::box_executor::BoxActionExecutor;
use crate::event::bus::EventBus;
use crate::repository::workflow::WorkflowRepository;

use super::condition::{ConditionEvaluator, EvaluationError};
use super::retry::RetryHandler;
use super::state::{StateError, StateTracker};
use super::step_runner::{StepError, StepRunner};
use super::transition::{TransitionResolver, dangling_transitions, validate_workflow};

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("invalid workflow definition: {}", .0.join("; "))]
    InvalidDefinition(Vec<String>),

    #[error("required variable '{0}' has no value")]
    MissingVariable(String),

    #[error("variable '{name}' must be of type {expected:?}")]
    InvalidVariable { name: String, expected: VariableType },

    #[error("step '{0}' not found")]
    StepNotFound(String),

    #[error("step '{step_id}' failed")]
    StepFailed {
        step_id: String,
        #[source]
        source: StepError,
    },

    #[error("no transition applies after step '{0}', which is not an end step")]
    NoNextStep(String),

    #[error("transition resolution failed after step '{step_id}'")]
    Transition {
        step_id: String,
        #[source]
        source: EvaluationError,
    },

    #[error("workflow timed out after {0:?}")]
    Timeout(Duration),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("execution {id} is {status}")]
    InvalidStatus { id: Uuid, status: ExecutionStatus },

    #[error("run state error")]
    State(#[from] StateError),
}

impl ExecutorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ExecutorError::InvalidDefinition(_)
            | ExecutorError::MissingVariable(_)
            | ExecutorError::InvalidVariable { .. } => ErrorCode::InvalidDefinition,
            ExecutorError::StepNotFound(_) => ErrorCode::StepNotFound,
            ExecutorError::StepFailed { .. } => ErrorCode::StepFailed,
            ExecutorError::NoNextStep(_) => ErrorCode::NoNextStep,
            ExecutorError::Transition { .. } => ErrorCode::EvaluationFailed,
            ExecutorError::Timeout(_) => ErrorCode::Timeout,
            ExecutorError::ExecutionNotFound(_)
            | ExecutorError::InvalidStatus { .. }
            | ExecutorError::State(_) => ErrorCode::Internal,
        }
    }

    pub fn step_id(&self) -> Option<&str> {
        match self {
            ExecutorError::StepNotFound(id) | ExecutorError::NoNextStep(id) => Some(id),
            ExecutorError::StepFailed { step_id, .. } | ExecutorError::Transition { step_id, .. } => {
                Some(step_id)
            }
            _ => None,
        }
    }

    /// A re-run of the same workflow might succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ExecutorError::StepFailed { .. } | ExecutorError::Timeout(_))
    }

    /// Structured record attached to a failed execution.
    pub fn to_execution_error(&self) -> ExecutionError {
        let chain = error_chain(self);
        ExecutionError {
            code: self.code(),
            message: chain.join(": "),
            step_id: self.step_id().map(str::to_string),
            timestamp: Utc::now(),
            trace: Some(
                chain
                    .iter()
                    .enumerate()
                    .map(|(depth, cause)| {
                        if depth == 0 {
                            cause.clone()
                        } else {
                            format!("caused by: {cause}")
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            recoverable: self.is_recoverable(),
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    chain
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

enum RunOutcome {
    Completed,
    Cancelled,
}

/// Result of running one step through its retry policy.
struct StepOutcome {
    record: StepExecution,
    error: Option<StepError>,
}

pub struct ExecutionEngine<R> {
    runner: StepRunner<R>,
    resolver: TransitionResolver,
    state: Arc<StateTracker>,
    event_bus: EventBus,
    config: EngineConfig,
    executions: DashMap<Uuid, Execution>,
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

impl<R: WorkflowRepository + 'static> ExecutionEngine<R> {
    pub fn new(
        actions: BoxActionExecutor,
        repository: Arc<R>,
        event_bus: EventBus,
        config: EngineConfig,
    ) -> Self {
        let evaluator = ConditionEvaluator::new();
        Self {
            runner: StepRunner::new(actions, repository, evaluator.clone(), &config),
            resolver: TransitionResolver::new(evaluator),
            state: Arc::new(StateTracker::new()),
            event_bus,
            config,
            executions: DashMap::new(),
            cancellation_tokens: DashMap::new(),
        }
    }

    pub fn state_tracker(&self) -> &Arc<StateTracker> {
        &self.state
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Snapshot of an execution. Live runs are refreshed after every step.
    pub fn get_execution(&self, execution_id: Uuid) -> Option<Execution> {
        self.executions.get(&execution_id).map(|e| e.clone())
    }

    /// All known executions, oldest first.
    pub fn list_executions(&self) -> Vec<Execution> {
        let mut all: Vec<Execution> = self.executions.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|e| e.id);
        all
    }

    /// Prepare and run in one call. Returns `Err` only when the run is
    /// refused; a run that fails still returns its `Failed` execution.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        overrides: ContextOverrides,
        triggered_by: Option<&str>,
    ) -> Result<Execution, ExecutorError> {
        let execution_id = self.prepare(workflow, overrides, triggered_by)?;
        self.run(execution_id, workflow).await
    }

    /// Register a `Pending` execution of `workflow`.
    pub fn prepare(
        &self,
        workflow: &Workflow,
        overrides: ContextOverrides,
        triggered_by: Option<&str>,
    ) -> Result<Uuid, ExecutorError> {
        let dangling = dangling_transitions(workflow);
        if !dangling.is_empty() {
            return Err(ExecutorError::InvalidDefinition(dangling));
        }
        if self.config.validate_before_run {
            for diagnostic in validate_workflow(workflow) {
                tracing::warn!(workflow_id = %workflow.id, diagnostic, "workflow validation warning");
            }
        }

        let mut variables = workflow.default_variables();
        variables.extend(overrides.variables);
        for declared in &workflow.variables {
            match variables.get(&declared.name) {
                None if declared.required => {
                    return Err(ExecutorError::MissingVariable(declared.name.clone()));
                }
                Some(value) if !declared.var_type.accepts(value) => {
                    return Err(ExecutorError::InvalidVariable {
                        name: declared.name.clone(),
                        expected: declared.var_type,
                    });
                }
                _ => {}
            }
        }

        let execution_id = Uuid::now_v7();
        let mut ctx = Context::new(workflow.id.clone(), execution_id);
        ctx.variables = variables;
        ctx.metadata = overrides.metadata;
        ctx.tenant_id = overrides.tenant_id;
        ctx.environment = overrides.environment;
        ctx.triggered_by = triggered_by.map(str::to_string);

        self.executions
            .insert(execution_id, Execution::new(workflow, ctx));
        self.cancellation_tokens
            .insert(execution_id, CancellationToken::new());
        tracing::debug!(execution_id = %execution_id, workflow_id = %workflow.id, "prepared execution");
        Ok(execution_id)
    }

    /// Drive a prepared execution to a terminal status.
    pub async fn run(&self, execution_id: Uuid, workflow: &Workflow) -> Result<Execution, ExecutorError> {
        let mut execution = self
            .get_execution(execution_id)
            .ok_or(ExecutorError::ExecutionNotFound(execution_id))?;
        match execution.status {
            ExecutionStatus::Pending => {}
            ExecutionStatus::Cancelled => {
                self.cancellation_tokens.remove(&execution_id);
                return Ok(execution);
            }
            status => return Err(ExecutorError::InvalidStatus { id: execution_id, status }),
        }
        let token = self
            .cancellation_tokens
            .get(&execution_id)
            .map(|t| t.clone())
            .unwrap_or_default();

        execution.transition(ExecutionStatus::Running);
        execution.started_at = Some(Utc::now());
        self.state
            .create(execution_id, &workflow.start_step_id, &execution.context);
        self.sync(&execution);

        tracing::info!(
            execution_id = %execution_id,
            workflow_id = %workflow.id,
            version = %workflow.version,
            "execution started"
        );
        self.event_bus.publish(EngineEvent::ExecutionStarted {
            execution_id,
            workflow_id: workflow.id.clone(),
            workflow_version: workflow.version.clone(),
            triggered_by: execution.context.triggered_by.clone(),
        });

        let outcome = match workflow.settings.timeout_ms.map(Duration::from_millis) {
            Some(limit) => {
                tokio::time::timeout(limit, self.drive(workflow, &mut execution, &token))
                    .await
                    .unwrap_or(Err(ExecutorError::Timeout(limit)))
            }
            None => self.drive(workflow, &mut execution, &token).await,
        };

        self.finish(workflow, &mut execution, outcome);
        self.cancellation_tokens.remove(&execution_id);
        Ok(execution)
    }

    /// Request cancellation. Observed before the next step starts; an
    /// in-flight step is not interrupted.
    pub fn cancel_execution(&self, execution_id: Uuid) -> Result<(), ExecutorError> {
        {
            let mut entry = self
                .executions
                .get_mut(&execution_id)
                .ok_or(ExecutorError::ExecutionNotFound(execution_id))?;
            if !entry.transition(ExecutionStatus::Cancelled) {
                return Err(ExecutorError::InvalidStatus {
                    id: execution_id,
                    status: entry.status,
                });
            }
            let now = Utc::now();
            entry.completed_at = Some(now);
            entry.duration_ms = entry.started_at.map(|s| elapsed_ms(s, now));
            // Pending executions have no run state yet.
            let _ = self.state.update_status(execution_id, ExecutionStatus::Cancelled);
        }

        if let Some(token) = self.cancellation_tokens.get(&execution_id) {
            token.cancel();
        }

        tracing::info!(execution_id = %execution_id, "execution cancelled");
        self.event_bus
            .publish(EngineEvent::ExecutionCancelled { execution_id });
        Ok(())
    }

    /// Purge run state, finished executions and never-run `Pending`
    /// executions older than `state_retention_secs`, along with their
    /// cancellation tokens. Returns the number of run states removed.
    pub fn cleanup(&self) -> usize {
        let retention = Duration::from_secs(self.config.state_retention_secs);
        let removed = self.state.cleanup(retention);
        let cutoff = chrono::TimeDelta::from_std(retention)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return removed;
        };

        // Finished runs age from completion, never-run ones from creation.
        let stale: Vec<Uuid> = self
            .executions
            .iter()
            .filter(|e| match e.status {
                ExecutionStatus::Pending => e.context.created_at < cutoff,
                status => status.is_terminal() && e.completed_at.is_some_and(|at| at < cutoff),
            })
            .map(|e| e.id)
            .collect();
        for id in &stale {
            self.executions.remove(id);
            self.cancellation_tokens.remove(id);
        }
        if !stale.is_empty() {
            tracing::debug!(purged = stale.len(), "purged stale executions");
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        workflow: &Workflow,
        execution: &mut Execution,
        token: &CancellationToken,
    ) -> Result<RunOutcome, ExecutorError> {
        let execution_id = execution.id;
        let mut current = workflow.start_step_id.clone();

        loop {
            if token.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            let step = workflow
                .step(&current)
                .ok_or_else(|| ExecutorError::StepNotFound(current.clone()))?;
            execution.current_step_id = Some(step.id.clone());

            let StepOutcome { record, error } = self.run_with_retry(workflow, step, execution, token).await?;
            if record.status == StepStatus::Skipped {
                return Ok(RunOutcome::Cancelled);
            }
            if let Some(error) = error {
                match workflow.settings.error_handling {
                    ErrorHandling::Fail => {
                        return Err(ExecutorError::StepFailed {
                            step_id: step.id.clone(),
                            source: error,
                        });
                    }
                    ErrorHandling::Continue => {
                        tracing::warn!(
                            execution_id = %execution_id,
                            step_id = %step.id,
                            error = %error,
                            "step failed, continuing"
                        );
                        self.event_bus.publish(EngineEvent::Log {
                            execution_id,
                            level: LogLevel::Warn,
                            message: format!("step '{}' failed, continuing", step.id),
                            data: Some(json!({ "error": error.to_string() })),
                        });
                    }
                }
            }

            if workflow.is_end_step(&step.id) {
                self.state
                    .transition_to(execution_id, None, Some("end step reached".to_string()))?;
                return Ok(RunOutcome::Completed);
            }

            let ctx = self.live_context(execution)?;
            let next = self
                .resolver
                .determine_next_step(step, &ctx, &record)
                .map_err(|source| ExecutorError::Transition {
                    step_id: step.id.clone(),
                    source,
                })?
                .ok_or_else(|| ExecutorError::NoNextStep(step.id.clone()))?;
            if !workflow.has_step(&next) {
                return Err(ExecutorError::StepNotFound(next));
            }

            self.state.transition_to(
                execution_id,
                Some(next.clone()),
                Some(format!("{} -> {next}", step.id)),
            )?;
            if self.config.checkpoint_each_step {
                self.state.create_checkpoint(execution_id, &next, None)?;
            }
            tracing::debug!(execution_id = %execution_id, from = %step.id, to = %next, "transition");
            self.sync(execution);
            current = next;
        }
    }

    /// Run `step` until it succeeds, its retries are exhausted, or the run is
    /// cancelled during a backoff (recorded as a `Skipped` attempt).
    async fn run_with_retry(
        &self,
        workflow: &Workflow,
        step: &Step,
        execution: &mut Execution,
        token: &CancellationToken,
    ) -> Result<StepOutcome, ExecutorError> {
        let execution_id = execution.id;
        let policy = RetryHandler::policy_for(step, &workflow.settings);
        let mut attempt = 1;

        loop {
            let mut record = StepExecution::start(&step.id, attempt);
            self.event_bus.publish(EngineEvent::StepStarted {
                execution_id,
                step_id: step.id.clone(),
                step_name: step.name.clone(),
                step_kind: step.kind().as_str().to_string(),
                attempt,
            });
            tracing::debug!(execution_id = %execution_id, step_id = %step.id, attempt, "step started");

            let waiting = step.kind() == StepKind::Wait;
            if waiting {
                self.set_status(execution, ExecutionStatus::Waiting)?;
            }
            let mut ctx = self.live_context(execution)?;
            let result = self.runner.run(step, &mut ctx).await;
            if waiting {
                self.set_status(execution, ExecutionStatus::Running)?;
            }

            let error = match result {
                Ok(output) => {
                    self.state.bulk_set_variables(execution_id, ctx.variables)?;
                    execution.context.variables = self.state.get_all_variables(execution_id)?;
                    record.succeed(output);
                    record.log(LogLevel::Info, "step completed", None);
                    let duration_ms = record.duration_ms().unwrap_or(0);
                    self.event_bus.publish(EngineEvent::StepCompleted {
                        execution_id,
                        step_id: step.id.clone(),
                        attempt,
                        duration_ms,
                    });
                    tracing::debug!(execution_id = %execution_id, step_id = %step.id, attempt, duration_ms, "step completed");
                    execution.record_step(record.clone());
                    self.sync(execution);
                    return Ok(StepOutcome { record, error: None });
                }
                Err(error) => error,
            };

            let retry = policy.filter(|p| RetryHandler::should_retry(p, attempt));
            record.fail(error.to_string());
            record.log(
                LogLevel::Error,
                format!("attempt {attempt} failed"),
                Some(json!({ "error": error.to_string(), "will_retry": retry.is_some() })),
            );
            self.event_bus.publish(EngineEvent::StepFailed {
                execution_id,
                step_id: step.id.clone(),
                attempt,
                error: error.to_string(),
                will_retry: retry.is_some(),
            });
            tracing::debug!(
                execution_id = %execution_id,
                step_id = %step.id,
                attempt,
                error = %error,
                will_retry = retry.is_some(),
                "step failed"
            );
            execution.record_step(record.clone());
            self.sync(execution);

            let Some(policy) = retry else {
                return Ok(StepOutcome {
                    record,
                    error: Some(error),
                });
            };

            let delay = RetryHandler::backoff_delay(policy, attempt);
            tokio::select! {
                _ = token.cancelled() => {
                    let mut skipped = StepExecution::start(&step.id, attempt + 1);
                    skipped.skip("execution cancelled during retry backoff");
                    tracing::warn!(
                        execution_id = %execution_id,
                        step_id = %step.id,
                        attempt = attempt + 1,
                        "retry skipped, execution cancelled"
                    );
                    execution.record_step(skipped.clone());
                    self.sync(execution);
                    return Ok(StepOutcome { record: skipped, error: None });
                }
                _ = tokio::time::sleep(delay) => {}
            }
            execution.metrics.retry_count += 1;
            attempt += 1;
        }
    }

    /// Settle the run. A cancellation already in the registry wins over
    /// `outcome`; the decision and both writes happen under one registry guard.
    fn finish(&self, workflow: &Workflow, execution: &mut Execution, outcome: Result<RunOutcome, ExecutorError>) {
        let execution_id = execution.id;
        let state_result = {
            let entry = self.executions.get_mut(&execution_id);
            let cancelled_at = entry
                .as_ref()
                .filter(|e| e.status == ExecutionStatus::Cancelled)
                .map(|e| e.completed_at);
            let outcome = match cancelled_at {
                Some(_) => Ok(RunOutcome::Cancelled),
                None => outcome,
            };
            let status = Self::settle(execution, outcome, cancelled_at.flatten());
            let state_result = self.state.update_status(execution_id, status);
            match entry {
                Some(mut entry) => *entry = execution.clone(),
                None => {
                    self.executions.insert(execution_id, execution.clone());
                }
            }
            state_result
        };

        if let Err(e) = state_result {
            tracing::warn!(execution_id = %execution_id, error = %e, "run state missing at finish");
        }
        self.report(workflow, execution);
    }

    fn settle(
        execution: &mut Execution,
        outcome: Result<RunOutcome, ExecutorError>,
        cancelled_at: Option<chrono::DateTime<Utc>>,
    ) -> ExecutionStatus {
        let status = match outcome {
            Ok(RunOutcome::Completed) => ExecutionStatus::Success,
            Ok(RunOutcome::Cancelled) => ExecutionStatus::Cancelled,
            Err(err) => {
                execution.error = Some(err.to_execution_error());
                ExecutionStatus::Failed
            }
        };
        execution.transition(status);
        execution.completed_at = cancelled_at.or(Some(Utc::now()));
        execution.duration_ms = execution
            .started_at
            .zip(execution.completed_at)
            .map(|(s, e)| elapsed_ms(s, e));
        status
    }

    fn report(&self, workflow: &Workflow, execution: &Execution) {
        let execution_id = execution.id;
        match execution.status {
            ExecutionStatus::Success => {
                tracing::info!(
                    execution_id = %execution_id,
                    steps = execution.metrics.completed_steps,
                    "execution completed"
                );
                self.event_bus.publish(EngineEvent::ExecutionCompleted {
                    execution_id,
                    workflow_id: workflow.id.clone(),
                    duration_ms: execution.duration_ms.unwrap_or(0),
                    steps_completed: execution.metrics.completed_steps,
                });
            }
            ExecutionStatus::Failed => {
                let Some(record) = execution.error.as_ref() else {
                    return;
                };
                tracing::error!(
                    execution_id = %execution_id,
                    code = ?record.code,
                    step_id = record.step_id.as_deref().unwrap_or("-"),
                    error = %record.message,
                    "execution failed"
                );
                self.event_bus.publish(EngineEvent::ExecutionFailed {
                    execution_id,
                    workflow_id: workflow.id.clone(),
                    code: record.code,
                    error: record.message.clone(),
                    step_id: record.step_id.clone(),
                });
            }
            ExecutionStatus::Cancelled => {
                tracing::info!(execution_id = %execution_id, "execution stopped after cancellation");
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// The execution context with the tracker's live variables.
    fn live_context(&self, execution: &Execution) -> Result<Context, ExecutorError> {
        let mut ctx = execution.context.clone();
        ctx.variables = self.state.get_all_variables(execution.id)?;
        Ok(ctx)
    }

    /// Move a live run between `Running` and `Waiting`. No-op once the
    /// registry holds a cancellation.
    fn set_status(&self, execution: &mut Execution, status: ExecutionStatus) -> Result<(), ExecutorError> {
        let Some(mut entry) = self.executions.get_mut(&execution.id) else {
            return Ok(());
        };
        if entry.status == ExecutionStatus::Cancelled || !execution.transition(status) {
            return Ok(());
        }
        self.state.update_status(execution.id, status)?;
        *entry = execution.clone();
        Ok(())
    }

    /// Publish the working copy to the registry. A cancellation recorded in
    /// the registry wins over the working copy's status.
    fn sync(&self, execution: &Execution) {
        if let Some(mut entry) = self.executions.get_mut(&execution.id) {
            if entry.status == ExecutionStatus::Cancelled {
                let (completed_at, duration_ms) = (entry.completed_at, entry.duration_ms);
                *entry = execution.clone();
                entry.status = ExecutionStatus::Cancelled;
                entry.completed_at = completed_at;
                entry.duration_ms = duration_ms;
            } else {
                *entry = execution.clone();
            }
        }
    }
}

fn elapsed_ms(start: chrono::DateTime<Utc>, end: chrono::DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use serde_json::Value;
    use stepwise_types::condition::{Condition, Operand, Operator};
    use stepwise_types::error::ActionError;
    use stepwise_types::workflow::{
        Action, BackoffType, ParallelConfig, ParallelPolicy, RetryPolicy, StepPayload, Transition,
        Variable, WaitConfig, WorkflowSettings,
    };

    use crate::action::executor::ActionExecutor;
    use crate::repository::memory::InMemoryWorkflowRepository;

    // -------------------------------------------------------------------
    // Fixtures
    // -------------------------------------------------------------------

    /// `ok` returns its config, `sleep` waits `config.ms`, `fail` always
    /// fails, `flaky` fails its first `config.failures` calls.
    #[derive(Default)]
    struct Scripted {
        calls: Mutex<HashMap<String, u64>>,
    }

    impl ActionExecutor for Scripted {
        async fn execute(&self, action: &Action, _ctx: &Context) -> Result<Value, ActionError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(action.action_type.clone()).or_insert(0);
                *n += 1;
                *n
            };
            match action.action_type.as_str() {
                "ok" => Ok(action.config.clone()),
                "sleep" => {
                    let ms = action.config["ms"].as_u64().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(json!("slept"))
                }
                "fail" => Err(ActionError::Failed("scripted failure".to_string())),
                "flaky" => {
                    let failures = action.config["failures"].as_u64().unwrap_or(0);
                    if call <= failures {
                        Err(ActionError::Failed(format!("flaky call {call}")))
                    } else {
                        Ok(json!({ "call": call }))
                    }
                }
                other => Err(ActionError::UnknownType(other.to_string())),
            }
        }
    }

    type Engine = ExecutionEngine<InMemoryWorkflowRepository>;

    fn engine() -> Engine {
        ExecutionEngine::new(
            BoxActionExecutor::new(Scripted::default()),
            Arc::new(InMemoryWorkflowRepository::new()),
            EventBus::new(256),
            EngineConfig::default(),
        )
    }

    fn step(id: &str, payload: StepPayload, next: &[&str]) -> Step {
        Step {
            id: id.to_string(),
            name: id.to_uppercase(),
            payload,
            transitions: next.iter().map(|to| Transition::new(id, *to)).collect(),
            timeout_ms: None,
        }
    }

    fn action(action_type: &str, config: Value) -> StepPayload {
        StepPayload::Action(Action::new(action_type, config))
    }

    fn workflow(steps: Vec<Step>, end: &[&str]) -> Workflow {
        Workflow {
            id: "wf".to_string(),
            name: "Test".to_string(),
            version: "1".to_string(),
            start_step_id: steps[0].id.clone(),
            steps,
            variables: vec![],
            end_step_ids: end.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
            settings: WorkflowSettings::default(),
        }
    }

    fn linear(ids: &[&str], payload: impl Fn() -> StepPayload) -> Workflow {
        let steps = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let next: Vec<&str> = ids.get(i + 1).into_iter().copied().collect();
                step(id, payload(), &next)
            })
            .collect();
        workflow(steps, &ids[ids.len() - 1..])
    }

    fn retry_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: BackoffType::Exponential,
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 1000,
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn run(engine: &Engine, wf: &Workflow) -> Execution {
        engine
            .execute(wf, ContextOverrides::default(), Some("test"))
            .await
            .unwrap()
    }

    // -------------------------------------------------------------------
    // Scenarios
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn linear_workflow_runs_in_order() {
        let engine = engine();
        let mut rx = engine.event_bus().subscribe();
        let wf = linear(&["a", "b", "c"], || action("sleep", json!({ "ms": 2 })));

        let execution = run(&engine, &wf).await;

        assert_eq!(execution.status, ExecutionStatus::Success);
        let ids: Vec<&str> = execution.step_executions.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        let starts: Vec<_> = execution.step_executions.iter().map(|r| r.started_at).collect();
        assert!(starts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(execution.metrics.completed_steps, 3);
        assert!(execution.completed_at.is_some());
        assert!(execution.error.is_none());

        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(EngineEvent::ExecutionStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(EngineEvent::ExecutionCompleted { steps_completed: 3, .. })
        ));
        let started = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::StepStarted { .. }))
            .count();
        assert_eq!(started, 3);
    }

    #[tokio::test]
    async fn unconditioned_acyclic_chains_reach_an_end_step() {
        let names: Vec<String> = (0..6).map(|i| format!("s{i}")).collect();
        for len in 1..=names.len() {
            let ids: Vec<&str> = names[..len].iter().map(String::as_str).collect();
            let execution = run(&engine(), &linear(&ids, || action("ok", Value::Null))).await;
            assert_eq!(execution.status, ExecutionStatus::Success);
            assert_eq!(execution.step_executions.len(), len);
        }
    }

    #[tokio::test]
    async fn condition_step_follows_true_label() {
        let gate = Step {
            id: "check".to_string(),
            name: "Check".to_string(),
            payload: StepPayload::Condition {
                condition: Condition::simple(
                    Operator::GreaterThan,
                    Operand::literal("${count}"),
                    Some(Operand::literal(5)),
                ),
            },
            transitions: vec![
                Transition::new("check", "small").labeled("false"),
                Transition::new("check", "big").labeled("true"),
            ],
            timeout_ms: None,
        };
        let wf = workflow(
            vec![
                gate,
                step("big", action("ok", Value::Null), &[]),
                step("small", action("ok", Value::Null), &[]),
            ],
            &["big", "small"],
        );

        let execution = engine()
            .execute(
                &wf,
                ContextOverrides::default().with_variable("count", json!(10)),
                None,
            )
            .await
            .unwrap();

        let ids: Vec<&str> = execution.step_executions.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(ids, vec!["check", "big"]);
        assert_eq!(execution.step_executions[0].output, Some(json!(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_fail_fail_succeed_counts_two_retries() {
        let mut flaky = Action::new("flaky", json!({ "failures": 2 }));
        flaky.retry = Some(retry_policy());
        let wf = workflow(vec![step("charge", StepPayload::Action(flaky), &[])], &["charge"]);
        let engine = engine();
        let mut rx = engine.event_bus().subscribe();

        let start = tokio::time::Instant::now();
        let execution = run(&engine, &wf).await;

        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.metrics.retry_count, 2);
        let attempts: Vec<(u32, StepStatus)> = execution
            .attempts_for("charge")
            .map(|r| (r.attempt, r.status))
            .collect();
        assert_eq!(
            attempts,
            vec![
                (1, StepStatus::Failed),
                (2, StepStatus::Failed),
                (3, StepStatus::Success)
            ]
        );
        // 100ms then 200ms of backoff.
        assert!(start.elapsed() >= Duration::from_millis(300));

        let will_retry: Vec<bool> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::StepFailed { will_retry, .. } => Some(will_retry),
                _ => None,
            })
            .collect();
        assert_eq!(will_retry, vec![true, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn workflow_retry_default_applies_to_actions() {
        let mut wf = workflow(
            vec![step("charge", action("flaky", json!({ "failures": 1 })), &[])],
            &["charge"],
        );
        wf.settings.retry = Some(retry_policy());

        let execution = run(&engine(), &wf).await;

        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.metrics.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_the_run() {
        let mut failing = Action::new("fail", Value::Null);
        failing.retry = Some(retry_policy());
        let wf = workflow(
            vec![
                step("charge", StepPayload::Action(failing), &["done"]),
                step("done", action("ok", Value::Null), &[]),
            ],
            &["done"],
        );
        let engine = engine();
        let mut rx = engine.event_bus().subscribe();

        let execution = run(&engine, &wf).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.step_executions.len(), 3);
        assert_eq!(execution.metrics.failed_steps, 3);
        assert_eq!(execution.metrics.retry_count, 2);
        let error = execution.error.expect("failed run carries an error");
        assert_eq!(error.code, ErrorCode::StepFailed);
        assert_eq!(error.step_id.as_deref(), Some("charge"));
        assert!(error.recoverable);
        assert!(error.message.contains("scripted failure"));
        assert!(error.trace.unwrap().contains("caused by: action failed: scripted failure"));
        assert!(
            drain(&mut rx)
                .iter()
                .any(|e| matches!(e, EngineEvent::ExecutionFailed { code: ErrorCode::StepFailed, .. }))
        );
    }

    #[tokio::test]
    async fn continue_mode_proceeds_past_failures() {
        let mut wf = workflow(
            vec![
                step("a", action("fail", Value::Null), &["b"]),
                step("b", action("ok", Value::Null), &[]),
            ],
            &["b"],
        );
        wf.settings.error_handling = ErrorHandling::Continue;

        let execution = run(&engine(), &wf).await;

        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.metrics.failed_steps, 1);
        assert_eq!(execution.metrics.completed_steps, 1);
        assert_eq!(execution.step_executions[1].step_id, "b");
    }

    #[tokio::test]
    async fn on_failure_transitions_route_failed_actions() {
        let mut charge = Action::new("fail", Value::Null);
        charge.on_failure = Some(vec![Transition::new("charge", "refund")]);
        let mut wf = workflow(
            vec![
                step("charge", StepPayload::Action(charge), &["receipt"]),
                step("receipt", action("ok", Value::Null), &[]),
                step("refund", action("ok", Value::Null), &[]),
            ],
            &["receipt", "refund"],
        );
        wf.settings.error_handling = ErrorHandling::Continue;

        let execution = run(&engine(), &wf).await;

        assert_eq!(execution.step_executions.last().unwrap().step_id, "refund");
    }

    #[tokio::test]
    async fn output_variable_feeds_later_conditions() {
        let mut approve = Action::new("ok", json!("approved"));
        approve.output_variable = Some("decision".to_string());
        let mut approve_step = step("approve", StepPayload::Action(approve), &[]);
        approve_step.transitions = vec![
            Transition::new("approve", "ship").guarded(Condition::simple(
                Operator::Equals,
                Operand::var("decision"),
                Some(Operand::literal("approved")),
            )),
            Transition::new("approve", "hold"),
        ];
        let wf = workflow(
            vec![
                approve_step,
                step("ship", action("ok", Value::Null), &[]),
                step("hold", action("ok", Value::Null), &[]),
            ],
            &["ship", "hold"],
        );
        let engine = engine();

        let execution = run(&engine, &wf).await;

        assert_eq!(execution.step_executions.last().unwrap().step_id, "ship");
        assert_eq!(execution.context.variables["decision"], json!("approved"));
        assert_eq!(
            engine
                .state_tracker()
                .get_variable(execution.id, "decision")
                .unwrap(),
            Some(json!("approved"))
        );
    }

    #[tokio::test]
    async fn no_next_step_at_non_end_step_fails() {
        let wf = workflow(
            vec![
                step("a", action("ok", Value::Null), &[]),
                step("b", action("ok", Value::Null), &[]),
            ],
            &["b"],
        );

        let execution = run(&engine(), &wf).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        let error = execution.error.unwrap();
        assert_eq!(error.code, ErrorCode::NoNextStep);
        assert_eq!(error.step_id.as_deref(), Some("a"));
        assert!(!error.recoverable);
    }

    #[tokio::test]
    async fn parallel_step_runs_inside_the_engine() {
        let parallel = StepPayload::Parallel(ParallelConfig {
            branches: vec![
                vec![step("left", action("ok", json!("L")), &[])],
                vec![step("right", action("fail", Value::Null), &[])],
            ],
            policy: ParallelPolicy::Threshold { threshold: 0.5 },
        });
        let wf = workflow(vec![step("fan-out", parallel, &[])], &["fan-out"]);

        let execution = run(&engine(), &wf).await;

        assert_eq!(execution.status, ExecutionStatus::Success);
        let output = execution.step_executions[0].output.clone().unwrap();
        assert_eq!(output[0]["results"], json!(["L"]));
        assert_eq!(output[1]["success"], false);
    }

    // -------------------------------------------------------------------
    // Refusals
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn dangling_transition_refuses_to_start() {
        let wf = workflow(vec![step("a", action("ok", Value::Null), &["ghost"])], &["a"]);
        let engine = engine();

        let err = engine
            .execute(&wf, ContextOverrides::default(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutorError::InvalidDefinition(ref errors) if !errors.is_empty()));
        assert!(engine.list_executions().is_empty());
    }

    #[tokio::test]
    async fn required_variables_must_be_bound() {
        let mut wf = workflow(vec![step("a", action("ok", Value::Null), &[])], &["a"]);
        wf.variables = vec![Variable {
            name: "order_id".to_string(),
            var_type: VariableType::String,
            default: None,
            required: true,
        }];
        let engine = engine();

        let err = engine
            .execute(&wf, ContextOverrides::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::MissingVariable(ref name) if name == "order_id"));

        let err = engine
            .execute(&wf, ContextOverrides::default().with_variable("order_id", json!(5)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidVariable { .. }));

        let ok = engine
            .execute(&wf, ContextOverrides::default().with_variable("order_id", json!("A-1")), None)
            .await
            .unwrap();
        assert_eq!(ok.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn overrides_layer_over_declared_defaults() {
        let mut wf = workflow(vec![step("a", action("ok", Value::Null), &[])], &["a"]);
        wf.variables = vec![
            Variable {
                name: "region".to_string(),
                var_type: VariableType::String,
                default: Some(json!("eu")),
                required: false,
            },
            Variable {
                name: "limit".to_string(),
                var_type: VariableType::Number,
                default: Some(json!(10)),
                required: false,
            },
        ];
        let overrides = ContextOverrides {
            tenant_id: Some("acme".to_string()),
            ..ContextOverrides::default().with_variable("limit", json!(50))
        };

        let execution = engine().execute(&wf, overrides, Some("api")).await.unwrap();

        assert_eq!(execution.context.variables["region"], json!("eu"));
        assert_eq!(execution.context.variables["limit"], json!(50));
        assert_eq!(execution.context.tenant_id.as_deref(), Some("acme"));
        assert_eq!(execution.context.triggered_by.as_deref(), Some("api"));
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_observed_before_the_next_step() {
        let engine = Arc::new(engine());
        let wf = workflow(
            vec![
                step("long", action("sleep", json!({ "ms": 1_000 })), &["after"]),
                step("after", action("ok", Value::Null), &[]),
            ],
            &["after"],
        );
        let id = engine.prepare(&wf, ContextOverrides::default(), None).unwrap();

        let handle = {
            let engine = Arc::clone(&engine);
            let wf = wf.clone();
            tokio::spawn(async move { engine.run(id, &wf).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.cancel_execution(id).unwrap();
        assert_eq!(engine.get_execution(id).unwrap().status, ExecutionStatus::Cancelled);

        let execution = handle.await.unwrap().unwrap();

        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert!(execution.completed_at.is_some());
        // The in-flight step finished; nothing ran after it.
        let ids: Vec<&str> = execution.step_executions.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(ids, vec!["long"]);
        assert_eq!(execution.step_executions[0].status, StepStatus::Success);

        assert!(matches!(
            engine.cancel_execution(id),
            Err(ExecutorError::InvalidStatus { status: ExecutionStatus::Cancelled, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_during_backoff_skips_the_retry() {
        let engine = Arc::new(engine());
        let mut failing = Action::new("fail", Value::Null);
        failing.retry = Some(RetryPolicy {
            initial_delay_ms: 5_000,
            ..retry_policy()
        });
        let wf = workflow(vec![step("charge", StepPayload::Action(failing), &[])], &["charge"]);
        let id = engine.prepare(&wf, ContextOverrides::default(), None).unwrap();

        let handle = {
            let engine = Arc::clone(&engine);
            let wf = wf.clone();
            tokio::spawn(async move { engine.run(id, &wf).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.cancel_execution(id).unwrap();
        let execution = handle.await.unwrap().unwrap();

        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        let statuses: Vec<StepStatus> = execution.step_executions.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![StepStatus::Failed, StepStatus::Skipped]);
        assert_eq!(execution.metrics.skipped_steps, 1);
        assert_eq!(execution.metrics.retry_count, 0);
    }

    #[tokio::test]
    async fn cancelled_before_run_never_starts() {
        let engine = engine();
        let wf = linear(&["a"], || action("ok", Value::Null));
        let id = engine.prepare(&wf, ContextOverrides::default(), None).unwrap();

        engine.cancel_execution(id).unwrap();
        let execution = engine.run(id, &wf).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert!(execution.step_executions.is_empty());
        assert!(engine.state_tracker().get_state(id).is_none());
    }

    #[tokio::test]
    async fn finished_runs_cannot_restart_or_cancel() {
        let engine = engine();
        let wf = linear(&["a"], || action("ok", Value::Null));
        let execution = run(&engine, &wf).await;

        assert!(matches!(
            engine.run(execution.id, &wf).await,
            Err(ExecutorError::InvalidStatus { status: ExecutionStatus::Success, .. })
        ));
        assert!(engine.cancel_execution(execution.id).is_err());
        assert!(matches!(
            engine.cancel_execution(Uuid::now_v7()),
            Err(ExecutorError::ExecutionNotFound(_))
        ));
    }

    /// Put a prepared execution into `Running` the way `run` does, without
    /// driving any steps.
    fn start(engine: &Engine, wf: &Workflow) -> Execution {
        let id = engine.prepare(wf, ContextOverrides::default(), None).unwrap();
        let mut execution = engine.get_execution(id).unwrap();
        execution.transition(ExecutionStatus::Running);
        execution.started_at = Some(Utc::now());
        engine.state.create(id, &wf.start_step_id, &execution.context);
        engine.sync(&execution);
        execution
    }

    #[tokio::test]
    async fn cancellation_after_the_last_step_is_kept_at_finish() {
        let engine = engine();
        let mut rx = engine.event_bus().subscribe();
        let wf = linear(&["a"], || action("ok", Value::Null));
        let mut execution = start(&engine, &wf);
        let id = execution.id;

        engine.cancel_execution(id).unwrap();
        let stamped = engine.get_execution(id).unwrap().completed_at;
        assert!(stamped.is_some());
        engine.finish(&wf, &mut execution, Ok(RunOutcome::Completed));

        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert_eq!(execution.completed_at, stamped);
        let registered = engine.get_execution(id).unwrap();
        assert_eq!(registered.status, ExecutionStatus::Cancelled);
        assert_eq!(registered.completed_at, stamped);
        assert_eq!(
            engine.state_tracker().get_state(id).unwrap().status,
            ExecutionStatus::Cancelled
        );
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, EngineEvent::ExecutionCancelled { .. })));
        assert!(!events.iter().any(|e| matches!(
            e,
            EngineEvent::ExecutionCompleted { .. } | EngineEvent::ExecutionFailed { .. }
        )));
    }

    #[tokio::test]
    async fn cancellation_during_a_failed_run_is_kept_at_finish() {
        let engine = engine();
        let wf = linear(&["a"], || action("ok", Value::Null));
        let mut execution = start(&engine, &wf);

        engine.cancel_execution(execution.id).unwrap();
        engine.finish(&wf, &mut execution, Err(ExecutorError::NoNextStep("a".to_string())));

        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert!(execution.error.is_none());
        assert_eq!(
            engine.get_execution(execution.id).unwrap().status,
            ExecutionStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn wait_step_resuming_does_not_undo_cancellation() {
        let engine = engine();
        let wf = linear(&["pause"], || action("ok", Value::Null));
        let mut execution = start(&engine, &wf);
        let id = execution.id;

        engine.set_status(&mut execution, ExecutionStatus::Waiting).unwrap();
        assert_eq!(engine.get_execution(id).unwrap().status, ExecutionStatus::Waiting);
        engine.cancel_execution(id).unwrap();
        engine.set_status(&mut execution, ExecutionStatus::Running).unwrap();

        assert_eq!(
            engine.state_tracker().get_state(id).unwrap().status,
            ExecutionStatus::Cancelled
        );
        assert_eq!(engine.get_execution(id).unwrap().status, ExecutionStatus::Cancelled);

        engine.finish(&wf, &mut execution, Ok(RunOutcome::Completed));
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert_eq!(
            engine.state_tracker().get_state(id).unwrap().status,
            ExecutionStatus::Cancelled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn workflow_timeout_fails_with_timeout_code() {
        let mut wf = linear(&["slow"], || action("sleep", json!({ "ms": 60_000 })));
        wf.settings.timeout_ms = Some(1_000);

        let execution = run(&engine(), &wf).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.unwrap().code, ErrorCode::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn step_timeout_is_a_retryable_step_failure() {
        let mut wf = linear(&["slow"], || action("sleep", json!({ "ms": 60_000 })));
        wf.steps[0].timeout_ms = Some(50);

        let execution = run(&engine(), &wf).await;

        let error = execution.error.unwrap();
        assert_eq!(error.code, ErrorCode::StepFailed);
        assert!(error.message.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_step_reports_waiting_status() {
        let engine = Arc::new(engine());
        let wf = linear(&["pause"], || {
            StepPayload::Wait(WaitConfig::Duration { duration_ms: 1_000 })
        });
        let id = engine.prepare(&wf, ContextOverrides::default(), None).unwrap();

        let handle = {
            let engine = Arc::clone(&engine);
            let wf = wf.clone();
            tokio::spawn(async move { engine.run(id, &wf).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.get_execution(id).unwrap().status, ExecutionStatus::Waiting);

        let execution = handle.await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn event_wait_fails_as_not_implemented() {
        let wf = linear(&["hook"], || {
            StepPayload::Wait(WaitConfig::Event {
                event: "invoice.paid".to_string(),
            })
        });

        let execution = run(&engine(), &wf).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error.unwrap().message.contains("not implemented"));
    }

    #[tokio::test]
    async fn transitions_are_checkpointed() {
        let engine = engine();
        let wf = linear(&["a", "b", "c"], || action("ok", Value::Null));

        let execution = run(&engine, &wf).await;

        let state = engine.state_tracker().get_state(execution.id).unwrap();
        let checkpointed: Vec<&str> = state.checkpoints.iter().map(|c| c.step_id.as_str()).collect();
        assert_eq!(checkpointed, vec!["b", "c"]);
        assert_eq!(state.status, ExecutionStatus::Success);
        assert!(state.current_step_id.is_none());
        assert_eq!(state.visited.len(), 3);
    }

    #[tokio::test]
    async fn registry_lists_executions_in_creation_order() {
        let engine = engine();
        let wf = linear(&["a"], || action("ok", Value::Null));
        let first = run(&engine, &wf).await;
        let second = run(&engine, &wf).await;

        let listed: Vec<Uuid> = engine.list_executions().iter().map(|e| e.id).collect();
        assert_eq!(listed, vec![first.id, second.id]);
        assert_eq!(
            engine.get_execution(first.id).unwrap().status,
            ExecutionStatus::Success
        );
    }

    #[tokio::test]
    async fn cleanup_purges_finished_runs() {
        let engine = ExecutionEngine::new(
            BoxActionExecutor::new(Scripted::default()),
            Arc::new(InMemoryWorkflowRepository::new()),
            EventBus::default(),
            EngineConfig {
                state_retention_secs: 0,
                ..EngineConfig::default()
            },
        );
        let wf = linear(&["a"], || action("ok", Value::Null));
        let execution = run(&engine, &wf).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(engine.cleanup(), 1);
        assert!(engine.state_tracker().get_state(execution.id).is_none());
        assert!(engine.get_execution(execution.id).is_none());
    }

    #[tokio::test]
    async fn cleanup_purges_executions_that_never_ran() {
        let engine = ExecutionEngine::new(
            BoxActionExecutor::new(Scripted::default()),
            Arc::new(InMemoryWorkflowRepository::new()),
            EventBus::default(),
            EngineConfig {
                state_retention_secs: 0,
                ..EngineConfig::default()
            },
        );
        let wf = linear(&["a"], || action("ok", Value::Null));
        let pending = engine.prepare(&wf, ContextOverrides::default(), None).unwrap();
        let cancelled = engine.prepare(&wf, ContextOverrides::default(), None).unwrap();
        engine.cancel_execution(cancelled).unwrap();
        assert_eq!(engine.cancellation_tokens.len(), 2);
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Neither ever had run state.
        assert_eq!(engine.cleanup(), 0);
        assert!(engine.get_execution(pending).is_none());
        assert!(engine.get_execution(cancelled).is_none());
        assert!(engine.cancellation_tokens.is_empty());
        assert!(matches!(
            engine.run(pending, &wf).await,
            Err(ExecutorError::ExecutionNotFound(_))
        ));
    }

    // -------------------------------------------------------------------
    // ExecutorError
    // -------------------------------------------------------------------

    #[test]
    fn executor_error_record_carries_chain() {
        let err = ExecutorError::StepFailed {
            step_id: "charge".to_string(),
            source: StepError::Action(ActionError::Failed("card declined".to_string())),
        };
        let record = err.to_execution_error();
        assert_eq!(record.code, ErrorCode::StepFailed);
        assert_eq!(record.message, "step 'charge' failed: action failed: card declined");
        assert_eq!(
            record.trace.as_deref(),
            Some("step 'charge' failed\ncaused by: action failed: card declined")
        );

        let record = ExecutorError::StepNotFound("ghost".to_string()).to_execution_error();
        assert_eq!(record.code, ErrorCode::StepNotFound);
        assert_eq!(record.step_id.as_deref(), Some("ghost"));
        assert!(!record.recoverable);
    }
}
