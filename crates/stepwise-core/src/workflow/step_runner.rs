//! Step runner for all six step kinds.
//!
//! `StepRunner` dispatches on the step payload: actions go to the action
//! executor, conditions to the evaluator, parallel steps to the branch
//! runner, loops repeat their body, waits sleep, and sub-workflows resolve
//! through the repository. Variables a step writes land in the `Context`
//! it was given; the engine folds them back into the state tracker.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use stepwise_types::config::EngineConfig;
use stepwise_types::error::{ActionError, RepositoryError};
use stepwise_types::execution::Context;
use stepwise_types::workflow::{LoopConfig, Step, StepPayload, SubworkflowRef, WaitConfig};

use crate::action::box_executor::BoxActionExecutor;
use crate::repository::workflow::WorkflowRepository;

use super::condition::{ConditionEvaluator, EvaluationError};
use super::parallel::{BranchStepExecutor, ParallelError, ParallelRunner};

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors from a single step attempt. All of them are eligible for retry.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Parallel(#[from] ParallelError),

    #[error("not implemented: {feature}")]
    NotImplemented { feature: String },

    #[error("sub-workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("workflow repository error")]
    Repository(#[from] RepositoryError),

    #[error("step timed out after {0:?}")]
    Timeout(Duration),
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

pub struct StepRunner<R> {
    actions: BoxActionExecutor,
    repository: Arc<R>,
    evaluator: ConditionEvaluator,
    max_loop_iterations: u32,
    default_timeout: Option<Duration>,
}

impl<R> Clone for StepRunner<R> {
    fn clone(&self) -> Self {
        Self {
            actions: self.actions.clone(),
            repository: Arc::clone(&self.repository),
            evaluator: self.evaluator.clone(),
            max_loop_iterations: self.max_loop_iterations,
            default_timeout: self.default_timeout,
        }
    }
}

impl<R: WorkflowRepository + 'static> StepRunner<R> {
    pub fn new(
        actions: BoxActionExecutor,
        repository: Arc<R>,
        evaluator: ConditionEvaluator,
        config: &EngineConfig,
    ) -> Self {
        Self {
            actions,
            repository,
            evaluator,
            max_loop_iterations: config.max_loop_iterations,
            default_timeout: config.default_step_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Per-attempt timeout for `step`: its own `timeout_ms`, else the
    /// configured default.
    pub fn timeout_for(&self, step: &Step) -> Option<Duration> {
        step.timeout_ms.map(Duration::from_millis).or(self.default_timeout)
    }

    /// Run one attempt of `step`, bounded by its timeout.
    pub async fn run(&self, step: &Step, ctx: &mut Context) -> Result<Value, StepError> {
        match self.timeout_for(step) {
            Some(limit) => tokio::time::timeout(limit, self.execute_step(step, ctx))
                .await
                .map_err(|_| StepError::Timeout(limit))?,
            None => self.execute_step(step, ctx).await,
        }
    }

    /// Dispatch on the step kind. Boxed because parallel branches and loop
    /// bodies recurse back into it.
    pub fn execute_step<'a>(
        &'a self,
        step: &'a Step,
        ctx: &'a mut Context,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>> {
        Box::pin(async move {
            tracing::debug!(
                execution_id = %ctx.execution_id,
                step_id = %step.id,
                kind = %step.kind(),
                "running step"
            );
            match &step.payload {
                StepPayload::Action(action) => {
                    let output = self.actions.execute(action, ctx).await?;
                    if let Some(name) = &action.output_variable {
                        ctx.variables.insert(name.clone(), output.clone());
                    }
                    Ok(output)
                }
                StepPayload::Condition { condition } => {
                    Ok(Value::Bool(self.evaluator.evaluate(condition, ctx)?))
                }
                StepPayload::Parallel(config) => {
                    let runner = ParallelRunner::new(Arc::new(self.clone()));
                    let results = runner.run(&config.policy, &config.branches, ctx).await?;
                    Ok(Value::Array(results.iter().map(|r| r.to_value()).collect()))
                }
                StepPayload::Loop(config) => self.run_loop(step, config, ctx).await,
                StepPayload::Wait(config) => self.run_wait(config).await,
                StepPayload::Subworkflow(reference) => self.run_subworkflow(reference).await,
            }
        })
    }

    async fn run_loop(&self, step: &Step, config: &LoopConfig, ctx: &mut Context) -> Result<Value, StepError> {
        let cap = config.max_iterations.unwrap_or(self.max_loop_iterations);
        let mut iterations: u32 = 0;
        let mut capped = false;

        loop {
            if let Some(condition) = &config.condition {
                if !self.evaluator.evaluate(condition, ctx)? {
                    break;
                }
            }
            if let Some(condition) = &config.break_condition {
                if self.evaluator.evaluate(condition, ctx)? {
                    break;
                }
            }
            if iterations >= cap {
                capped = true;
                tracing::warn!(
                    execution_id = %ctx.execution_id,
                    step_id = %step.id,
                    cap,
                    "loop hit its iteration cap"
                );
                break;
            }
            if let Some(name) = &config.index_variable {
                ctx.variables.insert(name.clone(), json!(iterations));
            }
            for body_step in &config.body {
                self.run(body_step, ctx).await?;
            }
            iterations += 1;
        }

        Ok(json!({
            "type": "loop",
            "iterations": iterations,
            "completed": !capped,
        }))
    }

    async fn run_wait(&self, config: &WaitConfig) -> Result<Value, StepError> {
        let duration = match config {
            WaitConfig::Duration { duration_ms } => Duration::from_millis(*duration_ms),
            WaitConfig::Timestamp { at } => (*at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
            WaitConfig::Event { event } => {
                return Err(StepError::NotImplemented {
                    feature: format!("waiting for event '{event}'"),
                });
            }
        };
        tokio::time::sleep(duration).await;
        Ok(json!({ "waited_ms": duration.as_millis() as u64 }))
    }

    async fn run_subworkflow(&self, reference: &SubworkflowRef) -> Result<Value, StepError> {
        let found = self
            .repository
            .get_workflow(&reference.workflow_id, reference.version.as_deref())
            .await?;
        match found {
            None => Err(StepError::WorkflowNotFound(reference.workflow_id.clone())),
            Some(workflow) => Err(StepError::NotImplemented {
                feature: format!("sub-workflow execution of '{}' v{}", workflow.id, workflow.version),
            }),
        }
    }
}

impl<R: WorkflowRepository + 'static> BranchStepExecutor for StepRunner<R> {
    fn execute_branch_step<'a>(
        &'a self,
        step: &'a Step,
        ctx: &'a mut Context,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>> {
        Box::pin(self.run(step, ctx))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
