//! Concurrent execution of parallel-step branches.
//!
//! Each branch is an ordered step sequence run on its own tokio task against
//! its own copy of the context. Results are always reported in branch index
//! order, whatever order the branches finish in. Branches are never
//! cancelled: losing race branches and branches past a threshold keep
//! running to completion and their results are discarded.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepwise_types::execution::Context;
use stepwise_types::workflow::{ParallelPolicy, Step};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::step_runner::StepError;

// ---------------------------------------------------------------------------
// Branch executor seam
// ---------------------------------------------------------------------------

/// Executes one step inside a branch.
///
/// Object-safe (boxed future) so the runner can share one executor across
/// spawned branch tasks. Variables the step writes go to the branch-local
/// `ctx`.
pub trait BranchStepExecutor: Send + Sync {
    fn execute_branch_step<'a>(
        &'a self,
        step: &'a Step,
        ctx: &'a mut Context,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>>;
}

// ---------------------------------------------------------------------------
// Results and errors
// ---------------------------------------------------------------------------

/// Outcome of one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchResult {
    pub index: usize,
    /// Outputs of the steps that completed, in order.
    pub results: Vec<Value>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BranchResult {
    /// JSON form stored as a parallel step's output.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "index": self.index,
            "results": self.results,
            "success": self.success,
            "error": self.error,
        })
    }

    fn failed(index: usize, results: Vec<Value>, error: impl Into<String>) -> Self {
        Self {
            index,
            results,
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParallelError {
    #[error("{} of {} branches failed (indices {failed:?})", .failed.len(), .results.len())]
    AnyFailed {
        failed: Vec<usize>,
        results: Vec<BranchResult>,
    },

    #[error("{succeeded} of {total} branches succeeded, below threshold {threshold}")]
    BelowThreshold {
        succeeded: usize,
        total: usize,
        threshold: f64,
        results: Vec<BranchResult>,
    },

    #[error("first settled branch {index} failed: {error}")]
    RaceFailed { index: usize, error: String },

    #[error("race requires at least one branch")]
    NoBranches,
}

// ---------------------------------------------------------------------------
// ParallelRunner
// ---------------------------------------------------------------------------

pub struct ParallelRunner {
    executor: Arc<dyn BranchStepExecutor>,
}

impl ParallelRunner {
    pub fn new(executor: Arc<dyn BranchStepExecutor>) -> Self {
        Self { executor }
    }

    /// Run `branches` under `policy`. Every policy reports branch results
    /// in index order; race reports only the winner.
    pub async fn run(
        &self,
        policy: &ParallelPolicy,
        branches: &[Vec<Step>],
        ctx: &Context,
    ) -> Result<Vec<BranchResult>, ParallelError> {
        match policy {
            ParallelPolicy::All => Ok(self.execute_all(branches, ctx).await),
            ParallelPolicy::AllOrNothing => self.all_or_nothing(branches, ctx).await,
            ParallelPolicy::Race => {
                let winner = self.race(branches, ctx).await?;
                if winner.success {
                    Ok(vec![winner])
                } else {
                    Err(ParallelError::RaceFailed {
                        index: winner.index,
                        error: winner.error.unwrap_or_default(),
                    })
                }
            }
            ParallelPolicy::Threshold { threshold } => {
                self.threshold(branches, ctx, *threshold).await
            }
            ParallelPolicy::Bounded { limit } => Ok(self.bounded(branches, ctx, *limit).await),
        }
    }

    /// Run every branch to completion, collecting every result.
    pub async fn execute_all(&self, branches: &[Vec<Step>], ctx: &Context) -> Vec<BranchResult> {
        let handles: Vec<_> = branches
            .iter()
            .enumerate()
            .map(|(index, steps)| self.spawn_branch(index, steps.clone(), ctx.clone(), None))
            .collect();
        collect(handles).await
    }

    /// Run every branch to completion, then fail if any branch failed.
    pub async fn all_or_nothing(
        &self,
        branches: &[Vec<Step>],
        ctx: &Context,
    ) -> Result<Vec<BranchResult>, ParallelError> {
        let results = self.execute_all(branches, ctx).await;
        let failed: Vec<usize> = results.iter().filter(|r| !r.success).map(|r| r.index).collect();
        if failed.is_empty() {
            Ok(results)
        } else {
            Err(ParallelError::AnyFailed { failed, results })
        }
    }

    /// Settle with the first branch to finish, successful or not. The other
    /// branches keep running detached.
    pub async fn race(&self, branches: &[Vec<Step>], ctx: &Context) -> Result<BranchResult, ParallelError> {
        if branches.is_empty() {
            return Err(ParallelError::NoBranches);
        }
        let handles: Vec<_> = branches
            .iter()
            .enumerate()
            .map(|(index, steps)| self.spawn_branch(index, steps.clone(), ctx.clone(), None))
            .collect();

        let (settled, index, losers) = futures_util::future::select_all(handles).await;
        tracing::debug!(winner = index, detached = losers.len(), "race settled");
        // Dropping a JoinHandle detaches the task; it is not aborted.
        drop(losers);
        Ok(settled.unwrap_or_else(|e| BranchResult::failed(index, Vec::new(), join_failure(e))))
    }

    /// Run every branch; succeed when `successes / total >= threshold`.
    pub async fn threshold(
        &self,
        branches: &[Vec<Step>],
        ctx: &Context,
        threshold: f64,
    ) -> Result<Vec<BranchResult>, ParallelError> {
        let results = self.execute_all(branches, ctx).await;
        let total = results.len();
        if total == 0 {
            return Ok(results);
        }
        let succeeded = results.iter().filter(|r| r.success).count();
        if succeeded as f64 / total as f64 >= threshold {
            Ok(results)
        } else {
            Err(ParallelError::BelowThreshold {
                succeeded,
                total,
                threshold,
                results,
            })
        }
    }

    /// Run at most `limit` branches at a time. Branches are admitted in
    /// index order as running ones finish.
    pub async fn bounded(&self, branches: &[Vec<Step>], ctx: &Context, limit: usize) -> Vec<BranchResult> {
        let semaphore = Arc::new(Semaphore::new(limit.max(1)));
        let mut handles = Vec::with_capacity(branches.len());
        for (index, steps) in branches.iter().enumerate() {
            // Waiting here, before spawning, keeps admission FIFO.
            let permit = Arc::clone(&semaphore).acquire_owned().await.ok();
            handles.push(self.spawn_branch(index, steps.clone(), ctx.clone(), permit));
        }
        collect(handles).await
    }

    fn spawn_branch(
        &self,
        index: usize,
        steps: Vec<Step>,
        mut ctx: Context,
        permit: Option<tokio::sync::OwnedSemaphorePermit>,
    ) -> JoinHandle<BranchResult> {
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            let _permit = permit;
            let mut results = Vec::with_capacity(steps.len());
            for step in &steps {
                match executor.execute_branch_step(step, &mut ctx).await {
                    Ok(output) => results.push(output),
                    Err(e) => {
                        tracing::debug!(branch = index, step_id = %step.id, error = %e, "branch failed");
                        return BranchResult::failed(index, results, e.to_string());
                    }
                }
            }
            BranchResult {
                index,
                results,
                success: true,
                error: None,
            }
        })
    }
}

async fn collect(handles: Vec<JoinHandle<BranchResult>>) -> Vec<BranchResult> {
    let mut results = Vec::with_capacity(handles.len());
    for (index, handle) in handles.into_iter().enumerate() {
        let result = handle
            .await
            .unwrap_or_else(|e| BranchResult::failed(index, Vec::new(), join_failure(e)));
        results.push(result);
    }
    results
}

fn join_failure(e: tokio::task::JoinError) -> String {
    if e.is_panic() {
        "branch task panicked".to_string()
    } else {
        format!("branch task aborted: {e}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
