//! Workflow execution: condition evaluation, transition resolution, retry,
//! parallel branches, per-step dispatch, run state and the engine loop.
//!
//! - `condition`: evaluates condition trees against a `Context`
//! - `definition`: loads workflow files (YAML or JSON)
//! - `transition`: picks the next step and checks workflow graphs
//! - `retry`: retry policy and backoff
//! - `parallel`: branch execution policies
//! - `step_runner`: runs one step by kind
//! - `state`: per-execution run state and checkpoints
//! - `executor`: the `ExecutionEngine` run loop

pub mod condition;
pub mod definition;
pub mod executor;
pub mod parallel;
pub mod retry;
pub mod state;
pub mod step_runner;
pub mod transition;
