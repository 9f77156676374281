//! Per-execution run state: current step, visited set, working variables,
//! transition history and checkpoints.
//!
//! States live in a `DashMap` keyed by execution id so concurrently running
//! executions never contend on a single lock. Step execution mutates
//! workflow variables only through this tracker.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use stepwise_types::execution::{Context, ExecutionStatus};
use stepwise_types::state::{Checkpoint, State, TransitionRecord};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StateError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("no state for execution {0}")]
    NotFound(Uuid),

    #[error("checkpoint {checkpoint_id} not found for execution {execution_id}")]
    CheckpointNotFound {
        execution_id: Uuid,
        checkpoint_id: Uuid,
    },

    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// StateTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct StateTracker {
    states: DashMap<Uuid, State>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the initial `Running` state at `start_step_id`, seeding the
    /// working variables with a copy of `ctx.variables`. Replaces any state
    /// already stored under `execution_id`.
    pub fn create(&self, execution_id: Uuid, start_step_id: &str, ctx: &Context) -> State {
        let state = State {
            execution_id,
            current_step_id: Some(start_step_id.to_string()),
            visited: HashSet::new(),
            variables: ctx.variables.clone(),
            history: Vec::new(),
            checkpoints: Vec::new(),
            status: ExecutionStatus::Running,
            created_at: Utc::now(),
        };
        self.states.insert(execution_id, state.clone());
        tracing::debug!(execution_id = %execution_id, start_step_id, "created run state");
        state
    }

    /// Move to `next_step_id`, marking the current step visited and
    /// appending a history entry. `None` leaves the run without a current
    /// step.
    pub fn transition_to(
        &self,
        execution_id: Uuid,
        next_step_id: Option<String>,
        reason: Option<String>,
    ) -> Result<(), StateError> {
        let mut state = self
            .states
            .get_mut(&execution_id)
            .ok_or(StateError::NotFound(execution_id))?;

        let from = state.current_step_id.take();
        if let Some(prior) = &from {
            state.visited.insert(prior.clone());
        }
        tracing::debug!(
            execution_id = %execution_id,
            from = from.as_deref().unwrap_or("-"),
            to = next_step_id.as_deref().unwrap_or("-"),
            "state transition"
        );
        state.history.push(TransitionRecord {
            from,
            to: next_step_id.clone(),
            timestamp: Utc::now(),
            reason,
        });
        state.current_step_id = next_step_id;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    pub fn get_variable(&self, execution_id: Uuid, name: &str) -> Result<Option<Value>, StateError> {
        let state = self.get_ref(execution_id)?;
        Ok(state.variables.get(name).cloned())
    }

    pub fn set_variable(
        &self,
        execution_id: Uuid,
        name: impl Into<String>,
        value: Value,
    ) -> Result<(), StateError> {
        let mut state = self
            .states
            .get_mut(&execution_id)
            .ok_or(StateError::NotFound(execution_id))?;
        state.variables.insert(name.into(), value);
        Ok(())
    }

    pub fn get_all_variables(&self, execution_id: Uuid) -> Result<HashMap<String, Value>, StateError> {
        Ok(self.get_ref(execution_id)?.variables.clone())
    }

    /// Merge `variables` into the working bindings, overwriting existing
    /// names.
    pub fn bulk_set_variables(
        &self,
        execution_id: Uuid,
        variables: HashMap<String, Value>,
    ) -> Result<(), StateError> {
        let mut state = self
            .states
            .get_mut(&execution_id)
            .ok_or(StateError::NotFound(execution_id))?;
        state.variables.extend(variables);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    /// Snapshot the working variables. The snapshot is a deep copy; later
    /// changes to live state never reach it.
    pub fn create_checkpoint(
        &self,
        execution_id: Uuid,
        step_id: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Checkpoint, StateError> {
        let mut state = self
            .states
            .get_mut(&execution_id)
            .ok_or(StateError::NotFound(execution_id))?;
        let checkpoint = Checkpoint {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            step_id: step_id.to_string(),
            variables: state.variables.clone(),
            metadata,
        };
        state.checkpoints.push(checkpoint.clone());
        tracing::debug!(
            execution_id = %execution_id,
            step_id,
            checkpoint_id = %checkpoint.id,
            "created checkpoint"
        );
        Ok(checkpoint)
    }

    /// Reset the current step and variables to a checkpoint. History is
    /// left untouched.
    pub fn restore_checkpoint(&self, execution_id: Uuid, checkpoint_id: Uuid) -> Result<(), StateError> {
        let mut state = self
            .states
            .get_mut(&execution_id)
            .ok_or(StateError::NotFound(execution_id))?;
        let (step_id, variables) = state
            .checkpoint(checkpoint_id)
            .map(|c| (c.step_id.clone(), c.variables.clone()))
            .ok_or(StateError::CheckpointNotFound {
                execution_id,
                checkpoint_id,
            })?;
        state.current_step_id = Some(step_id);
        state.variables = variables;
        tracing::debug!(
            execution_id = %execution_id,
            checkpoint_id = %checkpoint_id,
            "restored checkpoint"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Persistence seam
    // -----------------------------------------------------------------------

    /// Serialize the full state, checkpoints included.
    pub fn export_state(&self, execution_id: Uuid) -> Result<Value, StateError> {
        let state = self.get_ref(execution_id)?;
        Ok(serde_json::to_value(&*state)?)
    }

    /// Load a previously exported state, replacing any live one with the
    /// same execution id.
    pub fn import_state(&self, exported: Value) -> Result<Uuid, StateError> {
        let state: State = serde_json::from_value(exported)?;
        let execution_id = state.execution_id;
        self.states.insert(execution_id, state);
        Ok(execution_id)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn update_status(&self, execution_id: Uuid, status: ExecutionStatus) -> Result<(), StateError> {
        let mut state = self
            .states
            .get_mut(&execution_id)
            .ok_or(StateError::NotFound(execution_id))?;
        state.status = status;
        Ok(())
    }

    /// Purge states idle for longer than `max_age`. Live runs (`Running` or
    /// `Waiting`) are never purged. Returns the number removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        let cutoff = Utc::now().checked_sub_signed(max_age);
        let before = self.states.len();
        self.states.retain(|_, state| {
            let live = matches!(state.status, ExecutionStatus::Running | ExecutionStatus::Waiting);
            let expired = cutoff.is_some_and(|cutoff| state.last_activity() < cutoff);
            live || !expired
        });
        let removed = before.saturating_sub(self.states.len());
        if removed > 0 {
            tracing::info!(removed, "purged idle run states");
        }
        removed
    }

    /// Owned copy of the state.
    pub fn get_state(&self, execution_id: Uuid) -> Option<State> {
        self.states.get(&execution_id).map(|s| s.clone())
    }

    pub fn current_step(&self, execution_id: Uuid) -> Option<String> {
        self.states
            .get(&execution_id)
            .and_then(|s| s.current_step_id.clone())
    }

    pub fn remove(&self, execution_id: Uuid) -> Option<State> {
        self.states.remove(&execution_id).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn get_ref(
        &self,
        execution_id: Uuid,
    ) -> Result<dashmap::mapref::one::Ref<'_, Uuid, State>, StateError> {
        self.states
            .get(&execution_id)
            .ok_or(StateError::NotFound(execution_id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
