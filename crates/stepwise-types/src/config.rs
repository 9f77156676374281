//! Engine configuration types.
//!
//! `EngineConfig` is deserialized from `stepwise.toml`. Every field has a
//! default, so an empty file yields a usable configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Safety cap for loop steps that do not declare their own.
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u32,

    /// Capacity of the broadcast event bus.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Capture a checkpoint after every transition.
    #[serde(default = "default_true")]
    pub checkpoint_each_step: bool,

    /// Per-attempt timeout for steps without `timeout_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_step_timeout_secs: Option<u64>,

    /// Age after which finished run state is purged by `cleanup`.
    #[serde(default = "default_state_retention_secs")]
    pub state_retention_secs: u64,

    /// Log advisory graph diagnostics (cycles, unreachable steps) before
    /// each run. Dangling transitions are always refused.
    #[serde(default = "default_true")]
    pub validate_before_run: bool,
}

fn default_max_loop_iterations() -> u32 {
    1000
}

fn default_event_bus_capacity() -> usize {
    1024
}

fn default_state_retention_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: default_max_loop_iterations(),
            event_bus_capacity: default_event_bus_capacity(),
            checkpoint_each_step: true,
            default_step_timeout_secs: None,
            state_retention_secs: default_state_retention_secs(),
            validate_before_run: true,
        }
    }
}
