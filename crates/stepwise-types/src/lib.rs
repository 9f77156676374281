//! Shared domain types for stepwise.
//!
//! Workflow definitions, condition trees, execution records, run state,
//! engine events, configuration and the error types of the external ports.
//!
//! Zero engine logic -- only serde, uuid, chrono, thiserror.

pub mod condition;
pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod state;
pub mod workflow;
