//! Execution engine and port trait definitions for stepwise.
//!
//! This crate owns the runtime: condition evaluation, state tracking,
//! transition resolution, parallel branches, retries and the execution
//! loop. It defines the ports (action executor, workflow repository) that
//! callers implement, and depends only on `stepwise-types` for data.

pub mod action;
pub mod config;
pub mod event;
pub mod repository;
pub mod workflow;
