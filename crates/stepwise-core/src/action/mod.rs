//! Action executor port.
//!
//! - `executor` -- the `ActionExecutor` trait callers implement
//! - `box_executor` -- object-safe wrapper the engine stores
//! - `registry` -- dispatch on `action.type` to registered handlers

pub mod box_executor;
pub mod executor;
pub mod registry;
