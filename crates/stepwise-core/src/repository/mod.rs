//! Repository trait definitions (ports).
//!
//! Storage of workflow definitions is an external concern; sub-workflow
//! steps resolve their target through this interface.

pub mod memory;
pub mod workflow;
