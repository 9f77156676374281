//! Event distribution for execution lifecycle notifications.

pub mod bus;
