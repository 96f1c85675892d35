//! Background Tasks Module
//!
//! Contains background tasks that run periodically for the lifetime of a
//! cache node.
//!
//! # Tasks
//! - TTL Sweep: Removes expired entries at a fixed interval so idle keys are
//!   reclaimed and their deletion reaches peers

mod sweep;

pub(crate) use sweep::spawn_sweep_task;
