//! Shared domain types for the HLP executor.
//!
//! Plans, plan-units, unit lifecycle states, artifacts, checkpoints, retry
//! bookkeeping, rollback reports, executor events and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod artifact;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod failure;
pub mod plan;
pub mod rollback;
pub mod state;
