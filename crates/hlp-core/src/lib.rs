//! Business logic and repository trait definitions for the HLP executor.
//!
//! This crate defines the "ports" (checkpoint repository, unit worker,
//! compensator, dependency resolver, metrics sink) and the engine that drives
//! them. It depends only on `hlp-types` -- never on `hlp-infra` or any
//! database/IO crate.

pub mod checkpoint;
pub mod circuit_breaker;
pub mod compensator;
pub mod dag;
pub mod definition;
pub mod event;
pub mod executor;
pub mod metrics;
pub mod repository;
pub mod resolver;
pub mod retry;
pub mod rollback;
pub mod state_machine;
pub mod worker;
