//! Repository trait definitions.
//!
//! Storage ports implemented by `hlp-infra` (SQLite) and, for tests and dry
//! runs, by the in-memory store in [`memory`].

pub mod checkpoint;
pub mod memory;
