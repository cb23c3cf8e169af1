//! Infrastructure layer for the HLP executor.
//!
//! Contains implementations of the repository traits defined in `hlp-core`:
//! SQLite checkpoint storage with compressed, checksummed payloads, and the
//! `config.toml` loader.

pub mod codec;
pub mod config;
pub mod sqlite;
