//! Daily multi-platform check-in runner.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod signers;
pub mod storage;
pub mod notify;
pub mod engine;
