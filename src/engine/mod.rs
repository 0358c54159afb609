//! Core engine: the sequential sign-in run and its report.

pub mod pacing;
pub mod report;
pub mod runner;

pub use pacing::Pacing;
pub use report::Report;
pub use runner::{Orchestrator, RunSummary};
