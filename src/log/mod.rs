//! Run history
//!
//! Append-only JSONL record of staging outcomes.

pub mod jsonl;

pub use jsonl::{JsonlLogger, RunStatus, StageOutcome};
