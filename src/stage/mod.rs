//! Initial-condition staging pipeline
//!
//! This module contains the core staging logic:
//! - Cycle calendar fields derived from the cycle timestamp
//! - Flag-gated remote retrieval (tape archive, object storage)
//! - Manifest template rendering and parsing
//! - Group-ordered, idempotent file synchronization
//! - The orchestrator tying them together

pub mod cycle;
pub mod executor;
pub mod glob;
pub mod manifest;
pub mod request;
pub mod retrieve;
pub mod sync;
pub mod template;
pub mod validate;
