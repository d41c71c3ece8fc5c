//! icstage - Initial-condition staging for forecast cycles
//!
//! Prepares a forecast experiment directory for one cycle: optionally pulls
//! data from a tape archive and a public object-storage bucket, renders a
//! manifest template describing which files go where, and synchronizes those
//! files group by group into the destination root.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

pub mod cli;
pub mod command;
pub mod config;
pub mod doctor;
pub mod error;
pub mod log;
pub mod stage;

// Re-export commonly used types
pub use cli::StageDisplay;
pub use config::{StageConfig, StageFlags};
pub use error::{StageError, StageResult};
pub use log::{JsonlLogger, StageOutcome};
pub use stage::cycle::CycleContext;
pub use stage::executor::{StageReport, Stager};
pub use stage::manifest::{FileOperation, Manifest, ManifestGroup};
pub use stage::request::StagingRequest;
pub use stage::retrieve::{ArchiveClient, AwsS3Client, HtarClient, ObjectStoreClient};
pub use stage::sync::{SyncExecutor, SyncReport};
