//! Staging request
//!
//! The single input to a staging run, built once per invocation from the
//! configuration and the cycle.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::config::{RetrievalKind, SourceLocations, StageFlags, VarValue};

/// Everything one staging run needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingRequest {
    /// Cycle being staged
    pub cycle: DateTime<Utc>,
    /// Retrieval switches
    pub flags: StageFlags,
    /// Root of all destination paths; must exist before resolution
    pub destination_root: PathBuf,
    /// Remote locations for retrieval targets
    pub sources: SourceLocations,
    /// Manifest template to render
    pub manifest_template: PathBuf,
    /// Where retrieval steps drop their files
    pub working_dir: PathBuf,
    /// Extra template variables
    pub vars: BTreeMap<String, VarValue>,
    /// Retrieval steps whose failure is not fatal
    pub best_effort: BTreeSet<RetrievalKind>,
    /// Sync parallelism within a group
    pub sync_workers: usize,
    /// Check the destination root before retrieval instead of after
    pub validate_before_retrieval: bool,
}

impl StagingRequest {
    /// Whether a failure of `kind` should only be reported.
    #[must_use]
    pub fn is_best_effort(&self, kind: RetrievalKind) -> bool {
        self.best_effort.contains(&kind)
    }
}
