//! Stage configuration parser
//!
//! Parses `stage.toml` into the settings a staging run needs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::cycle::parse_cycle;
use crate::stage::request::StagingRequest;

/// Public bucket holding the replay analyses.
pub const DEFAULT_BUCKET_URL: &str = "s3://noaa-ufs-gefsv13replay-pds";

/// Switches for the optional retrieval steps
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StageFlags {
    /// Extract the cycle's tape archive into the working directory
    #[serde(default)]
    pub download_archive: bool,
    /// The run repairs/replays a previous analysis
    #[serde(default)]
    pub repair_replay: bool,
    /// Download the replay analysis products (only with `repair_replay`)
    #[serde(default)]
    pub download_analysis: bool,
}

impl StageFlags {
    /// Whether the replay analysis download should run.
    #[must_use]
    pub const fn wants_analysis(&self) -> bool {
        self.repair_replay && self.download_analysis
    }
}

/// Remote locations retrieval targets are built from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SourceLocations {
    /// Directory on the tape archive holding `<YYYYMMDDHH>.tar` files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_base: Option<String>,
    /// Object-storage bucket URL for the replay analyses
    #[serde(default = "default_bucket_url")]
    pub bucket_url: String,
}

impl Default for SourceLocations {
    fn default() -> Self {
        Self {
            archive_base: None,
            bucket_url: default_bucket_url(),
        }
    }
}

fn default_bucket_url() -> String {
    DEFAULT_BUCKET_URL.to_string()
}

/// A retrieval step, as named in `[retrieval] best_effort`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalKind {
    /// Tape archive extraction
    Archive,
    /// Replay analysis download
    Analysis,
}

impl RetrievalKind {
    /// Name used in configuration and diagnostics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::Analysis => "analysis",
        }
    }
}

/// How retrieval failures are treated
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetrievalPolicy {
    /// Steps whose failure is reported but does not stop the run
    #[serde(default)]
    pub best_effort: BTreeSet<RetrievalKind>,
}

/// Sync executor settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncSettings {
    /// Entries synchronized in parallel within one group (default: 1)
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

const fn default_workers() -> usize {
    1
}

/// A caller-supplied template variable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum VarValue {
    /// `true` / `false`
    Bool(bool),
    /// Integers render as their decimal text
    Integer(i64),
    /// Plain text
    Text(String),
    /// List of strings, iterable with `{% for %}`
    List(Vec<String>),
}

/// Top-level configuration parsed from stage.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Cycle to stage (`YYYYMMDDHH` or RFC 3339); `--cycle` overrides it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<String>,
    /// Root of all destination paths; must already exist
    pub destination_root: PathBuf,
    /// Manifest template to render
    pub manifest_template: PathBuf,
    /// Where retrieval steps drop their files (default: ".")
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Check the destination root before running retrieval (default: false)
    #[serde(default)]
    pub validate_before_retrieval: bool,
    /// Retrieval switches
    #[serde(default)]
    pub flags: StageFlags,
    /// Remote locations
    #[serde(default)]
    pub sources: SourceLocations,
    /// Retrieval failure policy
    #[serde(default)]
    pub retrieval: RetrievalPolicy,
    /// Sync settings
    #[serde(default)]
    pub sync: SyncSettings,
    /// Extra variables available to the manifest template
    #[serde(default)]
    pub vars: BTreeMap<String, VarValue>,
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

impl StageConfig {
    /// Parse a stage.toml file from a path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse stage.toml content from a string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse stage.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Pick the cycle to stage: the override if given, otherwise `cycle`.
    pub fn resolve_cycle(&self, cycle_override: Option<&str>) -> Result<DateTime<Utc>> {
        let Some(text) = cycle_override.or(self.cycle.as_deref()) else {
            bail!("No cycle given: pass --cycle or set 'cycle' in stage.toml");
        };
        parse_cycle(text)
    }

    /// Build the request for one staging run.
    #[must_use]
    pub fn into_request(self, cycle: DateTime<Utc>) -> StagingRequest {
        StagingRequest {
            cycle,
            flags: self.flags,
            destination_root: self.destination_root,
            sources: self.sources,
            manifest_template: self.manifest_template,
            working_dir: self.working_dir,
            vars: self.vars,
            best_effort: self.retrieval.best_effort,
            sync_workers: self.sync.workers,
            validate_before_retrieval: self.validate_before_retrieval,
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.destination_root.as_os_str().is_empty() {
            bail!("'destination_root' cannot be empty");
        }

        if self.manifest_template.as_os_str().is_empty() {
            bail!("'manifest_template' cannot be empty");
        }

        if self.flags.download_archive
            && self
                .sources
                .archive_base
                .as_deref()
                .map_or(true, |base| base.trim().is_empty())
        {
            bail!("'flags.download_archive' is set but 'sources.archive_base' is missing");
        }

        if self.flags.wants_analysis() && self.sources.bucket_url.trim().is_empty() {
            bail!("'flags.download_analysis' is set but 'sources.bucket_url' is empty");
        }

        if self.sync.workers == 0 {
            bail!("'sync.workers' must be at least 1");
        }

        for name in self.vars.keys() {
            validate_var_name(name)?;
        }

        Ok(())
    }
}

/// Template variables must be plain identifiers: an ASCII letter or `_`
/// followed by ASCII alphanumerics or `_`.
fn validate_var_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("Invalid variable name '{name}' in [vars]: must be an identifier");
    }
    Ok(())
}
