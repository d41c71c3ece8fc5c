//! JSONL (JSON Lines) logging for staging history
//!
//! Provides append-only logging of staging outcomes to `.stage/log.jsonl`

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use crate::error::StageError;
use crate::stage::executor::StageReport;

/// Final status of a staging run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage completed
    Success,
    /// A stage failed fatally
    Failed,
}

/// Represents the outcome of a single staging run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageOutcome {
    /// Cycle stamp, `YYYYMMDDHH`
    pub cycle: String,
    /// ISO 8601 timestamp of when the run finished
    pub timestamp: DateTime<Utc>,
    /// Success or failure
    pub status: RunStatus,
    /// Label of the failing stage, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Human-readable summary
    pub message: String,
    /// Number of manifest groups synchronized
    #[serde(default)]
    pub groups: usize,
    /// Files written
    #[serde(default)]
    pub files_copied: usize,
    /// Files already up to date
    #[serde(default)]
    pub files_unchanged: usize,
    /// Optional entries skipped after failing
    #[serde(default)]
    pub optional_skipped: usize,
    /// Duration of the run in seconds
    pub duration_secs: u64,
}

impl StageOutcome {
    /// Outcome of a successful run.
    #[must_use]
    pub fn from_report(report: &StageReport) -> Self {
        let totals = report.sync.totals();
        Self {
            cycle: report.cycle.stamp.clone(),
            timestamp: Utc::now(),
            status: RunStatus::Success,
            stage: None,
            message: format!(
                "Staged {} operation(s) in {} group(s)",
                report.manifest.operation_count(),
                report.manifest.groups.len()
            ),
            groups: report.sync.groups.len(),
            files_copied: totals.copied,
            files_unchanged: totals.unchanged,
            optional_skipped: report.sync.skipped_count(),
            duration_secs: report.duration_secs,
        }
    }

    /// Outcome of a run that failed with `err`.
    #[must_use]
    pub fn from_error(cycle: &str, err: &StageError, duration_secs: u64) -> Self {
        Self {
            cycle: cycle.to_string(),
            timestamp: Utc::now(),
            status: RunStatus::Failed,
            stage: Some(err.stage().to_string()),
            message: err.to_string(),
            groups: 0,
            files_copied: 0,
            files_unchanged: 0,
            optional_skipped: 0,
            duration_secs,
        }
    }
}

/// JSONL logger for staging history
///
/// Provides append-only logging to `.stage/log.jsonl`.
/// Each line is a JSON object representing a single staging outcome.
pub struct JsonlLogger {
    log_path: PathBuf,
}

impl JsonlLogger {
    /// Create a new JSONL logger
    ///
    /// # Arguments
    /// * `log_dir` - Directory where log.jsonl will be stored (typically `.stage`)
    ///
    /// # Errors
    /// Returns an error if the log directory cannot be created
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let log_dir = log_dir.as_ref();

        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

        Ok(Self {
            log_path: log_dir.join("log.jsonl"),
        })
    }

    /// Append a staging outcome to the log
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or written
    pub fn append(&self, outcome: &StageOutcome) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("Failed to open log file: {}", self.log_path.display()))?;

        let json =
            serde_json::to_string(outcome).context("Failed to serialize stage outcome to JSON")?;
        writeln!(file, "{json}").context("Failed to write to log file")?;

        Ok(())
    }

    /// Read all staging outcomes from the log, oldest first
    ///
    /// # Errors
    /// Returns an error if the log cannot be read or a line is not valid JSON
    pub fn read_all(&self) -> Result<Vec<StageOutcome>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_path)
            .with_context(|| format!("Failed to read log file: {}", self.log_path.display()))?;

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(line_num, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("Failed to parse line {} as JSON", line_num + 1))
            })
            .collect()
    }

    /// Get the path to the log file
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}
