//! Manifest synchronization
//!
//! Applies resolved manifest groups to the filesystem. Groups run strictly in
//! declaration order. Within a group, entries run one at a time by default or
//! on a bounded pool of blocking workers, and the whole group finishes before
//! the next one starts.
//!
//! Copies are idempotent: a destination that is already byte-identical to its
//! source is left alone, and everything else is written to a temporary sibling
//! and renamed into place.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::error::SyncError;
use crate::stage::glob::{expand_glob, is_pattern};
use crate::stage::manifest::{FileOperation, Manifest, ManifestGroup};

/// Tallies for one operation or group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounts {
    /// Files written
    pub copied: usize,
    /// Files already identical at the destination
    pub unchanged: usize,
    /// Directories that did not exist and were created
    pub dirs_created: usize,
}

impl SyncCounts {
    fn add(&mut self, other: Self) {
        self.copied += other.copied;
        self.unchanged += other.unchanged;
        self.dirs_created += other.dirs_created;
    }
}

/// An optional entry that failed and was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOperation {
    /// The entry
    pub operation: FileOperation,
    /// Why it failed
    pub reason: String,
}

/// Result of synchronizing one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupReport {
    /// Group name
    pub name: String,
    /// File and directory tallies
    pub counts: SyncCounts,
    /// Optional entries that failed
    pub skipped: Vec<SkippedOperation>,
}

/// Result of synchronizing a whole manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Per-group reports, in execution order
    pub groups: Vec<GroupReport>,
}

impl SyncReport {
    /// Tallies summed over all groups.
    #[must_use]
    pub fn totals(&self) -> SyncCounts {
        let mut totals = SyncCounts::default();
        for group in &self.groups {
            totals.add(group.counts);
        }
        totals
    }

    /// Number of skipped optional entries across all groups.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.groups.iter().map(|g| g.skipped.len()).sum()
    }
}

/// Runs manifest groups against the filesystem.
#[derive(Debug, Clone, Copy)]
pub struct SyncExecutor {
    workers: usize,
}

impl Default for SyncExecutor {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SyncExecutor {
    /// Executor running up to `workers` entries of a group at once (minimum 1).
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Configured parallelism.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Synchronize every group in order, stopping at the first fatal failure.
    pub async fn sync_manifest(&self, manifest: &Manifest) -> Result<SyncReport, SyncError> {
        self.sync_manifest_with(manifest, |_| {}).await
    }

    /// Like [`sync_manifest`](Self::sync_manifest), calling `on_group` as
    /// each group finishes.
    pub async fn sync_manifest_with<F>(
        &self,
        manifest: &Manifest,
        mut on_group: F,
    ) -> Result<SyncReport, SyncError>
    where
        F: FnMut(&GroupReport),
    {
        let mut report = SyncReport::default();
        for group in &manifest.groups {
            let finished = self.sync_group(group).await?;
            on_group(&finished);
            report.groups.push(finished);
        }
        Ok(report)
    }

    /// Synchronize one group.
    pub async fn sync_group(&self, group: &ManifestGroup) -> Result<GroupReport, SyncError> {
        if self.workers == 1 {
            self.sync_sequential(group).await
        } else {
            self.sync_parallel(group).await
        }
    }

    async fn sync_sequential(&self, group: &ManifestGroup) -> Result<GroupReport, SyncError> {
        let mut report = GroupReport {
            name: group.name.clone(),
            ..GroupReport::default()
        };
        for op in &group.operations {
            let owned = op.clone();
            let result = tokio::task::spawn_blocking(move || sync_operation(&owned))
                .await
                .map_err(|e| SyncError::Worker {
                    group: group.name.clone(),
                    message: e.to_string(),
                })?;
            record(&mut report, op, result)?;
        }
        Ok(report)
    }

    async fn sync_parallel(&self, group: &ManifestGroup) -> Result<GroupReport, SyncError> {
        let worker_err = |message: String| SyncError::Worker {
            group: group.name.clone(),
            message,
        };
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut set = JoinSet::new();

        for (index, op) in group.operations.iter().cloned().enumerate() {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| worker_err(e.to_string()))?;
            set.spawn_blocking(move || {
                let _permit = permit;
                (index, sync_operation(&op))
            });
        }

        let mut results: Vec<Option<Result<SyncCounts, SyncError>>> =
            (0..group.operations.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            let (index, result) = joined.map_err(|e| worker_err(e.to_string()))?;
            results[index] = Some(result);
        }

        let mut report = GroupReport {
            name: group.name.clone(),
            ..GroupReport::default()
        };
        for (op, result) in group.operations.iter().zip(results) {
            let result = result.ok_or_else(|| worker_err(format!("no result for '{op}'")))?;
            record(&mut report, op, result)?;
        }
        Ok(report)
    }
}

/// Fold one entry's result into the group report; fatal for required entries.
fn record(
    report: &mut GroupReport,
    op: &FileOperation,
    result: Result<SyncCounts, SyncError>,
) -> Result<(), SyncError> {
    match result {
        Ok(counts) => {
            report.counts.add(counts);
            Ok(())
        }
        Err(err) if op.is_optional() => {
            report.skipped.push(SkippedOperation {
                operation: op.clone(),
                reason: err.to_string(),
            });
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Apply a single manifest entry.
pub fn sync_operation(op: &FileOperation) -> Result<SyncCounts, SyncError> {
    let mut counts = SyncCounts::default();
    match op {
        FileOperation::Mkdir { path } => ensure_dir(path, &mut counts)?,
        FileOperation::Copy { src, dest, .. } => copy_entry(src, dest, &mut counts)?,
    }
    Ok(counts)
}

fn resolve_sources(src: &str) -> Result<Vec<PathBuf>, SyncError> {
    if is_pattern(src) {
        let matches = expand_glob(src)?;
        if matches.is_empty() {
            return Err(SyncError::NoMatch(src.to_string()));
        }
        Ok(matches)
    } else {
        let path = PathBuf::from(src);
        if !path.exists() {
            return Err(SyncError::MissingSource(path));
        }
        Ok(vec![path])
    }
}

fn copy_entry(src: &str, dest: &str, counts: &mut SyncCounts) -> Result<(), SyncError> {
    let sources = resolve_sources(src)?;
    let dest_path = Path::new(dest);
    let into_dir = dest.ends_with('/') || dest_path.is_dir() || sources.len() > 1;

    if into_dir {
        ensure_dir(dest_path, counts)?;
    }

    for source in &sources {
        let target = if into_dir {
            let name = source
                .file_name()
                .ok_or_else(|| SyncError::MissingSource(source.clone()))?;
            dest_path.join(name)
        } else {
            dest_path.to_path_buf()
        };
        sync_path(source, &target, counts)?;
    }
    Ok(())
}

fn sync_path(source: &Path, target: &Path, counts: &mut SyncCounts) -> Result<(), SyncError> {
    if !source.is_dir() {
        return sync_file(source, target, counts);
    }

    for entry in WalkDir::new(source).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| SyncError::Walk {
            path: source.to_path_buf(),
            source: e,
        })?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let out = target.join(relative);
        if entry.file_type().is_dir() {
            ensure_dir(&out, counts)?;
        } else {
            sync_file(entry.path(), &out, counts)?;
        }
    }
    Ok(())
}

fn ensure_dir(path: &Path, counts: &mut SyncCounts) -> Result<(), SyncError> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| SyncError::io("create directory", path, e))?;
    counts.dirs_created += 1;
    Ok(())
}

fn sync_file(source: &Path, target: &Path, counts: &mut SyncCounts) -> Result<(), SyncError> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent, counts)?;
    }

    if files_identical(source, target)? {
        counts.unchanged += 1;
        return Ok(());
    }

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = target.with_file_name(format!(".{file_name}.icstage-tmp"));

    if let Err(e) = fs::copy(source, &temp) {
        let _ = fs::remove_file(&temp);
        return Err(SyncError::io("copy", source, e));
    }
    if let Err(e) = fs::rename(&temp, target) {
        let _ = fs::remove_file(&temp);
        return Err(SyncError::io("rename", target, e));
    }
    counts.copied += 1;
    Ok(())
}

/// Byte-for-byte comparison; false when `target` is not a regular file.
fn files_identical(source: &Path, target: &Path) -> Result<bool, SyncError> {
    if !target.is_file() {
        return Ok(false);
    }
    let source_meta = fs::metadata(source).map_err(|e| SyncError::io("stat", source, e))?;
    let target_meta = fs::metadata(target).map_err(|e| SyncError::io("stat", target, e))?;
    if source_meta.len() != target_meta.len() {
        return Ok(false);
    }

    let open = |path: &Path| {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| SyncError::io("open", path, e))
    };
    let mut a = open(source)?;
    let mut b = open(target)?;

    loop {
        let chunk_a = a.fill_buf().map_err(|e| SyncError::io("read", source, e))?;
        let chunk_b = b.fill_buf().map_err(|e| SyncError::io("read", target, e))?;
        if chunk_a.is_empty() && chunk_b.is_empty() {
            return Ok(true);
        }
        let n = chunk_a.len().min(chunk_b.len());
        if n == 0 || chunk_a[..n] != chunk_b[..n] {
            return Ok(false);
        }
        a.consume(n);
        b.consume(n);
    }
}
