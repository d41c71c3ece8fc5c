//! Filesystem glob expansion
//!
//! Used both by the `glob()` template helper and by manifest entries whose
//! source is a pattern. Results are the paths that exist at call time, sorted.

use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use walkdir::WalkDir;

use crate::error::SyncError;

/// Whether `text` contains glob metacharacters.
#[must_use]
pub fn is_pattern(text: &str) -> bool {
    text.contains(['*', '?', '[', '{'])
}

/// Split a pattern at its first wildcard component.
fn split_pattern(pattern: &str) -> (Vec<&str>, Vec<&str>) {
    let mut components: Vec<&str> = pattern.split('/').collect();
    let first_wild = components
        .iter()
        .position(|c| is_pattern(c))
        .unwrap_or(components.len());
    let remaining = components.split_off(first_wild);
    (components, remaining)
}

/// Split a pattern into the literal directory to walk from and the maximum
/// walk depth (`None` when the pattern contains `**`).
fn walk_root(pattern: &str) -> (PathBuf, Option<usize>, bool) {
    let (literal, remaining) = split_pattern(pattern);
    let depth = if remaining.iter().any(|c| c.contains("**")) {
        None
    } else {
        Some(remaining.len())
    };

    match literal.as_slice() {
        [] => (PathBuf::from("."), depth, true),
        [""] => (PathBuf::from("/"), depth, false),
        _ => (PathBuf::from(literal.join("/")), depth, false),
    }
}

/// Hidden names (leading `.`) below the walk root only match a pattern
/// component that itself starts with `.`. The final name is checked against
/// the final pattern component so `**/.*` still reaches hidden files.
fn hidden_allowed(relative: &Path, wild: &[&str]) -> bool {
    let last = relative.components().count().saturating_sub(1);
    relative.components().enumerate().all(|(i, component)| {
        let pattern = if i == last { wild.last() } else { wild.get(i) };
        !component.as_os_str().to_string_lossy().starts_with('.')
            || pattern.is_some_and(|p| p.starts_with('.'))
    })
}

/// Expand `pattern` against the filesystem.
///
/// A pattern without metacharacters yields itself if it exists and nothing
/// otherwise. Wildcards skip hidden files and directories. Entries that
/// cannot be read while walking are skipped.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>, SyncError> {
    if !is_pattern(pattern) {
        let path = PathBuf::from(pattern);
        return Ok(if path.exists() { vec![path] } else { Vec::new() });
    }

    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|source| SyncError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?
        .compile_matcher();

    let (base, depth, implicit_base) = walk_root(pattern);
    let (_, wild) = split_pattern(pattern);
    if !base.is_dir() {
        return Ok(Vec::new());
    }

    let mut walker = WalkDir::new(&base).min_depth(1).follow_links(true);
    if let Some(depth) = depth {
        walker = walker.max_depth(depth);
    }

    let mut matches: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            let relative = path.strip_prefix(&base).unwrap_or(path);
            if !hidden_allowed(relative, &wild) {
                return None;
            }
            let candidate = if implicit_base {
                path.strip_prefix(".").unwrap_or(path)
            } else {
                path
            };
            matcher.is_match(candidate).then(|| candidate.to_path_buf())
        })
        .collect();

    matches.sort();
    Ok(matches)
}

/// Expand `pattern` into display strings, for the template helper.
pub fn expand_glob_strings(pattern: &str) -> Result<Vec<String>, SyncError> {
    Ok(expand_glob(pattern)?
        .iter()
        .map(|p| path_string(p))
        .collect())
}

pub(crate) fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
