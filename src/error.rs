//! Error taxonomy for the staging pipeline
//!
//! Every failure in the core pipeline is fatal and falls into one of four
//! categories. Each category names the resource that failed (path, URL or
//! variable) so the final diagnostic is actionable on its own.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for the staging pipeline.
pub type StageResult<T> = Result<T, StageError>;

/// A fatal staging failure, tagged with the pipeline stage it came from.
#[derive(Debug, Error)]
pub enum StageError {
    /// Destination root or manifest template problems.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The manifest template could not be rendered.
    #[error("failed to render manifest template {}: {source}", template.display())]
    Render {
        /// Template that failed to render.
        template: PathBuf,
        /// Underlying render failure.
        #[source]
        source: RenderError,
    },
    /// A retrieval step failed.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    /// A manifest entry failed to synchronize.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl StageError {
    /// Short label of the stage that failed, used in diagnostics and logs.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Render { .. } => "render",
            Self::Retrieval(_) => "retrieval",
            Self::Sync(_) => "sync",
        }
    }
}

/// Destination root and manifest document failures.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The destination root is absent or not a directory.
    #[error("FATAL ERROR: the destination root ({}) does not exist", .0.display())]
    MissingDestinationRoot(PathBuf),
    /// The manifest template file does not exist.
    #[error("manifest template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),
    /// The manifest template exists but could not be read.
    #[error("failed to read manifest template {}", path.display())]
    TemplateUnreadable {
        /// Template path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The rendered manifest is not a valid group mapping.
    #[error("malformed manifest rendered from {}: {message}", path.display())]
    MalformedManifest {
        /// Template the manifest was rendered from.
        path: PathBuf,
        /// What was wrong with the document.
        message: String,
    },
}

/// Template rendering failures. Line numbers are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// Malformed template syntax.
    #[error("syntax error on line {line}: {message}")]
    Syntax {
        /// Line of the offending tag.
        line: usize,
        /// Description of the problem.
        message: String,
    },
    /// A referenced variable is not defined in the render context.
    #[error("undefined variable '{name}' on line {line}")]
    UndefinedVariable {
        /// Variable name.
        name: String,
        /// Line of the reference.
        line: usize,
    },
    /// A called function is not registered in the render context.
    #[error("unknown function '{name}' on line {line}")]
    UnknownFunction {
        /// Function name.
        name: String,
        /// Line of the call.
        line: usize,
    },
    /// A helper function returned an error.
    #[error("{name}() failed on line {line}: {message}")]
    Helper {
        /// Function name.
        name: String,
        /// Line of the call.
        line: usize,
        /// Message returned by the helper.
        message: String,
    },
    /// An operation was applied to a value of the wrong kind.
    #[error("type error on line {line}: {message}")]
    Type {
        /// Line of the expression.
        line: usize,
        /// Description of the mismatch.
        message: String,
    },
}

/// Remote retrieval failures.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The collaborator process could not be started.
    #[error("failed to start '{command}'")]
    Spawn {
        /// Command line that failed to start.
        command: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The collaborator ran but reported failure.
    #[error("{step} retrieval of {target} failed: {detail}")]
    Failed {
        /// Retrieval step name.
        step: &'static str,
        /// Archive path or object URL.
        target: String,
        /// Exit status or collaborator message.
        detail: String,
    },
}

/// File synchronization failures.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A plain source path does not exist.
    #[error("source does not exist: {}", .0.display())]
    MissingSource(PathBuf),
    /// A source pattern matched nothing.
    #[error("source pattern matched no files: {0}")]
    NoMatch(String),
    /// A source pattern could not be compiled.
    #[error("invalid source pattern '{pattern}'")]
    Pattern {
        /// Offending pattern.
        pattern: String,
        /// Underlying globset error.
        #[source]
        source: globset::Error,
    },
    /// A filesystem operation failed.
    #[error("{operation} failed for {}", path.display())]
    Io {
        /// Operation that failed.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Directory traversal failed.
    #[error("failed to walk {}", path.display())]
    Walk {
        /// Directory being walked.
        path: PathBuf,
        /// Underlying walkdir error.
        #[source]
        source: walkdir::Error,
    },
    /// A sync worker task panicked or was cancelled.
    #[error("sync worker for group '{group}' did not complete: {message}")]
    Worker {
        /// Group being synchronized.
        group: String,
        /// Join failure description.
        message: String,
    },
}

impl SyncError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
