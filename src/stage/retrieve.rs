//! Remote retrieval steps
//!
//! Two independent, flag-gated steps fetch data into the working directory
//! before the manifest is resolved:
//!
//! - archive: extract `<archive_base>/<YYYYMMDDHH>.tar` from the tape archive
//! - analysis: download the two replay analysis products from object storage
//!
//! The steps run concurrently and the runner waits for both.

use std::path::Path;

use crate::command::{run_command, ToolCommand};
use crate::config::{RetrievalKind, StageFlags};
use crate::error::RetrievalError;
use crate::stage::cycle::CycleContext;
use crate::stage::request::StagingRequest;

/// Suffix of the per-cycle tape archive.
pub const ARCHIVE_SUFFIX: &str = ".tar";

/// Basenames of the replay analysis products, fetched in this order.
pub const ANALYSIS_PRODUCTS: [&str; 2] = ["GFSPRS.GrbF03", "GFSFLX.GrbF03"];

/// Extracts an archive into a local directory.
#[allow(async_fn_in_trait)]
pub trait ArchiveClient {
    /// Extract `archive` into `into`.
    async fn extract(&self, archive: &str, into: &Path) -> Result<(), RetrievalError>;
}

/// Downloads objects from object storage.
#[allow(async_fn_in_trait)]
pub trait ObjectStoreClient {
    /// Download `url` into the directory `dest`.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), RetrievalError>;
}

/// `htar -xvf <archive>`, run in the target directory.
#[derive(Debug, Clone)]
pub struct HtarClient {
    command: ToolCommand,
}

impl HtarClient {
    /// Client using `htar` from PATH.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program("htar")
    }

    /// Client using a specific htar binary.
    #[must_use]
    pub fn with_program(program: &str) -> Self {
        let mut command = ToolCommand::new(program);
        command.add_default_arg("-xvf");
        Self { command }
    }

    /// The underlying command.
    #[must_use]
    pub const fn command(&self) -> &ToolCommand {
        &self.command
    }
}

impl Default for HtarClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveClient for HtarClient {
    async fn extract(&self, archive: &str, into: &Path) -> Result<(), RetrievalError> {
        let args = [archive];
        let output = run_command(self.command.build(&args, into))
            .await
            .map_err(|source| RetrievalError::Spawn {
                command: self.command.command_line(&args),
                source,
            })?;
        if output.success() {
            Ok(())
        } else {
            Err(RetrievalError::Failed {
                step: RetrievalKind::Archive.as_str(),
                target: archive.to_string(),
                detail: format!("htar exited with code {}", output.exit_status()),
            })
        }
    }
}

/// The `aws s3` sub-operation used for downloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum S3Operation {
    /// `aws s3 cp`
    #[default]
    Copy,
    /// `aws s3 sync`
    Sync,
}

impl S3Operation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "cp",
            Self::Sync => "sync",
        }
    }
}

/// How the object-storage client talks to the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S3Options {
    /// Sign requests with local credentials; off for public buckets
    pub sign_requests: bool,
    /// Sub-operation to run
    pub operation: S3Operation,
}

impl Default for S3Options {
    fn default() -> Self {
        Self {
            sign_requests: false,
            operation: S3Operation::Copy,
        }
    }
}

/// `aws s3 <op> [--no-sign-request] <url> ./`, run in the target directory.
#[derive(Debug, Clone)]
pub struct AwsS3Client {
    command: ToolCommand,
}

impl AwsS3Client {
    /// Client using `aws` from PATH.
    #[must_use]
    pub fn new(options: S3Options) -> Self {
        Self::with_program("aws", options)
    }

    /// Unsigned `aws s3 cp`, for public buckets.
    #[must_use]
    pub fn anonymous_copy() -> Self {
        Self::new(S3Options::default())
    }

    /// Client using a specific aws binary.
    #[must_use]
    pub fn with_program(program: &str, options: S3Options) -> Self {
        let mut command = ToolCommand::new(program);
        command
            .add_default_arg("s3")
            .add_default_arg(options.operation.as_str());
        if !options.sign_requests {
            command.add_default_arg("--no-sign-request");
        }
        Self { command }
    }

    /// The underlying command.
    #[must_use]
    pub const fn command(&self) -> &ToolCommand {
        &self.command
    }
}

impl Default for AwsS3Client {
    fn default() -> Self {
        Self::anonymous_copy()
    }
}

impl ObjectStoreClient for AwsS3Client {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), RetrievalError> {
        // The command already runs inside `dest`.
        let args = [url, "./"];
        let output = run_command(self.command.build(&args, dest))
            .await
            .map_err(|source| RetrievalError::Spawn {
                command: self.command.command_line(&args),
                source,
            })?;
        if output.success() {
            Ok(())
        } else {
            Err(RetrievalError::Failed {
                step: RetrievalKind::Analysis.as_str(),
                target: url.to_string(),
                detail: format!("aws exited with code {}", output.exit_status()),
            })
        }
    }
}

/// A conditional retrieval action.
#[allow(async_fn_in_trait)]
pub trait RetrievalStep {
    /// Which step this is
    fn kind(&self) -> RetrievalKind;

    /// Precondition: whether the flags ask for this step
    fn is_enabled(&self, flags: &StageFlags) -> bool;

    /// Perform the retrieval for `cycle`
    async fn run(&self, cycle: &CycleContext) -> Result<(), RetrievalError>;
}

/// Tape archive extraction step.
pub struct ArchiveRetrieval<'a, C> {
    client: &'a C,
    archive_base: Option<&'a str>,
    working_dir: &'a Path,
}

impl<'a, C: ArchiveClient> ArchiveRetrieval<'a, C> {
    /// Step extracting from `archive_base` into `working_dir`.
    #[must_use]
    pub const fn new(client: &'a C, archive_base: Option<&'a str>, working_dir: &'a Path) -> Self {
        Self {
            client,
            archive_base,
            working_dir,
        }
    }

    /// `<archive_base>/<YYYYMMDDHH>.tar`, or `None` without an archive base.
    #[must_use]
    pub fn archive_path(&self, cycle: &CycleContext) -> Option<String> {
        self.archive_base
            .map(|base| format!("{base}/{}{ARCHIVE_SUFFIX}", cycle.stamp))
    }
}

impl<C: ArchiveClient> RetrievalStep for ArchiveRetrieval<'_, C> {
    fn kind(&self) -> RetrievalKind {
        RetrievalKind::Archive
    }

    fn is_enabled(&self, flags: &StageFlags) -> bool {
        flags.download_archive
    }

    async fn run(&self, cycle: &CycleContext) -> Result<(), RetrievalError> {
        let Some(archive) = self.archive_path(cycle) else {
            return Err(RetrievalError::Failed {
                step: self.kind().as_str(),
                target: format!("{}{ARCHIVE_SUFFIX}", cycle.stamp),
                detail: "no archive base configured".to_string(),
            });
        };
        self.client.extract(&archive, self.working_dir).await
    }
}

/// Replay analysis download step.
pub struct AnalysisRetrieval<'a, C> {
    client: &'a C,
    bucket_url: &'a str,
    working_dir: &'a Path,
}

impl<'a, C: ObjectStoreClient> AnalysisRetrieval<'a, C> {
    /// Step downloading from `bucket_url` into `working_dir`.
    #[must_use]
    pub const fn new(client: &'a C, bucket_url: &'a str, working_dir: &'a Path) -> Self {
        Self {
            client,
            bucket_url,
            working_dir,
        }
    }

    /// `<bucket>/<YYYY>/<MM>/<YYYYMMDDHH>/<product>` for each product, in order.
    #[must_use]
    pub fn object_urls(&self, cycle: &CycleContext) -> Vec<String> {
        let bucket = self.bucket_url.trim_end_matches('/');
        ANALYSIS_PRODUCTS
            .iter()
            .map(|product| {
                format!(
                    "{bucket}/{}/{}/{}/{product}",
                    cycle.year, cycle.month, cycle.stamp
                )
            })
            .collect()
    }
}

impl<C: ObjectStoreClient> RetrievalStep for AnalysisRetrieval<'_, C> {
    fn kind(&self) -> RetrievalKind {
        RetrievalKind::Analysis
    }

    fn is_enabled(&self, flags: &StageFlags) -> bool {
        flags.wants_analysis()
    }

    async fn run(&self, cycle: &CycleContext) -> Result<(), RetrievalError> {
        for url in self.object_urls(cycle) {
            self.client.fetch(&url, self.working_dir).await?;
        }
        Ok(())
    }
}

/// What happened to one retrieval step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The flags did not ask for it
    Skipped,
    /// Ran and succeeded
    Completed,
    /// Failed, but the step is best-effort; carries the failure message
    Tolerated(String),
}

/// Outcome of both retrieval steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalSummary {
    /// Archive extraction
    pub archive: StepOutcome,
    /// Analysis download
    pub analysis: StepOutcome,
}

async fn run_step<S: RetrievalStep>(
    step: &S,
    flags: &StageFlags,
    cycle: &CycleContext,
    best_effort: bool,
) -> Result<StepOutcome, RetrievalError> {
    if !step.is_enabled(flags) {
        return Ok(StepOutcome::Skipped);
    }
    match step.run(cycle).await {
        Ok(()) => Ok(StepOutcome::Completed),
        Err(err) if best_effort => Ok(StepOutcome::Tolerated(err.to_string())),
        Err(err) => Err(err),
    }
}

/// Run both retrieval steps concurrently and wait for both.
///
/// The archive step's error is reported first if both fail.
pub async fn run_retrieval<A: ArchiveClient, O: ObjectStoreClient>(
    request: &StagingRequest,
    cycle: &CycleContext,
    archive: &A,
    store: &O,
) -> Result<RetrievalSummary, RetrievalError> {
    let archive_step = ArchiveRetrieval::new(
        archive,
        request.sources.archive_base.as_deref(),
        &request.working_dir,
    );
    let analysis_step =
        AnalysisRetrieval::new(store, &request.sources.bucket_url, &request.working_dir);

    let (archive_result, analysis_result) = tokio::join!(
        run_step(
            &archive_step,
            &request.flags,
            cycle,
            request.is_best_effort(RetrievalKind::Archive),
        ),
        run_step(
            &analysis_step,
            &request.flags,
            cycle,
            request.is_best_effort(RetrievalKind::Analysis),
        ),
    );

    Ok(RetrievalSummary {
        archive: archive_result?,
        analysis: analysis_result?,
    })
}
