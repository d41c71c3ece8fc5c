//! Staging orchestrator
//!
//! Runs one cycle through the pipeline:
//!
//! 1. derive the cycle calendar fields
//! 2. run the flag-gated retrieval steps
//! 3. check the destination root (or before step 2, when configured)
//! 4. render and parse the manifest template
//! 5. synchronize the manifest groups in order
//!
//! Every failure is fatal and surfaces as a [`StageError`]. Nothing is rolled
//! back.

use std::time::Instant;

use crate::cli::display::StageDisplay;
use crate::error::StageResult;
use crate::stage::cycle::CycleContext;
use crate::stage::manifest::{build_render_context, resolve_manifest, Manifest};
use crate::stage::request::StagingRequest;
use crate::stage::retrieve::{run_retrieval, ArchiveClient, ObjectStoreClient, RetrievalSummary};
use crate::stage::sync::{SyncExecutor, SyncReport};
use crate::stage::validate::validate_destination;

/// Everything a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    /// Calendar fields of the staged cycle
    pub cycle: CycleContext,
    /// Retrieval step outcomes
    pub retrieval: RetrievalSummary,
    /// The manifest that was applied
    pub manifest: Manifest,
    /// Per-group sync results
    pub sync: SyncReport,
    /// Wall-clock duration in seconds
    pub duration_secs: u64,
}

/// Stages initial conditions for one cycle at a time.
pub struct Stager<A, O> {
    archive: A,
    store: O,
    display: bool,
}

impl<A: ArchiveClient, O: ObjectStoreClient> Stager<A, O> {
    /// Stager using the given retrieval collaborators, without terminal output.
    #[must_use]
    pub const fn new(archive: A, store: O) -> Self {
        Self {
            archive,
            store,
            display: false,
        }
    }

    /// Enable or disable progress output on stderr.
    #[must_use]
    pub const fn with_display(mut self, enabled: bool) -> Self {
        self.display = enabled;
        self
    }

    /// The archive collaborator
    #[must_use]
    pub const fn archive(&self) -> &A {
        &self.archive
    }

    /// The object-storage collaborator
    #[must_use]
    pub const fn store(&self) -> &O {
        &self.store
    }

    /// Run the whole pipeline for `request`.
    pub async fn run(&self, request: &StagingRequest) -> StageResult<StageReport> {
        let start = Instant::now();
        let cycle = CycleContext::new(request.cycle);
        let display = self.display.then(|| StageDisplay::new(&cycle));
        if let Some(ref d) = display {
            d.print_header(&request.destination_root);
        }

        if request.validate_before_retrieval {
            validate_destination(&request.destination_root)?;
        }

        let retrieval = run_retrieval(request, &cycle, &self.archive, &self.store).await?;
        if let Some(ref d) = display {
            d.print_retrieval(&retrieval);
        }

        if !request.validate_before_retrieval {
            validate_destination(&request.destination_root)?;
        }

        let manifest = resolve(&cycle, request)?;
        if let Some(ref d) = display {
            d.print_manifest(&manifest);
        }

        let sync = SyncExecutor::new(request.sync_workers)
            .sync_manifest_with(&manifest, |group| {
                if let Some(ref d) = display {
                    d.print_group(group);
                }
            })
            .await?;

        let report = StageReport {
            cycle,
            retrieval,
            manifest,
            sync,
            duration_secs: start.elapsed().as_secs(),
        };
        if let Some(ref d) = display {
            d.print_success(&report);
        }
        Ok(report)
    }

    /// Check the destination root and resolve the manifest, without retrieving
    /// or touching the filesystem.
    pub fn render(&self, request: &StagingRequest) -> StageResult<Manifest> {
        let cycle = CycleContext::new(request.cycle);
        validate_destination(&request.destination_root)?;
        resolve(&cycle, request)
    }
}

fn resolve(cycle: &CycleContext, request: &StagingRequest) -> StageResult<Manifest> {
    let ctx = build_render_context(cycle, request);
    resolve_manifest(&request.manifest_template, &ctx)
}
