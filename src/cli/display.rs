//! Terminal display for staging runs
//!
//! All output goes to stderr so stdout stays clean for `--dry-run` manifests.

use std::error::Error as _;
use std::path::Path;

use colored::Colorize;

use crate::doctor::{DiagnosticReport, Severity};
use crate::error::StageError;
use crate::stage::cycle::CycleContext;
use crate::stage::executor::StageReport;
use crate::stage::manifest::Manifest;
use crate::stage::retrieve::{RetrievalSummary, StepOutcome};
use crate::stage::sync::GroupReport;

/// Display handler for one staging run
#[derive(Debug, Clone)]
pub struct StageDisplay {
    stamp: String,
}

impl StageDisplay {
    /// Display for the given cycle
    #[must_use]
    pub fn new(cycle: &CycleContext) -> Self {
        Self {
            stamp: cycle.stamp.clone(),
        }
    }

    /// Print the run header
    pub fn print_header(&self, destination_root: &Path) {
        eprintln!(
            "\n{} {}",
            "===".bold().cyan(),
            format!("Staging cycle {}", self.stamp).bold().cyan()
        );
        eprintln!(
            "  {} {}",
            "Destination:".dimmed(),
            destination_root.display()
        );
        eprintln!("{}", "─".repeat(50).dimmed());
    }

    /// Print one line per retrieval step
    pub fn print_retrieval(&self, summary: &RetrievalSummary) {
        for (name, outcome) in [("archive", &summary.archive), ("analysis", &summary.analysis)] {
            match outcome {
                StepOutcome::Skipped => {
                    eprintln!("  {} {} retrieval skipped", "·".dimmed(), name.dimmed());
                }
                StepOutcome::Completed => {
                    eprintln!("  {} {} retrieval", "✓".green().bold(), name.bold());
                }
                StepOutcome::Tolerated(reason) => {
                    eprintln!(
                        "  {} {} retrieval failed (best effort): {}",
                        "⚠".yellow().bold(),
                        name.bold(),
                        reason.yellow()
                    );
                }
            }
        }
    }

    /// Print the resolved manifest shape
    pub fn print_manifest(&self, manifest: &Manifest) {
        eprintln!(
            "  {} {} group(s), {} operation(s)",
            "Manifest:".dimmed(),
            manifest.groups.len(),
            manifest.operation_count()
        );
    }

    /// Print the summary for one synchronized group
    pub fn print_group(&self, report: &GroupReport) {
        let counts = report.counts;
        eprintln!(
            "  {} {} {} copied, {} unchanged, {} dir(s) created",
            "▶".blue(),
            report.name.bold(),
            counts.copied,
            counts.unchanged,
            counts.dirs_created
        );
        for skipped in &report.skipped {
            eprintln!(
                "    {} skipped {}: {}",
                "⚠".yellow().bold(),
                skipped.operation,
                skipped.reason.dimmed()
            );
        }
    }

    /// Print the closing summary of a successful run
    pub fn print_success(&self, report: &StageReport) {
        eprintln!("{}", "─".repeat(50).dimmed());
        let totals = report.sync.totals();
        eprintln!("  {} {}", "STAGED".green().bold(), self.stamp.bold());
        eprintln!(
            "  {} {} copied | {} unchanged | {} skipped | {}",
            "Stats:".dimmed(),
            totals.copied,
            totals.unchanged,
            report.sync.skipped_count(),
            format_duration(report.duration_secs)
        );
        eprintln!();
    }
}

/// Print the fatal diagnostic for a failed run, with its cause chain.
pub fn print_fatal(err: &StageError) {
    eprintln!("{}", fatal_line(err).red().bold());
    let mut source = err.source();
    while let Some(cause) = source {
        eprintln!("  {} {cause}", "caused by:".dimmed());
        source = cause.source();
    }
}

/// The single-line fatal diagnostic, always prefixed with `FATAL ERROR`.
#[must_use]
pub fn fatal_line(err: &StageError) -> String {
    let message = err.to_string();
    if message.starts_with("FATAL ERROR") {
        message
    } else {
        format!("FATAL ERROR ({}): {message}", err.stage())
    }
}

/// Print a preflight report to stderr.
pub fn render_diagnostic_report(report: &DiagnosticReport) {
    if report.is_clean() {
        eprintln!("  {} no problems found", "✓".green().bold());
        return;
    }

    for finding in &report.findings {
        let tag = match finding.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
            Severity::Info => "info".blue().bold(),
        };
        eprintln!("  {tag} [{}] {}", finding.code, finding.message);
        if let Some(ref suggestion) = finding.suggestion {
            eprintln!("      {} {suggestion}", "→".dimmed());
        }
    }

    eprintln!(
        "\n  {} error(s), {} warning(s), {} info",
        report.error_count(),
        report.warning_count(),
        report.info_count()
    );
}

fn format_duration(secs: u64) -> String {
    format!("{}m {}s", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doctor::Finding;
    use crate::error::{ConfigurationError, RenderError};
    use crate::stage::manifest::{FileOperation, ManifestGroup};
    use crate::stage::sync::{SkippedOperation, SyncCounts, SyncReport};
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn cycle() -> CycleContext {
        CycleContext::new(Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap())
    }

    #[test]
    fn test_new_display() {
        let display = StageDisplay::new(&cycle());
        assert_eq!(display.stamp, "2024060106");
    }

    #[test]
    fn test_fatal_line_keeps_existing_prefix() {
        let err: StageError =
            ConfigurationError::MissingDestinationRoot(PathBuf::from("/comrot")).into();
        let line = fatal_line(&err);
        assert!(line.starts_with("FATAL ERROR: the destination root"));
        assert_eq!(line.matches("FATAL ERROR").count(), 1);
    }

    #[test]
    fn test_fatal_line_adds_stage_label() {
        let err = StageError::Render {
            template: PathBuf::from("master.yaml.j2"),
            source: RenderError::UndefinedVariable {
                name: "ICSDIR".to_string(),
                line: 2,
            },
        };
        let line = fatal_line(&err);
        assert!(line.starts_with("FATAL ERROR (render):"), "got: {line}");
        assert!(line.contains("master.yaml.j2"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0m 0s");
        assert_eq!(format_duration(125), "2m 5s");
    }

    // Printing must not panic for any outcome shape
    #[test]
    fn test_print_all_sections_no_panic() {
        let display = StageDisplay::new(&cycle());
        display.print_header(Path::new("/comrot/exp"));
        display.print_retrieval(&RetrievalSummary {
            archive: StepOutcome::Completed,
            analysis: StepOutcome::Tolerated("aws exited with code 1".to_string()),
        });
        display.print_retrieval(&RetrievalSummary {
            archive: StepOutcome::Skipped,
            analysis: StepOutcome::Skipped,
        });

        let manifest = Manifest {
            groups: vec![ManifestGroup {
                name: "atmos".to_string(),
                operations: vec![FileOperation::Mkdir {
                    path: PathBuf::from("/comrot/exp/input"),
                }],
            }],
        };
        display.print_manifest(&manifest);

        let group = GroupReport {
            name: "atmos".to_string(),
            counts: SyncCounts {
                copied: 3,
                unchanged: 1,
                dirs_created: 1,
            },
            skipped: vec![SkippedOperation {
                operation: FileOperation::Copy {
                    src: "/ics/increment.nc".to_string(),
                    dest: "/comrot/exp/".to_string(),
                    optional: true,
                },
                reason: "source does not exist".to_string(),
            }],
        };
        display.print_group(&group);

        display.print_success(&StageReport {
            cycle: cycle(),
            retrieval: RetrievalSummary {
                archive: StepOutcome::Skipped,
                analysis: StepOutcome::Skipped,
            },
            manifest,
            sync: SyncReport {
                groups: vec![group],
            },
            duration_secs: 61,
        });

        print_fatal(&StageError::Render {
            template: PathBuf::from("t"),
            source: RenderError::Syntax {
                line: 1,
                message: "unclosed tag".to_string(),
            },
        });
    }

    #[test]
    fn test_render_diagnostic_report_no_panic() {
        render_diagnostic_report(&DiagnosticReport { findings: vec![] });
        render_diagnostic_report(&DiagnosticReport {
            findings: vec![Finding {
                severity: Severity::Warning,
                code: "P004".to_string(),
                message: "download_analysis has no effect".to_string(),
                suggestion: Some("set repair_replay = true".to_string()),
            }],
        });
    }
}
