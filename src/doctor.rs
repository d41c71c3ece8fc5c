//! Preflight checks for `icstage --check`
//!
//! Inspects a staging request and the run history before anything is
//! retrieved or copied. Returns a structured report with categories:
//! errors (the run will fail), warnings (the run will not do what the
//! configuration suggests), info (suggestions).

use crate::config::RetrievalKind;
use crate::log::{RunStatus, StageOutcome};
use crate::stage::cycle::CycleContext;
use crate::stage::request::StagingRequest;

/// Severity level for a diagnostic finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    /// Must fix: the run will fail
    Error,
    /// Should fix: suspicious configuration
    Warning,
    /// Suggestion only
    Info,
}

/// A single diagnostic finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Severity of the finding
    pub severity: Severity,
    /// Short code for the finding (e.g., "P001")
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Suggested fix (optional)
    pub suggestion: Option<String>,
}

/// Diagnostic report from `icstage --check`
#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    /// All findings, in order of severity (errors first)
    pub findings: Vec<Finding>,
}

impl DiagnosticReport {
    /// Returns true if the report has no findings at all
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Returns the number of errors
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count(&Severity::Error)
    }

    /// Returns the number of warnings
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count(&Severity::Warning)
    }

    /// Returns the number of info items
    #[must_use]
    pub fn info_count(&self) -> usize {
        self.count(&Severity::Info)
    }

    fn count(&self, severity: &Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| &f.severity == severity)
            .count()
    }
}

/// Run all preflight checks, looking tools up on PATH.
#[must_use]
pub fn diagnose(request: &StagingRequest, log: &[StageOutcome]) -> DiagnosticReport {
    diagnose_with(request, log, |tool| which::which(tool).is_ok())
}

/// Run all preflight checks with a custom tool lookup.
#[must_use]
pub fn diagnose_with<F>(
    request: &StagingRequest,
    log: &[StageOutcome],
    tool_available: F,
) -> DiagnosticReport
where
    F: Fn(&str) -> bool,
{
    let mut findings = Vec::new();

    check_paths(request, &mut findings);
    check_tools(request, &tool_available, &mut findings);
    check_flag_combinations(request, &mut findings);
    check_history(request, log, &mut findings);

    findings.sort_by_key(|f| match f.severity {
        Severity::Error => 0,
        Severity::Warning => 1,
        Severity::Info => 2,
    });

    DiagnosticReport { findings }
}

/// P001–P003: destination root, template and working directory
fn check_paths(request: &StagingRequest, findings: &mut Vec<Finding>) {
    if !request.destination_root.is_dir() {
        findings.push(Finding {
            severity: Severity::Error,
            code: "P001".to_string(),
            message: format!(
                "Destination root {} does not exist",
                request.destination_root.display()
            ),
            suggestion: Some(
                "Create the experiment directory before staging; it is never created automatically"
                    .to_string(),
            ),
        });
    }

    if !request.manifest_template.is_file() {
        findings.push(Finding {
            severity: Severity::Error,
            code: "P002".to_string(),
            message: format!(
                "Manifest template {} not found",
                request.manifest_template.display()
            ),
            suggestion: Some("Check `manifest_template` in stage.toml".to_string()),
        });
    }

    if !request.working_dir.is_dir() {
        findings.push(Finding {
            severity: Severity::Warning,
            code: "P003".to_string(),
            message: format!(
                "Working directory {} does not exist",
                request.working_dir.display()
            ),
            suggestion: Some("Retrieved files land in `working_dir`; create it first".to_string()),
        });
    }
}

/// P004–P005: retrieval tools on PATH for the enabled steps
fn check_tools<F>(request: &StagingRequest, tool_available: &F, findings: &mut Vec<Finding>)
where
    F: Fn(&str) -> bool,
{
    let needed = [
        ("P004", "htar", RetrievalKind::Archive, request.flags.download_archive),
        ("P005", "aws", RetrievalKind::Analysis, request.flags.wants_analysis()),
    ];

    for (code, tool, kind, enabled) in needed {
        if !enabled || tool_available(tool) {
            continue;
        }
        let best_effort = request.is_best_effort(kind);
        findings.push(Finding {
            severity: if best_effort {
                Severity::Warning
            } else {
                Severity::Error
            },
            code: code.to_string(),
            message: format!(
                "`{tool}` not found on PATH but {} retrieval is enabled",
                kind.as_str()
            ),
            suggestion: Some(format!(
                "Load the module providing `{tool}` or disable the {} step",
                kind.as_str()
            )),
        });
    }
}

/// P006–P007: flag combinations that do nothing
fn check_flag_combinations(request: &StagingRequest, findings: &mut Vec<Finding>) {
    let flags = request.flags;
    if flags.download_analysis && !flags.repair_replay {
        findings.push(Finding {
            severity: Severity::Warning,
            code: "P006".to_string(),
            message: "download_analysis is set but repair_replay is not; no analysis will be fetched"
                .to_string(),
            suggestion: Some("Set `repair_replay = true` under [flags]".to_string()),
        });
    }

    for kind in &request.best_effort {
        let enabled = match kind {
            RetrievalKind::Archive => flags.download_archive,
            RetrievalKind::Analysis => flags.wants_analysis(),
        };
        if !enabled {
            findings.push(Finding {
                severity: Severity::Info,
                code: "P007".to_string(),
                message: format!(
                    "'{}' is listed as best effort but the step is disabled",
                    kind.as_str()
                ),
                suggestion: None,
            });
        }
    }
}

/// P008: the previous attempt at this cycle failed
fn check_history(request: &StagingRequest, log: &[StageOutcome], findings: &mut Vec<Finding>) {
    let stamp = CycleContext::new(request.cycle).stamp;
    let Some(last) = log.iter().rev().find(|o| o.cycle == stamp) else {
        return;
    };
    if last.status == RunStatus::Failed {
        findings.push(Finding {
            severity: Severity::Info,
            code: "P008".to_string(),
            message: format!(
                "Last run of cycle {stamp} failed in {}: {}",
                last.stage.as_deref().unwrap_or("unknown stage"),
                last.message
            ),
            suggestion: Some(
                "Staging is idempotent; files already copied will be skipped on rerun".to_string(),
            ),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageFlags;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use tempfile::TempDir;

    struct Paths {
        _dir: TempDir,
        request: StagingRequest,
    }

    fn ready_request() -> Paths {
        let dir = TempDir::new().unwrap();
        let template = dir.path().join("master.yaml.j2");
        fs::write(&template, "atmos: []\n").unwrap();
        let request = StagingRequest {
            cycle: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            destination_root: dir.path().to_path_buf(),
            manifest_template: template,
            working_dir: dir.path().to_path_buf(),
            sync_workers: 1,
            ..StagingRequest::default()
        };
        Paths { _dir: dir, request }
    }

    fn all_tools(_: &str) -> bool {
        true
    }

    fn no_tools(_: &str) -> bool {
        false
    }

    fn codes(report: &DiagnosticReport) -> Vec<&str> {
        report.findings.iter().map(|f| f.code.as_str()).collect()
    }

    fn outcome(cycle: &str, status: RunStatus, stage: Option<&str>) -> StageOutcome {
        StageOutcome {
            cycle: cycle.to_string(),
            timestamp: Utc::now(),
            status,
            stage: stage.map(str::to_string),
            message: "source does not exist: /ics/x.nc".to_string(),
            groups: 0,
            files_copied: 0,
            files_unchanged: 0,
            optional_skipped: 0,
            duration_secs: 1,
        }
    }

    #[test]
    fn test_clean_report_when_ready() {
        let paths = ready_request();
        let report = diagnose_with(&paths.request, &[], no_tools);
        assert!(report.is_clean(), "got: {:?}", report.findings);
    }

    #[test]
    fn test_report_counts() {
        let report = DiagnosticReport {
            findings: vec![
                Finding {
                    severity: Severity::Error,
                    code: "E1".to_string(),
                    message: "error".to_string(),
                    suggestion: None,
                },
                Finding {
                    severity: Severity::Warning,
                    code: "W1".to_string(),
                    message: "warning".to_string(),
                    suggestion: None,
                },
                Finding {
                    severity: Severity::Info,
                    code: "I1".to_string(),
                    message: "info".to_string(),
                    suggestion: None,
                },
            ],
        };
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.warning_count(), 1);
        assert_eq!(report.info_count(), 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_p001_missing_destination_root() {
        let mut paths = ready_request();
        paths.request.destination_root = paths.request.destination_root.join("absent");
        let report = diagnose_with(&paths.request, &[], all_tools);
        assert_eq!(codes(&report), vec!["P001"]);
        assert_eq!(report.error_count(), 1);
    }

    #[test]
    fn test_p002_missing_template() {
        let mut paths = ready_request();
        paths.request.manifest_template = paths.request.working_dir.join("nope.yaml.j2");
        let report = diagnose_with(&paths.request, &[], all_tools);
        assert_eq!(codes(&report), vec!["P002"]);
    }

    #[test]
    fn test_p003_missing_working_dir_is_warning() {
        let mut paths = ready_request();
        paths.request.working_dir = paths.request.working_dir.join("work");
        let report = diagnose_with(&paths.request, &[], all_tools);
        assert_eq!(codes(&report), vec!["P003"]);
        assert_eq!(report.warning_count(), 1);
    }

    #[test]
    fn test_p004_htar_missing_only_when_archive_enabled() {
        let mut paths = ready_request();
        assert!(diagnose_with(&paths.request, &[], no_tools).is_clean());

        paths.request.flags.download_archive = true;
        let report = diagnose_with(&paths.request, &[], no_tools);
        assert_eq!(codes(&report), vec!["P004"]);
        assert_eq!(report.error_count(), 1);

        assert!(diagnose_with(&paths.request, &[], all_tools).is_clean());
    }

    #[test]
    fn test_p005_aws_missing_is_warning_when_best_effort() {
        let mut paths = ready_request();
        paths.request.flags = StageFlags {
            repair_replay: true,
            download_analysis: true,
            ..StageFlags::default()
        };
        paths.request.best_effort.insert(RetrievalKind::Analysis);

        let report = diagnose_with(&paths.request, &[], |tool| tool == "htar");
        assert_eq!(codes(&report), vec!["P005"]);
        assert_eq!(report.warning_count(), 1);
    }

    #[test]
    fn test_p006_analysis_without_replay() {
        let mut paths = ready_request();
        paths.request.flags.download_analysis = true;
        let report = diagnose_with(&paths.request, &[], no_tools);
        assert_eq!(codes(&report), vec!["P006"]);
    }

    #[test]
    fn test_p007_best_effort_for_disabled_step() {
        let mut paths = ready_request();
        paths.request.best_effort.insert(RetrievalKind::Archive);
        let report = diagnose_with(&paths.request, &[], all_tools);
        assert_eq!(codes(&report), vec!["P007"]);
        assert_eq!(report.info_count(), 1);
    }

    #[test]
    fn test_p008_previous_failure_of_same_cycle() {
        let paths = ready_request();
        let log = vec![
            outcome("2024060100", RunStatus::Failed, Some("sync")),
            outcome("2024053118", RunStatus::Success, None),
        ];
        let report = diagnose_with(&paths.request, &log, all_tools);
        assert_eq!(codes(&report), vec!["P008"]);
        assert!(report.findings[0].message.contains("sync"));
    }

    #[test]
    fn test_p008_ignores_failure_followed_by_success() {
        let paths = ready_request();
        let log = vec![
            outcome("2024060100", RunStatus::Failed, Some("retrieval")),
            outcome("2024060100", RunStatus::Success, None),
        ];
        assert!(diagnose_with(&paths.request, &log, all_tools).is_clean());
    }

    #[test]
    fn test_findings_ordered_by_severity() {
        let mut paths = ready_request();
        paths.request.destination_root = paths.request.destination_root.join("absent");
        paths.request.flags.download_analysis = true;
        paths.request.best_effort.insert(RetrievalKind::Archive);

        let report = diagnose_with(&paths.request, &[], all_tools);
        let severities: Vec<&Severity> = report.findings.iter().map(|f| &f.severity).collect();
        assert_eq!(
            severities,
            vec![&Severity::Error, &Severity::Warning, &Severity::Info]
        );
    }
}
