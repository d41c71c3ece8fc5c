#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use tempfile::TempDir;

use icstage::config::StageConfig;
use icstage::error::{ConfigurationError, RetrievalError, StageError};
use icstage::log::{JsonlLogger, RunStatus, StageOutcome};
use icstage::stage::executor::Stager;
use icstage::stage::retrieve::{ArchiveClient, ObjectStoreClient, StepOutcome};

/// Archive double: records calls and unpacks a fixed restart set.
#[derive(Default)]
struct RecordingArchive {
    calls: Mutex<Vec<(String, PathBuf)>>,
}

impl ArchiveClient for RecordingArchive {
    async fn extract(&self, archive: &str, into: &Path) -> Result<(), RetrievalError> {
        self.calls
            .lock()
            .unwrap()
            .push((archive.to_string(), into.to_path_buf()));
        let restart = into.join("RESTART");
        fs::create_dir_all(&restart).unwrap();
        fs::write(restart.join("fv_core.res.nc"), "core").unwrap();
        fs::write(restart.join("coupler.res"), "coupler").unwrap();
        Ok(())
    }
}

/// Object-store double: records calls, optionally failing every fetch.
#[derive(Default)]
struct RecordingStore {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl ObjectStoreClient for RecordingStore {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), RetrievalError> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.fail {
            return Err(RetrievalError::Failed {
                step: "analysis",
                target: url.to_string(),
                detail: "aws exited with code 1".to_string(),
            });
        }
        let name = url.rsplit('/').next().unwrap_or("object");
        fs::write(dest.join(name), "grib").unwrap();
        Ok(())
    }
}

const MANIFEST_TEMPLATE: &str = r#"{# initial conditions for one cycle #}
{% set input = destination_root ~ "/gdas." ~ pdy ~ "/" ~ hour ~ "/model/atmos/input" %}
{% set ics = ICSDIR ~ "/" ~ cycle_stamp %}
atmosphere:
  - mkdir: "{{ input }}"
  - ["{{ ics }}/gfs_ctrl.nc", "{{ input }}/"]
{% for tile in glob(ics ~ "/sfc_data.tile*.nc") %}
  - ["{{ tile }}", "{{ input }}/"]
{% endfor %}
  - src: "{{ ics }}/atminc.nc"
    dest: "{{ input }}/"
    optional: true
{% if download_archive %}
restart:
  - ["{{ working_dir }}/RESTART", "{{ destination_root }}/gdas.{{ pdy }}/{{ hour }}/model/atmos/"]
{% endif %}
{% if repair_replay and path_exists(working_dir ~ "/GFSPRS.GrbF03") %}
analysis:
  - ["{{ working_dir }}/GFS*.GrbF03", "{{ destination_root }}/gdas.{{ pdy }}/{{ hour }}/analysis/atmos/"]
{% endif %}
"#;

struct Experiment {
    dir: TempDir,
}

impl Experiment {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let ics = dir.path().join("ics/2024060100");
        fs::create_dir_all(&ics).unwrap();
        fs::write(ics.join("gfs_ctrl.nc"), "ctrl").unwrap();
        for tile in 1..=6 {
            fs::write(ics.join(format!("sfc_data.tile{tile}.nc")), format!("tile{tile}")).unwrap();
        }
        fs::create_dir_all(dir.path().join("comrot")).unwrap();
        fs::create_dir_all(dir.path().join("work")).unwrap();
        fs::write(dir.path().join("master.yaml.j2"), MANIFEST_TEMPLATE).unwrap();
        Self { dir }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn config_text(&self, flags: &str) -> String {
        format!(
            r#"
cycle = "2024060100"
destination_root = "{root}"
manifest_template = "{template}"
working_dir = "{work}"

[flags]
{flags}

[sources]
archive_base = "/NCEPDEV/emc-global/ICs"

[vars]
ICSDIR = "{ics}"
"#,
            root = self.path("comrot").display(),
            template = self.path("master.yaml.j2").display(),
            work = self.path("work").display(),
            ics = self.path("ics").display(),
        )
    }

    fn config(&self, flags: &str) -> StageConfig {
        StageConfig::parse(&self.config_text(flags)).unwrap()
    }

    fn write_config(&self, flags: &str) -> PathBuf {
        let path = self.path("stage.toml");
        fs::write(&path, self.config_text(flags)).unwrap();
        path
    }
}

/// Full run: config → retrieval doubles → manifest → sync → JSONL log.
#[tokio::test]
async fn test_staging_run_end_to_end() {
    let exp = Experiment::new();
    let config = exp.config(
        "download_archive = true\nrepair_replay = true\ndownload_analysis = true",
    );
    let cycle = config.resolve_cycle(None).unwrap();
    let request = config.into_request(cycle);
    let stager = Stager::new(RecordingArchive::default(), RecordingStore::default());

    let report = stager.run(&request).await.unwrap();

    // Retrieval
    let archive_calls = stager.archive().calls.lock().unwrap().clone();
    assert_eq!(
        archive_calls,
        vec![(
            "/NCEPDEV/emc-global/ICs/2024060100.tar".to_string(),
            exp.path("work")
        )]
    );
    assert_eq!(
        *stager.store().calls.lock().unwrap(),
        vec![
            "s3://noaa-ufs-gefsv13replay-pds/2024/06/2024060100/GFSPRS.GrbF03".to_string(),
            "s3://noaa-ufs-gefsv13replay-pds/2024/06/2024060100/GFSFLX.GrbF03".to_string(),
        ]
    );
    assert_eq!(report.retrieval.archive, StepOutcome::Completed);

    // Manifest groups in declaration order
    let names: Vec<&str> = report.manifest.groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["atmosphere", "restart", "analysis"]);

    // Files on disk
    let cycle_dir = exp.path("comrot/gdas.20240601/00");
    assert_eq!(
        fs::read_to_string(cycle_dir.join("model/atmos/input/sfc_data.tile3.nc")).unwrap(),
        "tile3"
    );
    assert!(cycle_dir.join("model/atmos/input/gfs_ctrl.nc").is_file());
    assert!(cycle_dir.join("model/atmos/RESTART/fv_core.res.nc").is_file());
    assert!(cycle_dir.join("analysis/atmos/GFSFLX.GrbF03").is_file());

    // Missing optional increment is skipped, not fatal
    assert_eq!(report.sync.skipped_count(), 1);
    assert_eq!(report.sync.totals().copied, 7 + 2 + 2);

    // Log
    let logger = JsonlLogger::new(exp.path(".stage")).unwrap();
    logger.append(&StageOutcome::from_report(&report)).unwrap();
    let history = logger.read_all().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].cycle, "2024060100");
    assert_eq!(history[0].status, RunStatus::Success);
    assert_eq!(history[0].files_copied, 11);
    assert_eq!(history[0].optional_skipped, 1);
}

#[tokio::test]
async fn test_rerun_copies_nothing() {
    let exp = Experiment::new();
    let config = exp.config("download_archive = true");
    let request = config.clone().into_request(config.resolve_cycle(None).unwrap());
    let stager = Stager::new(RecordingArchive::default(), RecordingStore::default());

    let first = stager.run(&request).await.unwrap();
    let second = stager.run(&request).await.unwrap();

    assert!(first.sync.totals().copied > 0);
    assert_eq!(second.sync.totals().copied, 0);
    assert_eq!(second.sync.totals().unchanged, first.sync.totals().copied);
    assert_eq!(first.manifest, second.manifest);
}

#[tokio::test]
async fn test_no_flags_means_no_retrieval_and_no_optional_groups() {
    let exp = Experiment::new();
    let config = exp.config("");
    let request = config.clone().into_request(config.resolve_cycle(None).unwrap());
    let stager = Stager::new(RecordingArchive::default(), RecordingStore::default());

    let report = stager.run(&request).await.unwrap();

    assert!(stager.archive().calls.lock().unwrap().is_empty());
    assert!(stager.store().calls.lock().unwrap().is_empty());
    assert_eq!(report.manifest.groups.len(), 1);
    assert!(!exp.path("comrot/gdas.20240601/00/model/atmos/RESTART").exists());
}

#[tokio::test]
async fn test_missing_destination_root_is_fatal_after_retrieval() {
    let exp = Experiment::new();
    fs::remove_dir_all(exp.path("comrot")).unwrap();
    let config = exp.config("download_archive = true");
    let request = config.clone().into_request(config.resolve_cycle(None).unwrap());
    let stager = Stager::new(RecordingArchive::default(), RecordingStore::default());

    let err = stager.run(&request).await.unwrap_err();

    assert!(matches!(
        err,
        StageError::Configuration(ConfigurationError::MissingDestinationRoot(_))
    ));
    assert!(err.to_string().starts_with("FATAL ERROR"));
    assert_eq!(stager.archive().calls.lock().unwrap().len(), 1);
    assert!(!exp.path("comrot").exists());
}

#[tokio::test]
async fn test_best_effort_analysis_failure_continues() {
    let exp = Experiment::new();
    let mut text = exp.config_text("repair_replay = true\ndownload_analysis = true");
    text.push_str("\n[retrieval]\nbest_effort = [\"analysis\"]\n");
    let config = StageConfig::parse(&text).unwrap();
    let request = config.clone().into_request(config.resolve_cycle(None).unwrap());
    let store = RecordingStore {
        fail: true,
        ..RecordingStore::default()
    };
    let stager = Stager::new(RecordingArchive::default(), store);

    let report = stager.run(&request).await.unwrap();

    assert!(matches!(report.retrieval.analysis, StepOutcome::Tolerated(_)));
    assert!(report.manifest.group("analysis").is_none());
}

#[tokio::test]
async fn test_required_analysis_failure_is_fatal() {
    let exp = Experiment::new();
    let config = exp.config("repair_replay = true\ndownload_analysis = true");
    let request = config.clone().into_request(config.resolve_cycle(None).unwrap());
    let store = RecordingStore {
        fail: true,
        ..RecordingStore::default()
    };
    let stager = Stager::new(RecordingArchive::default(), store);

    let err = stager.run(&request).await.unwrap_err();

    assert_eq!(err.stage(), "retrieval");
    assert!(err.to_string().contains("GFSPRS.GrbF03"));
    assert!(!exp.path("comrot/gdas.20240601").exists());
}

#[tokio::test]
async fn test_parallel_workers_match_sequential_result() {
    let exp = Experiment::new();
    let mut text = exp.config_text("");
    text.push_str("\n[sync]\nworkers = 4\n");
    let config = StageConfig::parse(&text).unwrap();
    let request = config.clone().into_request(config.resolve_cycle(None).unwrap());
    let stager = Stager::new(RecordingArchive::default(), RecordingStore::default());

    let report = stager.run(&request).await.unwrap();

    assert_eq!(report.sync.totals().copied, 7);
    for tile in 1..=6 {
        assert!(exp
            .path(&format!(
                "comrot/gdas.20240601/00/model/atmos/input/sfc_data.tile{tile}.nc"
            ))
            .is_file());
    }
}

#[test]
fn test_cli_dry_run_prints_manifest() {
    let exp = Experiment::new();
    let config = exp.write_config("");

    let output = Command::new(env!("CARGO_BIN_EXE_icstage"))
        .arg("--config")
        .arg(&config)
        .arg("--log-dir")
        .arg(exp.path(".stage"))
        .arg("--dry-run")
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("atmosphere:"), "got: {stdout}");
    assert!(stdout.contains("sfc_data.tile6.nc"));
    assert!(!exp.path("comrot/gdas.20240601").exists());
}

#[test]
fn test_cli_missing_destination_exits_nonzero_and_logs() {
    let exp = Experiment::new();
    fs::remove_dir_all(exp.path("comrot")).unwrap();
    let config = exp.write_config("");

    let output = Command::new(env!("CARGO_BIN_EXE_icstage"))
        .arg("--config")
        .arg(&config)
        .arg("--log-dir")
        .arg(exp.path(".stage"))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("FATAL ERROR"), "got: {stderr}");
    assert!(stderr.contains("comrot"));

    let history = JsonlLogger::new(exp.path(".stage")).unwrap().read_all().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, RunStatus::Failed);
    assert_eq!(history[0].stage.as_deref(), Some("configuration"));
}

#[test]
fn test_cli_check_reports_missing_template() {
    let exp = Experiment::new();
    fs::remove_file(exp.path("master.yaml.j2")).unwrap();
    let config = exp.write_config("");

    let output = Command::new(env!("CARGO_BIN_EXE_icstage"))
        .arg("--config")
        .arg(&config)
        .arg("--log-dir")
        .arg(exp.path(".stage"))
        .arg("--check")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("P002"), "got: {stderr}");
}

#[test]
fn test_cli_cycle_flag_overrides_config() {
    let exp = Experiment::new();
    let config = exp.write_config("");

    // No ICs exist for this cycle, so the glob loop is empty and the control file is missing
    let output = Command::new(env!("CARGO_BIN_EXE_icstage"))
        .arg("--config")
        .arg(&config)
        .arg("--cycle")
        .arg("2024060112")
        .arg("--log-dir")
        .arg(exp.path(".stage"))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let history = JsonlLogger::new(exp.path(".stage")).unwrap().read_all().unwrap();
    assert_eq!(history[0].cycle, "2024060112");
    assert_eq!(history[0].stage.as_deref(), Some("sync"));
}
