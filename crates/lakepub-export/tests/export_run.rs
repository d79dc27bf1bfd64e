//! End-to-end export runs against an in-memory record service

use std::path::Path;
use std::sync::Mutex;

use chrono::{NaiveDate, TimeZone, Utc};
use lakepub_core::{ExportError, HttpError, ProgressContext};
use lakepub_export::{
    ExportConfig, MarkOutcome, PartitionManifest, Record, RecordSource, RunState, Status,
    artifact_path, partition_dir, read_artifact, reconcile_partition, run,
};
use tempfile::TempDir;

struct FakeService {
    records: Vec<Record>,
    unreachable: bool,
    reject: Vec<String>,
    marks: Mutex<Vec<String>>,
}

impl FakeService {
    fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            unreachable: false,
            reject: Vec::new(),
            marks: Mutex::new(Vec::new()),
        }
    }

    fn rejecting(mut self, ids: &[&str]) -> Self {
        self.reject = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    fn marks(&self) -> Vec<String> {
        let mut marks = self.marks.lock().unwrap().clone();
        marks.sort();
        marks
    }
}

impl RecordSource for FakeService {
    fn list_all(&self) -> Result<Vec<Record>, ExportError> {
        if self.unreachable {
            return Err(HttpError::other("connection failed").into());
        }
        Ok(self.records.clone())
    }

    fn mark_exported(&self, id: &str) -> MarkOutcome {
        self.marks.lock().unwrap().push(id.to_string());
        if self.reject.iter().any(|r| r == id) {
            MarkOutcome::Failed("HTTP 500: Internal Server Error".into())
        } else {
            MarkOutcome::Marked
        }
    }
}

fn reference() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 14).unwrap()
}

fn expense(id: &str, status: Status, exported: bool) -> Record {
    Record {
        status: Some(status),
        exported,
        end_date: Some(Utc.with_ymd_and_hms(2024, 5, 14, 16, 20, 0).unwrap()),
        comment: Some("client visit".into()),
        ..Record::new(
            id,
            format!("Expense {id}"),
            Utc.with_ymd_and_hms(2024, 5, 13, 8, 0, 0).unwrap(),
        )
    }
}

fn config(base: &Path) -> ExportConfig {
    ExportConfig {
        output_base_path: base.to_path_buf(),
        reference_date: Some(reference()),
        reconcile_workers: 2,
        ..Default::default()
    }
}

fn artifact_ids(base: &Path) -> Vec<String> {
    read_artifact(&artifact_path(base, reference()))
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect()
}

#[test]
fn only_unexported_approved_record_is_exported() {
    let dir = TempDir::new().unwrap();
    let service = FakeService::new(vec![
        expense("a", Status::Approved, false),
        expense("b", Status::Approved, true),
        expense("c", Status::Pending, false),
    ]);

    let summary = run(&config(dir.path()), &service, &ProgressContext::hidden()).unwrap();

    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.selected_ids, vec!["a"]);
    assert_eq!(summary.written, 1);
    let path = artifact_path(dir.path(), reference());
    assert_eq!(summary.artifact.as_deref(), Some(path.as_path()));
    assert!(path.ends_with("2024/05/14/expenses.parquet"));

    let rows = read_artifact(&path).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "a");
    assert!(rows[0].exported);
    assert_eq!(service.marks(), vec!["a"]);
    assert!(summary.failed_ids().is_empty());
}

#[test]
fn empty_fetch_has_no_side_effects() {
    let dir = TempDir::new().unwrap();
    let service = FakeService::new(Vec::new());

    let summary = run(&config(dir.path()), &service, &ProgressContext::hidden()).unwrap();

    assert_eq!(summary.selected(), 0);
    assert!(summary.artifact.is_none());
    assert!(service.marks().is_empty());
    assert!(!partition_dir(dir.path(), reference()).exists());
    assert!(!dir.path().join("2024").exists());
}

#[test]
fn nothing_eligible_creates_no_directory() {
    let dir = TempDir::new().unwrap();
    let service = FakeService::new(vec![
        expense("b", Status::Approved, true),
        expense("c", Status::Rejected, false),
    ]);

    let summary = run(&config(dir.path()), &service, &ProgressContext::hidden()).unwrap();
    assert!(summary.artifact.is_none());
    assert!(!dir.path().join("2024").exists());
    assert!(service.marks().is_empty());
}

#[test]
fn fetch_failure_fails_run_without_output() {
    let dir = TempDir::new().unwrap();
    let mut service = FakeService::new(vec![expense("a", Status::Approved, false)]);
    service.unreachable = true;

    let failure = run(&config(dir.path()), &service, &ProgressContext::hidden()).unwrap_err();

    assert_eq!(failure.state, RunState::Fetching);
    assert_eq!(failure.error.kind(), "transport");
    assert!(!dir.path().join("2024").exists());
    assert!(service.marks().is_empty());
}

#[test]
fn write_failure_skips_reconciliation() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("data");
    std::fs::write(&base, b"not a directory").unwrap();
    let service = FakeService::new(vec![
        expense("a", Status::Approved, false),
        expense("d", Status::Approved, false),
    ]);

    let failure = run(&config(&base), &service, &ProgressContext::hidden()).unwrap_err();

    assert_eq!(failure.state, RunState::Writing);
    assert_eq!(failure.error.kind(), "io");
    assert!(service.marks().is_empty());
}

#[test]
fn partial_flag_failure_still_done() {
    let dir = TempDir::new().unwrap();
    let ids = ["r1", "r2", "r3", "r4", "r5"];
    let service = FakeService::new(
        ids.iter()
            .map(|id| expense(id, Status::Approved, false))
            .collect(),
    )
    .rejecting(&["r2", "r5"]);

    let summary = run(&config(dir.path()), &service, &ProgressContext::hidden()).unwrap();

    assert_eq!(artifact_ids(dir.path()), ids);
    assert_eq!(summary.reconciliation.attempted, 5);
    assert_eq!(summary.reconciliation.succeeded, 3);
    assert_eq!(summary.failed_ids(), vec!["r2", "r5"]);
    assert_eq!(service.marks(), ids);

    let manifest = PartitionManifest::read_from(&partition_dir(dir.path(), reference()))
        .unwrap()
        .unwrap();
    assert_eq!(manifest.record_ids, ids);
    assert_eq!(manifest.pending_ids, vec!["r2", "r5"]);
    assert_eq!(manifest.target_status, "Approved");
}

#[test]
fn rerun_appends_new_rows_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let cfg = config(dir.path());

    let first = FakeService::new(vec![
        expense("a", Status::Approved, false),
        expense("b", Status::Approved, false),
    ])
    .rejecting(&["b"]);
    run(&cfg, &first, &ProgressContext::hidden()).unwrap();
    assert_eq!(artifact_ids(dir.path()), vec!["a", "b"]);

    // "b" never got flagged and "e" became eligible since
    let second = FakeService::new(vec![
        expense("a", Status::Approved, true),
        expense("b", Status::Approved, false),
        expense("e", Status::Approved, false),
    ]);
    let summary = run(&cfg, &second, &ProgressContext::hidden()).unwrap();

    assert_eq!(summary.written, 1);
    assert_eq!(artifact_ids(dir.path()), vec!["a", "b", "e"]);
    assert_eq!(second.marks(), vec!["b", "e"]);

    let manifest = PartitionManifest::read_from(&partition_dir(dir.path(), reference()))
        .unwrap()
        .unwrap();
    assert!(manifest.pending_ids.is_empty());
    assert_eq!(manifest.row_count, 3);
    assert!(manifest.verify(&partition_dir(dir.path(), reference())).unwrap());
}

#[test]
fn rerun_with_nothing_new_leaves_artifact_untouched() {
    let dir = TempDir::new().unwrap();
    let cfg = config(dir.path());
    let service = FakeService::new(vec![expense("a", Status::Approved, false)]).rejecting(&["a"]);

    run(&cfg, &service, &ProgressContext::hidden()).unwrap();
    let path = artifact_path(dir.path(), reference());
    let before = std::fs::read(&path).unwrap();

    let retry = FakeService::new(vec![expense("a", Status::Approved, false)]);
    let summary = run(&cfg, &retry, &ProgressContext::hidden()).unwrap();

    assert_eq!(summary.written, 0);
    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(retry.marks(), vec!["a"]);
    let manifest = PartitionManifest::read_from(&partition_dir(dir.path(), reference()))
        .unwrap()
        .unwrap();
    assert!(manifest.pending_ids.is_empty());
}

#[test]
fn dry_run_writes_and_flags_nothing() {
    let dir = TempDir::new().unwrap();
    let cfg = ExportConfig {
        dry_run: true,
        ..config(dir.path())
    };
    let service = FakeService::new(vec![expense("a", Status::Approved, false)]);

    let summary = run(&cfg, &service, &ProgressContext::hidden()).unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.selected_ids, vec!["a"]);
    assert!(summary.artifact.is_none());
    assert!(!dir.path().join("2024").exists());
    assert!(service.marks().is_empty());
}

#[test]
fn reconcile_only_marks_pending_ids() {
    let dir = TempDir::new().unwrap();
    let cfg = config(dir.path());
    let first = FakeService::new(vec![
        expense("a", Status::Approved, false),
        expense("b", Status::Approved, false),
        expense("c", Status::Approved, false),
    ])
    .rejecting(&["a", "c"]);
    run(&cfg, &first, &ProgressContext::hidden()).unwrap();
    let path = artifact_path(dir.path(), reference());
    let before = std::fs::read(&path).unwrap();

    let retry = FakeService::new(Vec::new()).rejecting(&["c"]);
    let summary = reconcile_partition(&cfg, &retry, &ProgressContext::hidden(), false).unwrap();

    assert_eq!(retry.marks(), vec!["a", "c"]);
    assert_eq!(summary.failed_ids(), vec!["c"]);
    assert_eq!(std::fs::read(&path).unwrap(), before);
    let manifest = PartitionManifest::read_from(&partition_dir(dir.path(), reference()))
        .unwrap()
        .unwrap();
    assert_eq!(manifest.pending_ids, vec!["c"]);
}

#[test]
fn reconcile_all_marks_every_artifact_id() {
    let dir = TempDir::new().unwrap();
    let cfg = config(dir.path());
    let first = FakeService::new(vec![
        expense("a", Status::Approved, false),
        expense("b", Status::Approved, false),
    ]);
    run(&cfg, &first, &ProgressContext::hidden()).unwrap();

    let again = FakeService::new(Vec::new());
    let summary = reconcile_partition(&cfg, &again, &ProgressContext::hidden(), true).unwrap();

    assert_eq!(again.marks(), vec!["a", "b"]);
    assert_eq!(summary.reconciliation.succeeded, 2);
}

#[test]
fn reconcile_without_manifest_fails() {
    let dir = TempDir::new().unwrap();
    let service = FakeService::new(Vec::new());

    let failure = reconcile_partition(
        &config(dir.path()),
        &service,
        &ProgressContext::hidden(),
        false,
    )
    .unwrap_err();

    assert_eq!(failure.state, RunState::Fetching);
    assert_eq!(failure.error.kind(), "io");
    assert!(service.marks().is_empty());
}

#[test]
fn other_status_for_same_date_is_refused() {
    let dir = TempDir::new().unwrap();
    let approved = FakeService::new(vec![expense("a", Status::Approved, false)]);
    run(&config(dir.path()), &approved, &ProgressContext::hidden()).unwrap();
    let path = artifact_path(dir.path(), reference());
    let before = std::fs::read(&path).unwrap();

    let cfg = ExportConfig {
        target_status: Status::Rejected,
        ..config(dir.path())
    };
    let rejected = FakeService::new(vec![expense("r", Status::Rejected, false)]);
    let failure = run(&cfg, &rejected, &ProgressContext::hidden()).unwrap_err();

    assert_eq!(failure.state, RunState::Writing);
    assert_eq!(failure.error.kind(), "io");
    assert!(failure.to_string().contains("Approved"));
    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert!(rejected.marks().is_empty());

    let manifest = PartitionManifest::read_from(&partition_dir(dir.path(), reference()))
        .unwrap()
        .unwrap();
    assert_eq!(manifest.target_status, "Approved");
    assert_eq!(manifest.record_ids, vec!["a"]);
}
