//! Export run: fetch, filter, write, reconcile, report

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use lakepub_core::{ExportError, ProgressContext, cleanup_tmp_files, fmt_num, is_valid_parquet};
use rustc_hash::FxHashSet;

use crate::client::RecordSource;
use crate::config::ExportConfig;
use crate::filter::select;
use crate::manifest::PartitionManifest;
use crate::partition::{ARTIFACT_FILE_NAME, partition_dir};
use crate::reconcile::{ReconcileReport, reconcile};
use crate::record::{Record, Status};
use crate::writer::{ArtifactRow, read_artifact, write_rows};

/// Where a run is. `Failed` is only entered from `Fetching` or `Writing`.
///
/// A reconcile-only run loads its partition under `Fetching`, then goes
/// straight to `Reconciling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Fetching,
    Filtering,
    /// Nothing selected
    Idle,
    Writing,
    Reconciling,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetching => "fetching",
            Self::Filtering => "filtering",
            Self::Idle => "idle",
            Self::Writing => "writing",
            Self::Reconciling => "reconciling",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn advance(state: &mut RunState, next: RunState) {
    log::debug!("Run state: {state} -> {next}");
    *state = next;
}

/// A run that ended in `Failed`
#[derive(Debug)]
pub struct RunFailure {
    /// State the run was in when it failed
    pub state: RunState,
    pub error: ExportError,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "export failed while {}: {}", self.state, self.error)
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

fn fail(state: &mut RunState) -> impl FnOnce(ExportError) -> RunFailure + '_ {
    move |error| {
        let failed_in = *state;
        advance(state, RunState::Failed);
        RunFailure {
            state: failed_in,
            error,
        }
    }
}

/// Outcome of a run that reached `Done`
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub reference_date: NaiveDate,
    pub target_status: Status,
    pub fetched: usize,
    /// Ids selected by the filter, in selection order
    pub selected_ids: Vec<String>,
    /// Rows added to the artifact by this run
    pub written: usize,
    pub artifact: Option<PathBuf>,
    pub reconciliation: ReconcileReport,
    pub dry_run: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    fn new(config: &ExportConfig) -> Self {
        Self {
            reference_date: config.reference_date(),
            target_status: config.target_status,
            fetched: 0,
            selected_ids: Vec::new(),
            written: 0,
            artifact: None,
            reconciliation: ReconcileReport::default(),
            dry_run: config.dry_run,
            elapsed: Duration::ZERO,
        }
    }

    pub fn selected(&self) -> usize {
        self.selected_ids.len()
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.reconciliation.failed_ids()
    }

    /// Summary log lines, emitted once at the end of a run
    pub fn log(&self) {
        log::info!("=== Export Summary ===");
        log::info!(
            "Reference date: {} ({})",
            self.reference_date,
            self.target_status
        );
        log::info!(
            "Records: {} fetched, {} selected",
            fmt_num(self.fetched),
            fmt_num(self.selected())
        );
        match &self.artifact {
            Some(path) => log::info!(
                "Artifact: {} ({} new rows)",
                path.display(),
                fmt_num(self.written)
            ),
            None => log::info!("Artifact: none"),
        }
        let r = &self.reconciliation;
        log::info!(
            "Flags: {}/{} updated, {} failed",
            r.succeeded,
            r.attempted,
            r.failed.len()
        );
        if r.is_partial() {
            log::warn!("Flag updates pending for: {}", self.failed_ids().join(", "));
        }
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
    }
}

/// Execute one export run.
///
/// Flags are only touched after the artifact has been renamed into place.
/// Failed flag updates leave the run `Done`; they are listed in the summary
/// and in the partition manifest's pending ids.
pub fn run(
    config: &ExportConfig,
    source: &dyn RecordSource,
    progress: &ProgressContext,
) -> Result<RunSummary, RunFailure> {
    let start = Instant::now();
    let config = &config.pinned();
    let criteria = config.criteria();
    let mut summary = RunSummary::new(config);
    let mut state = RunState::Fetching;

    log::info!(
        "Exporting {} expenses ending {} ({} calendar)",
        criteria.status,
        criteria.reference_date,
        criteria.basis
    );

    let line = progress.stage_line("fetch");
    line.set_message("listing records");
    let fetched = source.list_all();
    line.finish_and_clear();
    let records = fetched.map_err(fail(&mut state))?;
    summary.fetched = records.len();
    log::info!("Fetched {} records", fmt_num(records.len()));

    advance(&mut state, RunState::Filtering);
    let selected = select(&records, &criteria);
    summary.selected_ids = selected.iter().map(|r| r.id.clone()).collect();
    log::info!("Selected {} records", fmt_num(selected.len()));

    if selected.is_empty() {
        advance(&mut state, RunState::Idle);
        advance(&mut state, RunState::Done);
        summary.elapsed = start.elapsed();
        summary.log();
        return Ok(summary);
    }

    let dir = partition_dir(&config.output_base_path, criteria.reference_date);
    if config.dry_run {
        log::info!(
            "Dry run: would write {} records to {}",
            selected.len(),
            dir.join(ARTIFACT_FILE_NAME).display()
        );
        for id in &summary.selected_ids {
            progress.println(format!("would export {id}"));
        }
        advance(&mut state, RunState::Done);
        summary.elapsed = start.elapsed();
        summary.log();
        return Ok(summary);
    }

    advance(&mut state, RunState::Writing);
    let line = progress.stage_line("write");
    line.set_message(dir.display().to_string());
    let written = write_partition(config, &dir, &selected);
    line.finish_and_clear();
    let written = written.map_err(fail(&mut state))?;
    summary.written = written.added;
    summary.artifact = Some(dir.join(ARTIFACT_FILE_NAME));

    advance(&mut state, RunState::Reconciling);
    let to_mark = ids_to_mark(&written.ids, &summary.selected_ids);
    let pb = progress.task_bar("reconcile", to_mark.len() as u64);
    summary.reconciliation = reconcile(source, &to_mark, config.reconcile_workers, &pb);
    pb.finish_and_clear();

    if let Some(mut manifest) = written.manifest {
        update_pending(&mut manifest, &to_mark, &summary.reconciliation);
        save_manifest(&manifest, &dir);
    }

    advance(&mut state, RunState::Done);
    summary.elapsed = start.elapsed();
    summary.log();
    Ok(summary)
}

/// Retry flag updates for a partition that was already written.
///
/// Marks the manifest's pending ids, or every id in the artifact with `all`,
/// then rewrites the pending list. The artifact is never touched.
pub fn reconcile_partition(
    config: &ExportConfig,
    source: &dyn RecordSource,
    progress: &ProgressContext,
    all: bool,
) -> Result<RunSummary, RunFailure> {
    let start = Instant::now();
    let config = &config.pinned();
    let mut summary = RunSummary::new(config);
    let mut state = RunState::Fetching;
    let dir = partition_dir(&config.output_base_path, summary.reference_date);

    let mut manifest = PartitionManifest::read_from(&dir)
        .and_then(|m| {
            m.ok_or_else(|| {
                ExportError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no manifest in {}", dir.display()),
                ))
            })
        })
        .map_err(fail(&mut state))?;

    match manifest.verify(&dir) {
        Ok(true) => {}
        Ok(false) => log::warn!(
            "{} changed since its manifest was written",
            manifest.artifact
        ),
        Err(e) => return Err(fail(&mut state)(e)),
    }

    let ids = if all {
        let rows = read_artifact(&dir.join(&manifest.artifact)).map_err(fail(&mut state))?;
        dedup_ids(rows.iter().map(|r| r.id.as_str()))
    } else {
        manifest.pending_ids.clone()
    };
    summary.selected_ids = ids.clone();
    summary.artifact = Some(dir.join(&manifest.artifact));

    advance(&mut state, RunState::Reconciling);
    log::info!(
        "Reconciling {} ids for {}",
        fmt_num(ids.len()),
        summary.reference_date
    );

    let pb = progress.task_bar("reconcile", ids.len() as u64);
    summary.reconciliation = reconcile(source, &ids, config.reconcile_workers, &pb);
    pb.finish_and_clear();

    update_pending(&mut manifest, &ids, &summary.reconciliation);
    save_manifest(&manifest, &dir);

    advance(&mut state, RunState::Done);
    summary.elapsed = start.elapsed();
    summary.log();
    Ok(summary)
}

/// Artifact state after the write step
struct Written {
    /// Rows appended by this run
    added: usize,
    /// Every id in the artifact, in row order
    ids: Vec<String>,
    manifest: Option<PartitionManifest>,
}

/// Write (or extend) the partition's artifact with the selected records.
///
/// Rows already present stay in place; selected ids missing from the artifact
/// are appended and the whole file is rewritten atomically. With nothing new
/// the artifact is left untouched.
fn write_partition(
    config: &ExportConfig,
    dir: &Path,
    selected: &[&Record],
) -> Result<Written, ExportError> {
    let path = dir.join(ARTIFACT_FILE_NAME);

    if dir.is_dir() {
        cleanup_tmp_files(dir)?;
    }

    let existing = if path.exists() {
        if !is_valid_parquet(&path) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("existing artifact {} is unreadable", path.display()),
            )
            .into());
        }
        let rows = read_artifact(&path)?;
        log::info!(
            "Found existing artifact with {} rows, merging",
            fmt_num(rows.len())
        );
        rows
    } else {
        Vec::new()
    };
    let previous = if path.exists() { load_manifest(dir) } else { None };

    // One partition holds exports of a single status
    let wanted = config.target_status.as_str();
    let held = existing
        .iter()
        .map(|r| r.status.as_str())
        .chain(previous.as_ref().map(|m| m.target_status.as_str()))
        .find(|status| *status != wanted);
    if let Some(held) = held {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{} holds {held} exports, refusing to add {wanted} records",
                dir.display()
            ),
        )
        .into());
    }

    let present: FxHashSet<&str> = existing.iter().map(|r| r.id.as_str()).collect();
    let fresh: Vec<ArtifactRow> = selected
        .iter()
        .filter(|r| !present.contains(r.id.as_str()))
        .filter_map(|r| ArtifactRow::from_record(r))
        .collect();

    if fresh.is_empty() {
        log::info!(
            "All selected records already in {}, artifact unchanged",
            path.display()
        );
        let ids: Vec<String> = existing.into_iter().map(|r| r.id).collect();
        let manifest =
            previous.or_else(|| new_manifest(config, dir, ids.clone(), None));
        return Ok(Written {
            added: 0,
            ids,
            manifest,
        });
    }

    let added = fresh.len();
    let mut rows = existing;
    rows.extend(fresh);
    write_rows(&rows, &path, config.zstd_level)?;
    log::info!(
        "Wrote {} rows ({} new) to {}",
        fmt_num(rows.len()),
        fmt_num(added),
        path.display()
    );

    let ids: Vec<String> = rows.into_iter().map(|r| r.id).collect();
    let fresh_ids = ids[ids.len() - added..].to_vec();
    let manifest = new_manifest(config, dir, ids.clone(), previous.map(|p| (p, fresh_ids)));
    if let Some(m) = &manifest {
        save_manifest(m, dir);
    }
    Ok(Written {
        added,
        ids,
        manifest,
    })
}

/// Manifest for the artifact now in `dir`. With a previous manifest, its
/// outstanding ids and creation time carry over and only `fresh` ids join
/// the pending list.
fn new_manifest(
    config: &ExportConfig,
    dir: &Path,
    ids: Vec<String>,
    previous: Option<(PartitionManifest, Vec<String>)>,
) -> Option<PartitionManifest> {
    let mut manifest = match PartitionManifest::for_artifact(
        dir,
        config.reference_date(),
        config.target_status.as_str(),
        ids,
    ) {
        Ok(m) => m,
        Err(e) => {
            log::warn!("Could not describe artifact in {}: {e}", dir.display());
            return None;
        }
    };
    if let Some((prev, fresh)) = previous {
        manifest.created_at = prev.created_at;
        manifest.pending_ids = prev.pending_ids;
        manifest.pending_ids.extend(fresh);
    }
    Some(manifest)
}

fn load_manifest(dir: &Path) -> Option<PartitionManifest> {
    match PartitionManifest::read_from(dir) {
        Ok(m) => m,
        Err(e) => {
            log::warn!("Ignoring unreadable manifest in {}: {e}", dir.display());
            None
        }
    }
}

/// Manifest problems never fail a run whose artifact is in place
fn save_manifest(manifest: &PartitionManifest, dir: &Path) {
    if let Err(e) = manifest.write_to(dir) {
        log::warn!("Could not write manifest in {}: {e}", dir.display());
    }
}

/// Drop ids that were marked, add ids whose update failed
fn update_pending(manifest: &mut PartitionManifest, attempted: &[String], report: &ReconcileReport) {
    let failed: FxHashSet<&str> = report.failed.iter().map(|f| f.id.as_str()).collect();
    let marked: FxHashSet<&str> = attempted
        .iter()
        .map(String::as_str)
        .filter(|id| !failed.contains(id))
        .collect();

    let mut pending: Vec<String> = manifest
        .pending_ids
        .iter()
        .filter(|id| !marked.contains(id.as_str()))
        .cloned()
        .collect();
    for f in &report.failed {
        if !pending.contains(&f.id) {
            pending.push(f.id.clone());
        }
    }
    manifest.set_pending(dedup_ids(pending.iter().map(String::as_str)));
}

/// Selected ids in artifact row order, each once
fn ids_to_mark(artifact_ids: &[String], selected_ids: &[String]) -> Vec<String> {
    let wanted: FxHashSet<&str> = selected_ids.iter().map(String::as_str).collect();
    dedup_ids(
        artifact_ids
            .iter()
            .map(String::as_str)
            .filter(|id| wanted.contains(id)),
    )
}

fn dedup_ids<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = FxHashSet::default();
    ids.filter(|id| seen.insert(*id)).map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::FlagFailure;
    use chrono::Utc;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn manifest(pending: &[&str]) -> PartitionManifest {
        PartitionManifest {
            format_version: 1,
            reference_date: NaiveDate::from_ymd_opt(2024, 2, 2).unwrap(),
            target_status: "Approved".into(),
            artifact: ARTIFACT_FILE_NAME.into(),
            record_ids: strings(&["a", "b", "c", "d"]),
            row_count: 4,
            content_hash: String::new(),
            pending_ids: strings(pending),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn mark_order_follows_artifact() {
        let artifact = strings(&["old1", "b", "old2", "a", "c"]);
        let selected = strings(&["a", "b", "c", "old2"]);
        assert_eq!(
            ids_to_mark(&artifact, &selected),
            strings(&["b", "old2", "a", "c"])
        );
    }

    #[test]
    fn duplicate_rows_marked_once() {
        let artifact = strings(&["a", "a", "b"]);
        assert_eq!(
            ids_to_mark(&artifact, &strings(&["a", "b"])),
            strings(&["a", "b"])
        );
    }

    #[test]
    fn pending_list_update() {
        let mut m = manifest(&["a", "b", "c"]);
        let report = ReconcileReport {
            attempted: 3,
            succeeded: 2,
            failed: vec![FlagFailure {
                id: "d".into(),
                reason: "HTTP 500".into(),
            }],
        };
        update_pending(&mut m, &strings(&["a", "c", "d"]), &report);
        assert_eq!(m.pending_ids, strings(&["b", "d"]));
    }

    #[test]
    fn failure_message_names_state() {
        let failure = RunFailure {
            state: RunState::Writing,
            error: ExportError::Io(io::Error::other("disk full")),
        };
        assert_eq!(
            failure.to_string(),
            "export failed while writing: IO: disk full"
        );
    }

    #[test]
    fn fail_moves_to_failed() {
        let mut state = RunState::Fetching;
        let failure = fail(&mut state)(ExportError::Decode("bad".into()));
        assert_eq!(failure.state, RunState::Fetching);
        assert_eq!(state, RunState::Failed);
    }
}
