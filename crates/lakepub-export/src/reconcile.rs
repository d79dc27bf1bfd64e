//! Flag reconciliation: one `mark_exported` per exported id, fanned out over
//! a bounded pool, every outcome kept

use indicatif::ProgressBar;
use rayon::prelude::*;

use crate::client::{MarkOutcome, RecordSource};

/// A flag update that did not go through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagFailure {
    pub id: String,
    pub reason: String,
}

/// Outcome of a reconciliation pass, failures in the order ids were given
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<FlagFailure>,
}

impl ReconcileReport {
    pub fn failed_ids(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.id.clone()).collect()
    }

    /// Some but not necessarily all updates failed
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Call `mark_exported` for every id, never stopping early.
///
/// `workers <= 1` runs sequentially on the calling thread.
pub fn reconcile(
    source: &dyn RecordSource,
    ids: &[String],
    workers: usize,
    pb: &ProgressBar,
) -> ReconcileReport {
    let mark = |id: &String| {
        let outcome = source.mark_exported(id);
        if let MarkOutcome::Failed(reason) = &outcome {
            log::warn!("Flag update failed for {id}: {reason}");
        }
        pb.inc(1);
        outcome
    };

    let outcomes: Vec<MarkOutcome> = if workers <= 1 || ids.len() <= 1 {
        ids.iter().map(mark).collect()
    } else {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(workers.min(ids.len()))
            .thread_name(|i| format!("reconcile-{i}"))
            .build()
        {
            // Indexed collect keeps outcomes aligned with `ids`
            Ok(pool) => pool.install(|| ids.par_iter().map(mark).collect()),
            Err(e) => {
                log::warn!("Reconcile pool unavailable ({e}), running sequentially");
                ids.iter().map(mark).collect()
            }
        }
    };

    let mut report = ReconcileReport {
        attempted: ids.len(),
        ..Default::default()
    };
    for (id, outcome) in ids.iter().zip(outcomes) {
        match outcome {
            MarkOutcome::Marked => report.succeeded += 1,
            MarkOutcome::Failed(reason) => report.failed.push(FlagFailure {
                id: id.clone(),
                reason,
            }),
        }
    }
    report
}
