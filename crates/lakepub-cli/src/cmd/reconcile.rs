//! Reconcile subcommand - retry flag updates for an exported partition

use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::Args;
use lakepub_core::SharedProgress;

use super::{client, parse_date, print_summary, summary_rows};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Reference date of the partition (YYYY-MM-DD), default yesterday
    #[arg(short, long, value_parser = parse_date)]
    pub date: Option<NaiveDate>,

    /// Output base directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Concurrent flag updates
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Flag every id in the artifact, not only pending ones
    #[arg(long)]
    pub all: bool,
}

pub fn run(args: ReconcileArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let mut export = config.to_export_config()?;
    export.reference_date = args.date.or(export.reference_date);
    if let Some(output) = args.output {
        export.output_base_path = output;
    }
    if let Some(workers) = args.workers {
        export.reconcile_workers = workers.max(1);
    }

    let source = client(&export)?;
    let summary = lakepub_export::reconcile_partition(&export, &source, progress, args.all)?;

    print_summary("Reconcile", &summary_rows(&summary));
    Ok(())
}
