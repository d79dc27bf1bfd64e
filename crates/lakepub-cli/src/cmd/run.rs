//! Run subcommand - one export run

use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::Args;
use lakepub_core::SharedProgress;
use lakepub_export::Status;

use super::{client, parse_date, print_summary, summary_rows};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Reference date (YYYY-MM-DD), default yesterday
    #[arg(short, long, value_parser = parse_date)]
    pub date: Option<NaiveDate>,

    /// Status to export (Pending, Approved, Rejected)
    #[arg(short, long, value_parser = parse_status)]
    pub status: Option<Status>,

    /// Output base directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Concurrent flag updates
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Zstd compression level (1-22)
    #[arg(short, long)]
    pub zstd_level: Option<i32>,

    /// Fetch and filter only; write nothing, flag nothing
    #[arg(long)]
    pub dry_run: bool,
}

fn parse_status(s: &str) -> Result<Status, String> {
    Status::from_name(s).ok_or_else(|| format!("Unknown status: {s}"))
}

pub fn run(args: RunArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let mut export = config.to_export_config()?;
    if let Some(date) = args.date {
        export.reference_date = Some(date);
    }
    if let Some(status) = args.status {
        export.target_status = status;
    }
    if let Some(output) = args.output {
        export.output_base_path = output;
    }
    if let Some(workers) = args.workers {
        export.reconcile_workers = workers.max(1);
    }
    if let Some(level) = args.zstd_level {
        anyhow::ensure!((1..=22).contains(&level), "zstd level must be within 1..=22");
        export.zstd_level = level;
    }
    export.dry_run = args.dry_run;

    let source = client(&export)?;
    let summary = lakepub_export::run(&export, &source, progress)?;

    let title = if summary.dry_run { "Dry run" } else { "Export" };
    print_summary(title, &summary_rows(&summary));
    Ok(())
}
