//! lakepub - export approved expenses to a partitioned Parquet lake
//!
//! Pulls records from the expense service, writes the ones that ended on the
//! reference date to `{base}/YYYY/MM/DD/expenses.parquet` and flags them as
//! exported.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::{Config, mask_credential};

#[derive(Parser)]
#[command(name = "lakepub")]
#[command(about = "Periodic expense export to a partitioned Parquet lake")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./lakepub.toml or ~/.config/lakepub/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Export one reference date and flag exported records
    Run(cmd::run::RunArgs),
    /// Retry flag updates for an already exported date
    Reconcile(cmd::reconcile::ReconcileArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(lakepub_core::ProgressContext::new());
    let multi = progress.is_tty().then(|| progress.multi());
    lakepub_core::init_logging(cli.debug, multi)?;

    let mut config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };
    config.apply_env(|key| std::env::var(key).ok());

    match cli.command {
        Command::Run(args) => cmd::run::run(args, &config, &progress),
        Command::Reconcile(args) => cmd::reconcile::run(args, &config, &progress),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let export = config.to_export_config()?;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            table.add_row(vec!["Service URL", &export.base_url]);
            table.add_row(vec!["Records path", &export.records_path]);
            table.add_row(vec![
                "Credential",
                &export
                    .credential
                    .as_deref()
                    .map_or_else(|| "not set".to_string(), mask_credential),
            ]);
            table.add_row(vec![
                "Timeouts",
                &format!(
                    "connect {}s, request {}s",
                    export.http.connect_timeout.as_secs(),
                    export.http.request_timeout.as_secs()
                ),
            ]);
            table.add_row(vec!["Target status", export.target_status.as_str()]);
            table.add_row(vec![
                "Output base path",
                &export.output_base_path.display().to_string(),
            ]);
            table.add_row(vec!["Date basis", &export.date_basis.to_string()]);
            table.add_row(vec![
                "Reference date",
                &format!("{} (default)", export.reference_date()),
            ]);
            table.add_row(vec!["Compression level", &export.zstd_level.to_string()]);
            table.add_row(vec![
                "Reconcile workers",
                &export.reconcile_workers.to_string(),
            ]);

            eprintln!("\n{table}");
            Ok(())
        }
    }
}
