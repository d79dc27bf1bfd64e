//! Subcommands

pub mod reconcile;
pub mod run;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use lakepub_export::{ExportConfig, HttpRecordClient, RunSummary};

use crate::config::mask_credential;

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("Invalid date format: {e}"))
}

/// Record service client for the configured endpoint
fn client(config: &ExportConfig) -> Result<HttpRecordClient> {
    log::debug!(
        "Record service {} ({}), credential {}",
        config.base_url,
        config.records_path,
        config
            .credential
            .as_deref()
            .map_or_else(|| "not set".to_string(), mask_credential)
    );
    HttpRecordClient::new(
        &config.base_url,
        &config.records_path,
        config.credential.as_deref(),
        &config.http,
    )
    .context("Failed to set up record service client")
}

/// Print a key-value summary table on stderr
fn print_summary(title: &str, rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    eprintln!("\n{table}");
}

fn summary_rows(summary: &RunSummary) -> Vec<(&'static str, String)> {
    let r = &summary.reconciliation;
    let mut rows = vec![
        ("Reference date", summary.reference_date.to_string()),
        ("Status", summary.target_status.to_string()),
        ("Selected", summary.selected().to_string()),
        (
            "Artifact",
            summary
                .artifact
                .as_ref()
                .map_or_else(|| "none".to_string(), |p| p.display().to_string()),
        ),
        ("New rows", summary.written.to_string()),
        ("Flags updated", format!("{}/{}", r.succeeded, r.attempted)),
    ];
    if r.is_partial() {
        rows.push(("Failed ids", summary.failed_ids().join(", ")));
    }
    rows.push(("Time", format!("{:.1}s", summary.elapsed.as_secs_f64())));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_formats() {
        assert_eq!(
            parse_date("2024-02-29"),
            Ok(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert!(parse_date("29.02.2024").is_err());
    }
}
