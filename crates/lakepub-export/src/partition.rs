//! Partition layout: `{base}/{YYYY}/{MM}/{DD}/expenses.parquet`

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

pub const ARTIFACT_FILE_NAME: &str = "expenses.parquet";
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Directory holding the artifact for `date`
pub fn partition_dir(base: &Path, date: NaiveDate) -> PathBuf {
    base.join(date.format("%Y").to_string())
        .join(date.format("%m").to_string())
        .join(date.format("%d").to_string())
}

pub fn artifact_path(base: &Path, date: NaiveDate) -> PathBuf {
    partition_dir(base, date).join(ARTIFACT_FILE_NAME)
}
