//! Export run configuration

use std::path::PathBuf;

use chrono::NaiveDate;
use lakepub_core::HttpSettings;

use crate::filter::{Criteria, DateBasis};
use crate::record::Status;

/// Runtime configuration for one export run
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Record service root, e.g. `http://localhost:3000`
    pub base_url: String,
    /// Collection path under `base_url`
    pub records_path: String,
    /// Bearer token for the record service
    pub credential: Option<String>,
    pub http: HttpSettings,
    pub target_status: Status,
    /// Root of the `YYYY/MM/DD` partition tree
    pub output_base_path: PathBuf,
    pub date_basis: DateBasis,
    /// Explicit reference date; yesterday when unset
    pub reference_date: Option<NaiveDate>,
    /// Zstd compression level for parquet output
    pub zstd_level: i32,
    /// Concurrent flag updates
    pub reconcile_workers: usize,
    /// Fetch and filter only
    pub dry_run: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            records_path: "records".to_string(),
            credential: None,
            http: HttpSettings::default(),
            target_status: Status::Approved,
            output_base_path: PathBuf::from("./data"),
            date_basis: DateBasis::Utc,
            reference_date: None,
            zstd_level: 3,
            reconcile_workers: 4,
            dry_run: false,
        }
    }
}

impl ExportConfig {
    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| self.date_basis.yesterday())
    }

    /// Copy with the reference date resolved, so a run that crosses
    /// midnight stays on one partition
    pub fn pinned(&self) -> Self {
        Self {
            reference_date: Some(self.reference_date()),
            ..self.clone()
        }
    }

    pub fn criteria(&self) -> Criteria {
        Criteria {
            status: self.target_status,
            reference_date: self.reference_date(),
            basis: self.date_basis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ExportConfig::default();
        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.target_status, Status::Approved);
        assert_eq!(config.output_base_path, PathBuf::from("./data"));
        assert_eq!(config.zstd_level, 3);
        assert_eq!(config.reconcile_workers, 4);
        assert!(config.credential.is_none());
        assert!(!config.dry_run);
    }

    #[test]
    fn reference_date_defaults_to_yesterday() {
        let config = ExportConfig::default();
        assert_eq!(config.reference_date(), DateBasis::Utc.yesterday());

        let pinned = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let config = ExportConfig {
            reference_date: Some(pinned),
            ..Default::default()
        };
        assert_eq!(config.criteria().reference_date, pinned);
    }

    #[test]
    fn pinned_resolves_date_once() {
        let config = ExportConfig::default().pinned();
        assert_eq!(config.reference_date, Some(DateBasis::Utc.yesterday()));
    }
}
