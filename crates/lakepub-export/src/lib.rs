//! Lakepub Export - periodic expense export pipeline
//!
//! Pulls every expense from the record service, selects those that ended on
//! the reference date with the target status and are not yet exported,
//! writes them to `{base}/YYYY/MM/DD/expenses.parquet` and then flags each
//! one as exported on the service.
//!
//! # Example
//!
//! ```ignore
//! use lakepub_export::{ExportConfig, HttpRecordClient, run};
//! use lakepub_core::ProgressContext;
//!
//! let config = ExportConfig::default();
//! let client = HttpRecordClient::new(
//!     &config.base_url,
//!     &config.records_path,
//!     config.credential.as_deref(),
//!     &config.http,
//! )?;
//! let summary = run(&config, &client, &ProgressContext::new())?;
//! println!("{} failed flag updates", summary.failed_ids().len());
//! ```

pub mod client;
pub mod config;
pub mod filter;
pub mod manifest;
pub mod partition;
pub mod reconcile;
pub mod record;
pub mod runner;
pub mod schema;
pub mod writer;

// Re-exports
pub use client::{HttpRecordClient, MAX_PAGES, MarkOutcome, RecordSource};
pub use config::ExportConfig;
pub use filter::{Criteria, DateBasis, select};
pub use manifest::PartitionManifest;
pub use partition::{artifact_path, partition_dir};
pub use reconcile::{FlagFailure, ReconcileReport};
pub use record::{Record, Status};
pub use runner::{RunFailure, RunState, RunSummary, reconcile_partition, run};
pub use writer::{ArtifactRow, read_artifact, write_records};
