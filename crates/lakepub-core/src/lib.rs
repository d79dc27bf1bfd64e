//! Lakepub Core - Shared infrastructure for the expense export pipeline
//!
//! HTTP plumbing, the run error taxonomy, atomic Parquet output,
//! content hashing, logging and progress reporting.

pub mod error;
pub mod hash;
pub mod http;
pub mod logging;
pub mod progress;
pub mod sink;

// Re-exports for convenience
pub use error::ExportError;
pub use hash::{hash_file, short_hash};
pub use http::{HttpError, HttpSettings, SHARED_RUNTIME, build_client};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use sink::{ParquetSink, cleanup_tmp_files, is_valid_parquet, write_atomic};
