//! Partition manifest: what was exported for a reference date and which
//! flag updates are still outstanding

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use lakepub_core::{ExportError, hash_file, short_hash, write_atomic};
use serde::{Deserialize, Serialize};

use crate::partition::{ARTIFACT_FILE_NAME, MANIFEST_FILE_NAME};

pub const FORMAT_VERSION: u32 = 1;

/// Manifest stored alongside the partition's artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionManifest {
    pub format_version: u32,
    pub reference_date: NaiveDate,
    pub target_status: String,
    /// Artifact file name, relative to the partition directory
    pub artifact: String,
    /// Ids in artifact row order
    pub record_ids: Vec<String>,
    pub row_count: usize,
    /// Blake3 hash of the artifact file (hex)
    pub content_hash: String,
    /// Ids whose `exported` flag has not been confirmed by the service
    #[serde(default)]
    pub pending_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PartitionManifest {
    /// Describe the artifact that was just written into `dir`.
    ///
    /// Every id starts out pending.
    pub fn for_artifact(
        dir: &Path,
        reference_date: NaiveDate,
        target_status: &str,
        record_ids: Vec<String>,
    ) -> Result<Self, ExportError> {
        let content_hash = hash_file(&dir.join(ARTIFACT_FILE_NAME))?;
        log::debug!(
            "{} rows in {} ({})",
            record_ids.len(),
            ARTIFACT_FILE_NAME,
            short_hash(&content_hash)
        );
        let now = Utc::now();
        Ok(Self {
            format_version: FORMAT_VERSION,
            reference_date,
            target_status: target_status.to_string(),
            artifact: ARTIFACT_FILE_NAME.to_string(),
            row_count: record_ids.len(),
            pending_ids: record_ids.clone(),
            record_ids,
            content_hash: content_hash.to_hex().to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace the pending list after a reconciliation pass
    pub fn set_pending(&mut self, pending: Vec<String>) {
        self.pending_ids = pending;
        self.updated_at = Utc::now();
    }

    /// Whether the artifact in `dir` still matches the recorded hash
    pub fn verify(&self, dir: &Path) -> Result<bool, ExportError> {
        let actual = hash_file(&dir.join(&self.artifact))?;
        Ok(actual.to_hex().as_str() == self.content_hash)
    }

    /// Write manifest to dir/manifest.json (tmp + rename)
    pub fn write_to(&self, dir: &Path) -> Result<(), ExportError> {
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        write_atomic(&dir.join(MANIFEST_FILE_NAME), &json)?;
        Ok(())
    }

    /// Read dir/manifest.json. `None` if the partition has no manifest.
    pub fn read_from(dir: &Path) -> Result<Option<Self>, ExportError> {
        let path = dir.join(MANIFEST_FILE_NAME);
        let json = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&json)
            .map(Some)
            .map_err(|e| ExportError::Decode(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    fn manifest_in(dir: &Path) -> PartitionManifest {
        std::fs::write(dir.join(ARTIFACT_FILE_NAME), b"artifact bytes").unwrap();
        PartitionManifest::for_artifact(dir, date(), "Approved", vec!["a".into(), "b".into()])
            .unwrap()
    }

    #[test]
    fn new_manifest_has_everything_pending() {
        let dir = TempDir::new().unwrap();
        let m = manifest_in(dir.path());
        assert_eq!(m.row_count, 2);
        assert_eq!(m.pending_ids, m.record_ids);
        assert_eq!(m.artifact, "expenses.parquet");
        assert_eq!(m.content_hash.len(), 64);
    }

    #[test]
    fn write_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut m = manifest_in(dir.path());
        m.set_pending(vec!["b".into()]);
        m.write_to(dir.path()).unwrap();

        let back = PartitionManifest::read_from(dir.path()).unwrap().unwrap();
        assert_eq!(back, m);
        assert!(!dir.path().join("manifest.json.tmp").exists());
    }

    #[test]
    fn missing_manifest_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(PartitionManifest::read_from(dir.path()).unwrap().is_none());
    }

    #[test]
    fn corrupt_manifest_is_decode_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE_NAME), b"{not json").unwrap();
        let err = PartitionManifest::read_from(dir.path()).unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn verify_detects_changed_artifact() {
        let dir = TempDir::new().unwrap();
        let m = manifest_in(dir.path());
        assert!(m.verify(dir.path()).unwrap());
        std::fs::write(dir.path().join(ARTIFACT_FILE_NAME), b"tampered").unwrap();
        assert!(!m.verify(dir.path()).unwrap());
    }
}
