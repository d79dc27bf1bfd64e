//! Parquet output with atomic tmp→rename

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::Schema;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

/// Buffered parquet writer targeting one final path.
///
/// Rows go to `<final>.tmp`; nothing exists at the final path until
/// [`finalize`](ParquetSink::finalize) has flushed, fsynced and renamed.
/// Dropping an unfinalized sink removes the tmp file.
pub struct ParquetSink {
    writer: Option<ArrowWriter<File>>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    row_count: usize,
}

impl std::fmt::Debug for ParquetSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetSink")
            .field("final_path", &self.final_path)
            .field("row_count", &self.row_count)
            .finish_non_exhaustive()
    }
}

/// Sibling tmp path for `path` (`expenses.parquet` → `expenses.parquet.tmp`)
pub fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

impl ParquetSink {
    /// Create a sink writing to a temporary file next to `final_path`.
    ///
    /// The parent directory must already exist.
    pub fn create(final_path: &Path, schema: &Schema, zstd_level: i32) -> io::Result<Self> {
        let tmp_path = tmp_path_for(final_path);

        // Clean up stale tmp file
        if tmp_path.exists() {
            log::warn!("Removing stale tmp file: {}", tmp_path.display());
            fs::remove_file(&tmp_path)?;
        }

        let level = ZstdLevel::try_new(zstd_level)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(level))
            .build();

        let file = File::create(&tmp_path)?;
        let writer = match ArrowWriter::try_new(file, Arc::new(schema.clone()), Some(props)) {
            Ok(w) => w,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(io::Error::other(e));
            }
        };

        Ok(Self {
            writer: Some(writer),
            tmp_path,
            final_path: final_path.to_path_buf(),
            row_count: 0,
        })
    }

    /// Write a record batch
    pub fn write_batch(&mut self, batch: &RecordBatch) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::other("parquet sink already finalized"))?;
        writer.write(batch).map_err(io::Error::other)?;
        self.row_count += batch.num_rows();
        Ok(())
    }

    /// Finalize: write footer, fsync, atomically rename tmp → final.
    ///
    /// Returns the number of rows written.
    pub fn finalize(mut self) -> io::Result<usize> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| io::Error::other("parquet sink already finalized"))?;
        let result = commit(writer, &self.tmp_path, &self.final_path);
        if result.is_err() {
            let _ = fs::remove_file(&self.tmp_path);
        }
        result.map(|()| self.row_count)
    }
}

impl Drop for ParquetSink {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

fn commit(writer: ArrowWriter<File>, tmp_path: &Path, final_path: &Path) -> io::Result<()> {
    let file = writer.into_inner().map_err(io::Error::other)?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp_path, final_path)?;
    sync_parent_dir(final_path)
}

/// Persist the rename itself (directory entry) on platforms that support it
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Write small files (manifests) with the same tmp→rename discipline
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp_path = tmp_path_for(path);
    let result = (|| {
        let mut file = File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, path)?;
        sync_parent_dir(path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Check if a completed parquet file exists and has a valid footer
pub fn is_valid_parquet(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    parquet::file::reader::SerializedFileReader::new(file).is_ok()
}

/// Remove stale .tmp files in the output directory
pub fn cleanup_tmp_files(output_dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(output_dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            log::warn!("Removing stale tmp file: {}", path.display());
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
