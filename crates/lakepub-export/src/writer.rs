//! Expense artifact encoding and decoding

use std::fs::{self, File};
use std::io;
use std::mem::take;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, RecordBatch, StringArray, TimestampMillisecondArray,
};
use arrow::datatypes::Schema;
use arrow::error::ArrowError;
use chrono::{DateTime, Utc};
use lakepub_core::{ExportError, ParquetSink};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::record::Record;
use crate::schema::{self, TIMESTAMP_TZ};

/// Rows per record batch
const BATCH_SIZE: usize = 8192;

/// One artifact row, as written and as read back.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactRow {
    pub id: String,
    pub title: String,
    pub comment: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: String,
    pub attachment: Option<String>,
    pub exported: bool,
}

impl ArtifactRow {
    /// Row for a record about to be exported. `exported` is always true.
    ///
    /// `None` when the record lacks a start date or status.
    pub fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            id: record.id.clone(),
            title: record.title.clone(),
            comment: record.comment.clone(),
            start_date: record.start_date?,
            end_date: record.end_date,
            status: record.status?.as_str().to_string(),
            attachment: record.attachment.clone(),
            exported: true,
        })
    }
}

/// Accumulator for building RecordBatches from artifact rows
pub struct ExpenseAccumulator {
    schema: &'static Arc<Schema>,
    id: Vec<String>,
    title: Vec<String>,
    comment: Vec<Option<String>>,
    start_date: Vec<i64>,
    end_date: Vec<Option<i64>>,
    status: Vec<String>,
    attachment: Vec<Option<String>>,
    exported: Vec<bool>,
}

impl ExpenseAccumulator {
    pub fn new() -> Self {
        Self {
            schema: schema::expenses(),
            id: Vec::with_capacity(BATCH_SIZE),
            title: Vec::with_capacity(BATCH_SIZE),
            comment: Vec::with_capacity(BATCH_SIZE),
            start_date: Vec::with_capacity(BATCH_SIZE),
            end_date: Vec::with_capacity(BATCH_SIZE),
            status: Vec::with_capacity(BATCH_SIZE),
            attachment: Vec::with_capacity(BATCH_SIZE),
            exported: Vec::with_capacity(BATCH_SIZE),
        }
    }

    pub fn push(&mut self, row: &ArtifactRow) {
        self.id.push(row.id.clone());
        self.title.push(row.title.clone());
        self.comment.push(row.comment.clone());
        self.start_date.push(row.start_date.timestamp_millis());
        self.end_date.push(row.end_date.map(|d| d.timestamp_millis()));
        self.status.push(row.status.clone());
        self.attachment.push(row.attachment.clone());
        self.exported.push(row.exported);
    }

    pub fn len(&self) -> usize {
        self.id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= BATCH_SIZE
    }

    pub fn take_batch(&mut self) -> Result<RecordBatch, ArrowError> {
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(take(&mut self.id))),
            Arc::new(StringArray::from(take(&mut self.title))),
            Arc::new(StringArray::from(take(&mut self.comment))),
            Arc::new(
                TimestampMillisecondArray::from(take(&mut self.start_date))
                    .with_timezone(TIMESTAMP_TZ),
            ),
            Arc::new(
                TimestampMillisecondArray::from(take(&mut self.end_date))
                    .with_timezone(TIMESTAMP_TZ),
            ),
            Arc::new(StringArray::from(take(&mut self.status))),
            Arc::new(StringArray::from(take(&mut self.attachment))),
            Arc::new(BooleanArray::from(take(&mut self.exported))),
        ];
        RecordBatch::try_new(self.schema.clone(), arrays)
    }
}

impl Default for ExpenseAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Write rows to `path` in order, creating parent directories.
///
/// All-or-nothing: on error nothing readable is left at `path` (an artifact
/// already there stays untouched). Returns the row count.
pub fn write_rows(rows: &[ArtifactRow], path: &Path, zstd_level: i32) -> Result<usize, ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut sink = ParquetSink::create(path, schema::expenses(), zstd_level)?;
    let mut acc = ExpenseAccumulator::new();
    for row in rows {
        acc.push(row);
        if acc.is_full() {
            sink.write_batch(&acc.take_batch().map_err(io::Error::other)?)?;
        }
    }
    if !acc.is_empty() {
        sink.write_batch(&acc.take_batch().map_err(io::Error::other)?)?;
    }
    let written = sink.finalize()?;
    log::debug!("Wrote {written} rows to {}", path.display());
    Ok(written)
}

/// Write selected records to `path`. Every row is marked exported.
pub fn write_records(
    records: &[&Record],
    path: &Path,
    zstd_level: i32,
) -> Result<usize, ExportError> {
    let rows = records
        .iter()
        .map(|r| {
            ArtifactRow::from_record(r).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("record {} lacks start date or status", r.id),
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    write_rows(&rows, path, zstd_level)
}

/// Decode an artifact back into rows, in file order
pub fn read_artifact(path: &Path) -> Result<Vec<ArtifactRow>, ExportError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .and_then(|b| b.build())
        .map_err(io::Error::other)?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(io::Error::other)?;
        decode_batch(&batch, &mut rows)?;
    }
    Ok(rows)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> io::Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| invalid(format!("artifact column {name} missing or mistyped")))
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn opt_str(arr: &StringArray, i: usize) -> Option<String> {
    (!arr.is_null(i)).then(|| arr.value(i).to_string())
}

fn millis(ms: i64) -> io::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| invalid(format!("timestamp out of range: {ms}")))
}

fn decode_batch(batch: &RecordBatch, rows: &mut Vec<ArtifactRow>) -> io::Result<()> {
    let id = column::<StringArray>(batch, "id")?;
    let title = column::<StringArray>(batch, "title")?;
    let comment = column::<StringArray>(batch, "comment")?;
    let start = column::<TimestampMillisecondArray>(batch, "startDate")?;
    let end = column::<TimestampMillisecondArray>(batch, "endDate")?;
    let status = column::<StringArray>(batch, "status")?;
    let attachment = column::<StringArray>(batch, "attachment")?;
    let exported = column::<BooleanArray>(batch, "exported")?;

    rows.reserve(batch.num_rows());
    for i in 0..batch.num_rows() {
        rows.push(ArtifactRow {
            id: id.value(i).to_string(),
            title: title.value(i).to_string(),
            comment: opt_str(comment, i),
            start_date: millis(start.value(i))?,
            end_date: if end.is_null(i) {
                None
            } else {
                Some(millis(end.value(i))?)
            },
            status: status.value(i).to_string(),
            attachment: opt_str(attachment, i),
            exported: exported.value(i),
        });
    }
    Ok(())
}
