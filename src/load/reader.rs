//! Schema-bound reading of delimited extracts

use crate::config::Strictness;
use crate::error::{Error, Result};
use crate::schema::{DatasetSchema, Row};
use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Reads one extract, coercing each record to its declared schema
pub struct SourceReader {
    schema: &'static DatasetSchema,
    path: PathBuf,
    strictness: Strictness,
    reader: csv::Reader<File>,
    record: StringRecord,
    rejected: u64,
    total_bytes: u64,
}

impl SourceReader {
    /// Open the file and check its header width against the schema
    pub fn open(path: &Path, schema: &'static DatasetSchema, strictness: Strictness) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::SourceNotFound {
                dataset: schema.dataset.to_string(),
                path: path.display().to_string(),
            });
        }

        let total_bytes = std::fs::metadata(path)?.len();
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|e| unreadable(schema, path, e))?;

        let headers = reader
            .headers()
            .map_err(|e| unreadable(schema, path, e))?
            .clone();
        if headers.len() != schema.len() {
            return Err(Error::SchemaMismatch {
                dataset: schema.dataset.to_string(),
                path: path.display().to_string(),
                detail: format!(
                    "header has {} fields, schema declares {}",
                    headers.len(),
                    schema.len()
                ),
            });
        }

        // Names are informational only; binding is positional
        for (header, field) in headers.iter().zip(schema.fields) {
            if !header.trim().eq_ignore_ascii_case(field.name) {
                debug!(
                    "{}: header '{}' bound to field '{}'",
                    schema.dataset, header, field.name
                );
            }
        }

        Ok(Self {
            schema,
            path: path.to_path_buf(),
            strictness,
            reader,
            record: StringRecord::new(),
            rejected: 0,
            total_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the source file in bytes
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Bytes consumed so far
    pub fn bytes_read(&self) -> u64 {
        self.reader.position().byte()
    }

    /// Rows dropped under [`Strictness::SkipRow`]
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Read up to `max_rows` coerced rows; `None` once the file is exhausted.
    ///
    /// Only a value that fails coercion can be skipped. A record of the wrong
    /// width means the extract no longer matches its schema and always fails.
    pub fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Row>>> {
        let mut rows = Vec::with_capacity(max_rows.min(4096));

        while rows.len() < max_rows {
            let more = self
                .reader
                .read_record(&mut self.record)
                .map_err(|e| unreadable(self.schema, &self.path, e))?;
            if !more {
                break;
            }

            let line = self.record.position().map(|p| p.line()).unwrap_or(0);
            match self.coerce_record(line) {
                Ok(row) => rows.push(row),
                Err(e @ Error::TypeMismatch { .. }) if self.strictness == Strictness::SkipRow => {
                    warn!("Skipping row: {}", e);
                    self.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if rows.is_empty() && self.reader.is_done() {
            Ok(None)
        } else {
            Ok(Some(rows))
        }
    }

    fn coerce_record(&self, line: u64) -> Result<Row> {
        if self.record.len() != self.schema.len() {
            return Err(Error::SchemaMismatch {
                dataset: self.schema.dataset.to_string(),
                path: self.path.display().to_string(),
                detail: format!(
                    "line {} has {} fields, schema declares {}",
                    line,
                    self.record.len(),
                    self.schema.len()
                ),
            });
        }

        self.record
            .iter()
            .zip(self.schema.fields)
            .map(|(raw, field)| {
                field.ty.coerce(raw).ok_or_else(|| Error::TypeMismatch {
                    dataset: self.schema.dataset.to_string(),
                    path: self.path.display().to_string(),
                    line,
                    column: field.name.to_string(),
                    expected: field.ty.to_string(),
                    value: raw.to_string(),
                })
            })
            .collect()
    }
}

/// A record the csv parser could not read, reported against its dataset
fn unreadable(schema: &DatasetSchema, path: &Path, err: csv::Error) -> Error {
    let detail = match err.position() {
        Some(pos) => format!("unreadable record at line {}: {}", pos.line(), err),
        None => format!("unreadable source: {}", err),
    };
    Error::SchemaMismatch {
        dataset: schema.dataset.to_string(),
        path: path.display().to_string(),
        detail,
    }
}
