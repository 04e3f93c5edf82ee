//! Schema-enforcing table loads
//!
//! A load reads one extract strictly against its declared schema and replaces
//! the destination table wholesale. Parsing happens on the blocking pool and
//! feeds the staged writer through a bounded channel; the destination only
//! changes when the staged table is published.

mod reader;

pub use reader::*;

use crate::config::{Config, Strictness};
use crate::error::{Error, Result};
use crate::progress::{add_load_bar, finish_load_bar};
use crate::schema::{Column, DatasetSchema, Row};
use crate::store::{RunStatus, StagedTable, TableStore};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Reshapes coerced source rows before they are staged
pub trait RowTransform: Send + Sync {
    /// Columns of the rows this transform produces
    fn output_columns(&self, input: &DatasetSchema) -> Vec<Column>;

    fn apply(&self, rows: Vec<Row>) -> Result<Vec<Row>>;

    /// Called once after the table has been published
    fn finish(&self) {}
}

/// Knobs shared by every load
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub strictness: Strictness,
    /// Rows parsed per message sent to the writer
    pub batch_rows: usize,
    pub channel_capacity: usize,
    pub show_progress: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            strictness: Strictness::Fail,
            batch_rows: 10_000,
            channel_capacity: 4,
            show_progress: false,
        }
    }
}

impl From<&Config> for LoadOptions {
    fn from(config: &Config) -> Self {
        Self {
            strictness: config.load.strictness,
            batch_rows: config.store.batch_size,
            channel_capacity: config.load.channel_capacity,
            show_progress: true,
        }
    }
}

/// Statistics from a completed load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadStats {
    pub table: String,
    pub source: String,
    pub rows_loaded: i64,
    pub rows_rejected: u64,
    pub version: i64,
    pub content_hash: String,
    pub elapsed_ms: u64,
}

/// Loads extracts into the table store
pub struct TableLoader<'a> {
    store: &'a TableStore,
    options: LoadOptions,
}

impl<'a> TableLoader<'a> {
    pub fn new(store: &'a TableStore, options: LoadOptions) -> Self {
        Self { store, options }
    }

    /// Replace `table_name` with the contents of `source_path`
    pub async fn load(
        &self,
        source_path: &Path,
        schema: &'static DatasetSchema,
        table_name: &str,
    ) -> Result<LoadStats> {
        self.run(source_path, schema, table_name, None).await
    }

    /// Like [`TableLoader::load`], reshaping every batch before it is staged
    pub async fn load_transformed(
        &self,
        source_path: &Path,
        schema: &'static DatasetSchema,
        table_name: &str,
        transform: Arc<dyn RowTransform>,
    ) -> Result<LoadStats> {
        self.run(source_path, schema, table_name, Some(transform))
            .await
    }

    async fn run(
        &self,
        source_path: &Path,
        schema: &'static DatasetSchema,
        table_name: &str,
        transform: Option<Arc<dyn RowTransform>>,
    ) -> Result<LoadStats> {
        let source = source_path.display().to_string();
        let run = self.store.start_load_run(table_name, &source).await?;

        let outcome = self
            .load_inner(source_path, schema, table_name, transform)
            .await;

        let recorded = match &outcome {
            Ok(stats) => {
                self.store
                    .complete_load_run(
                        &run.id,
                        RunStatus::Completed,
                        stats.rows_loaded,
                        stats.rows_rejected as i64,
                        None,
                    )
                    .await
            }
            Err(e) => {
                self.store
                    .complete_load_run(&run.id, RunStatus::Failed, 0, 0, Some(e.to_string()))
                    .await
            }
        };
        if let Err(e) = recorded {
            warn!("Could not record load run for '{}': {}", table_name, e);
        }

        outcome
    }

    async fn load_inner(
        &self,
        source_path: &Path,
        schema: &'static DatasetSchema,
        table_name: &str,
        transform: Option<Arc<dyn RowTransform>>,
    ) -> Result<LoadStats> {
        let started = Instant::now();
        let reader = SourceReader::open(source_path, schema, self.options.strictness)?;
        info!("Loading '{}' from {}", table_name, reader.path().display());

        let columns = match &transform {
            Some(t) => t.output_columns(schema),
            None => schema.columns(),
        };

        let bar = self
            .options
            .show_progress
            .then(|| add_load_bar(table_name, reader.total_bytes()));

        let mut staged = self.store.stage(table_name, columns).await?;
        let streamed = self
            .stream_into(&mut staged, reader, transform.as_deref(), bar.clone())
            .await;

        let rows_rejected = match streamed {
            Ok(rejected) => rejected,
            Err(e) => {
                if let Some(bar) = &bar {
                    bar.abandon_with_message(format!("{} failed", table_name));
                }
                if let Err(abort_err) = staged.abort().await {
                    warn!("Could not discard staging for '{}': {}", table_name, abort_err);
                }
                return Err(e);
            }
        };

        let info = staged.publish(&source_path.display().to_string()).await?;
        if let Some(transform) = &transform {
            transform.finish();
        }
        if let Some(bar) = &bar {
            finish_load_bar(bar, table_name, info.row_count);
        }
        if rows_rejected > 0 {
            warn!("'{}': skipped {} malformed rows", table_name, rows_rejected);
        }

        Ok(LoadStats {
            table: info.name,
            source: info.source,
            rows_loaded: info.row_count,
            rows_rejected,
            version: info.version,
            content_hash: info.content_hash,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Parse on the blocking pool and append each batch; returns rejected rows
    async fn stream_into(
        &self,
        staged: &mut StagedTable,
        mut reader: SourceReader,
        transform: Option<&dyn RowTransform>,
        bar: Option<ProgressBar>,
    ) -> Result<u64> {
        let (tx, mut rx) = mpsc::channel::<Result<Vec<Row>>>(self.options.channel_capacity);
        let batch_rows = self.options.batch_rows;

        let parser = tokio::task::spawn_blocking(move || {
            loop {
                match reader.next_batch(batch_rows) {
                    Ok(Some(rows)) => {
                        if let Some(bar) = &bar {
                            bar.set_position(reader.bytes_read());
                        }
                        // The writer hung up after an error of its own
                        if tx.blocking_send(Ok(rows)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
            reader.rejected()
        });

        while let Some(message) = rx.recv().await {
            let rows = match transform {
                Some(t) => t.apply(message?)?,
                None => message?,
            };
            staged.append(rows).await?;
        }

        let rejected = parser.await.map_err(Error::from)?;
        Ok(rejected)
    }
}
