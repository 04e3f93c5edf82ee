//! Staged table builds and the atomic publish swap

use super::catalog::{quote_ident, staging_name, TableInfo};
use super::writer::{WriteTx, Writer};
use crate::error::{Error, Result};
use crate::schema::{Column, Row, Value};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{debug, info};

/// Stay under SQLite's default bound-parameter limit of 32766
const MAX_BIND_PARAMS: usize = 32_000;

/// A dataset being written under a hidden name.
///
/// Rows are committed to the staging table in batches; nothing is visible under
/// the destination name until [`StagedTable::publish`] swaps it in. Each
/// commit renews the table's lease; a staged table whose lease has gone stale
/// (its builder crashed or was dropped) is swept when a store is opened.
pub struct StagedTable {
    writer: Writer,
    name: String,
    staging_name: String,
    columns: Vec<Column>,
    batch_size: usize,
    pending: Vec<Row>,
    row_count: i64,
    hasher: blake3::Hasher,
}

impl StagedTable {
    pub(crate) async fn create(
        writer: Writer,
        name: &str,
        columns: Vec<Column>,
        batch_size: usize,
    ) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::Other(format!("Table '{}' needs at least one column", name)));
        }

        let staging_name = staging_name(name);
        let column_defs = columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.ty.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");

        let mut tx = writer.begin().await?;
        sqlx::query(&format!(
            "CREATE TABLE {} ({})",
            quote_ident(&staging_name),
            column_defs
        ))
        .execute(tx.conn())
        .await?;
        sqlx::query("INSERT INTO _stage_leases (staging_name, table_name, touched_at) VALUES (?, ?, ?)")
            .bind(&staging_name)
            .bind(name)
            .bind(Utc::now().timestamp())
            .execute(tx.conn())
            .await?;
        tx.commit().await?;

        debug!("Staging '{}' as '{}'", name, staging_name);

        // The column layout is part of the content identity
        let mut hasher = blake3::Hasher::new();
        hasher.update(serde_json::to_string(&columns)?.as_bytes());

        Ok(Self {
            writer,
            name: name.to_string(),
            staging_name,
            columns,
            batch_size,
            pending: Vec::new(),
            row_count: 0,
            hasher,
        })
    }

    /// Rows accepted so far, committed or pending
    pub fn row_count(&self) -> i64 {
        self.row_count
    }

    /// Queue rows, committing whenever a full batch is pending
    pub async fn append(&mut self, rows: Vec<Row>) -> Result<()> {
        for row in &rows {
            self.check_row(row)?;
            for value in row {
                value.hash_into(&mut self.hasher);
            }
        }

        self.row_count += rows.len() as i64;
        self.pending.extend(rows);

        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    fn check_row(&self, row: &Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::Other(format!(
                "Row for '{}' has {} values, expected {}",
                self.name,
                row.len(),
                self.columns.len()
            )));
        }

        for (value, column) in row.iter().zip(&self.columns) {
            if !value.conforms_to(column.ty) {
                return Err(Error::Other(format!(
                    "Value {:?} does not fit column '{}' ({}) of '{}'",
                    value, column.name, column.ty, self.name
                )));
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let column_list = self
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let rows_per_statement = (MAX_BIND_PARAMS / self.columns.len()).max(1);

        let mut tx = self.writer.begin().await?;
        for chunk in self.pending.chunks(rows_per_statement) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) ",
                quote_ident(&self.staging_name),
                column_list
            ));
            builder.push_values(chunk, |mut b, row| {
                for value in row {
                    match value {
                        Value::Null => {
                            b.push_bind(Option::<i64>::None);
                        }
                        Value::Int32(v) => {
                            b.push_bind(*v);
                        }
                        Value::Int64(v) => {
                            b.push_bind(*v);
                        }
                        Value::Float32(v) => {
                            b.push_bind(f64::from(*v));
                        }
                        Value::Float64(v) => {
                            b.push_bind(*v);
                        }
                        Value::Utf8(s) => {
                            b.push_bind(s.clone());
                        }
                    }
                }
            });
            builder.build().execute(tx.conn()).await?;
        }
        self.renew_lease(&mut tx).await?;
        tx.commit().await?;

        debug!(
            "Committed {} staged rows for '{}'",
            self.pending.len(),
            self.name
        );
        self.pending.clear();
        Ok(())
    }

    async fn renew_lease(&self, tx: &mut WriteTx) -> Result<()> {
        let renewed = sqlx::query("UPDATE _stage_leases SET touched_at = ? WHERE staging_name = ?")
            .bind(Utc::now().timestamp())
            .bind(&self.staging_name)
            .execute(tx.conn())
            .await?
            .rows_affected();
        if renewed == 0 {
            return Err(Error::Other(format!(
                "Staging table for '{}' was swept as abandoned",
                self.name
            )));
        }
        Ok(())
    }

    /// Swap the staged rows in under the destination name.
    ///
    /// Dropping the old table, renaming the staging table, releasing the
    /// lease and bumping the catalog entry happen in one transaction.
    pub async fn publish(mut self, source: &str) -> Result<TableInfo> {
        self.flush().await?;

        let content_hash = self.hasher.finalize().to_hex().to_string();
        let columns_json = serde_json::to_string(&self.columns)?;

        let mut tx = self.writer.begin().await?;
        self.renew_lease(&mut tx).await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(&self.name)))
            .execute(tx.conn())
            .await?;
        sqlx::query(&format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(&self.staging_name),
            quote_ident(&self.name)
        ))
        .execute(tx.conn())
        .await?;
        sqlx::query("DELETE FROM _stage_leases WHERE staging_name = ?")
            .bind(&self.staging_name)
            .execute(tx.conn())
            .await?;
        sqlx::query(
            r#"
            INSERT INTO _catalog (name, version, row_count, content_hash, columns_json, source, published_at)
            VALUES (?, 1, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                version = _catalog.version + 1,
                row_count = excluded.row_count,
                content_hash = excluded.content_hash,
                columns_json = excluded.columns_json,
                source = excluded.source,
                published_at = excluded.published_at
            "#,
        )
        .bind(&self.name)
        .bind(self.row_count)
        .bind(&content_hash)
        .bind(&columns_json)
        .bind(source)
        .bind(Utc::now().to_rfc3339())
        .execute(tx.conn())
        .await?;
        let info = sqlx::query_as::<_, TableInfo>("SELECT * FROM _catalog WHERE name = ?")
            .bind(&self.name)
            .fetch_one(tx.conn())
            .await?;
        tx.commit().await?;

        info!(
            "Published '{}' v{} ({} rows)",
            info.name, info.version, info.row_count
        );
        Ok(info)
    }

    /// Throw the staged rows away, leaving the destination untouched
    pub async fn abort(self) -> Result<()> {
        let mut tx = self.writer.begin().await?;
        sqlx::query(&format!(
            "DROP TABLE IF EXISTS {}",
            quote_ident(&self.staging_name)
        ))
        .execute(tx.conn())
        .await?;
        sqlx::query("DELETE FROM _stage_leases WHERE staging_name = ?")
            .bind(&self.staging_name)
            .execute(tx.conn())
            .await?;
        tx.commit().await?;
        debug!("Aborted staging of '{}'", self.name);
        Ok(())
    }
}
