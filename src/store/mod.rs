//! Silver-tier table store using SQLite
//!
//! This module handles every persisted table:
//! - Dataset tables, one per name, replaced only through an atomic publish
//! - The catalog (version, row count and content hash per table)
//! - Load runs (history and stats)
//! - Stage leases (which staging tables are still being built)
//! - Read-only ad-hoc relational queries across any registered tables

mod catalog;
mod staged;
mod writer;

pub use catalog::*;
pub use staged::StagedTable;

use writer::Writer;

use crate::config::{Config, StoreConfig};
use crate::error::{Error, Result};
use crate::schema::{Column, Row, SemanticType, Value};
use chrono::Utc;
use serde_json::{Map, Value as JsonValue};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Column as _, Row as _, TypeInfo, ValueRef};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A fully materialized table
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// All values of one column, in row order
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }
}

/// Table store handle
#[derive(Clone)]
pub struct TableStore {
    pool: SqlitePool,
    /// Connections with `query_only` set, for ad-hoc SQL
    query_pool: SqlitePool,
    writer: Writer,
    batch_size: usize,
}

impl TableStore {
    /// Open the store configured for this silver root
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.store_file(), &config.store).await
    }

    /// Open (creating if needed) the store at a specific path
    pub async fn open(db_path: &Path, options: &StoreConfig) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let connect = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(options.busy_timeout_secs));

        debug!("Connecting to SQLite table store at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect.clone())
            .await?;

        let writer = Writer::new(pool.clone());
        let mut tx = writer.begin().await?;
        sqlx::raw_sql(CATALOG_SQL).execute(tx.conn()).await?;
        tx.commit().await?;

        let query_pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(connect.create_if_missing(false).pragma("query_only", "ON"))
            .await?;

        let store = Self {
            pool,
            query_pool,
            writer,
            batch_size: options.batch_size,
        };
        store.sweep_staging(options.stale_staging_secs).await?;
        Ok(store)
    }

    /// Drop staging tables whose lease has not been renewed within `stale_secs`
    async fn sweep_staging(&self, stale_secs: u64) -> Result<()> {
        let cutoff = Utc::now()
            .timestamp()
            .saturating_sub(i64::try_from(stale_secs).unwrap_or(i64::MAX));

        let mut tx = self.writer.begin().await?;
        let orphans: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT m.name FROM sqlite_master m
            LEFT JOIN _stage_leases l ON l.staging_name = m.name
            WHERE m.type = 'table'
              AND substr(m.name, 1, length(?)) = ?
              AND (l.touched_at IS NULL OR l.touched_at <= ?)
            "#,
        )
        .bind(STAGING_PREFIX)
        .bind(STAGING_PREFIX)
        .bind(cutoff)
        .fetch_all(tx.conn())
        .await?;

        for orphan in &orphans {
            warn!("Dropping abandoned staging table '{}'", orphan);
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(orphan)))
                .execute(tx.conn())
                .await?;
        }
        sqlx::query(
            "DELETE FROM _stage_leases WHERE staging_name NOT IN \
             (SELECT name FROM sqlite_master WHERE type = 'table')",
        )
        .execute(tx.conn())
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every connection held by this handle
    pub async fn close(&self) {
        self.query_pool.close().await;
        self.pool.close().await;
    }

    // ===== Table Operations =====

    /// Whether a committed table exists under this name
    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.table_info(name).await?.is_some())
    }

    /// Catalog entry for a table
    pub async fn table_info(&self, name: &str) -> Result<Option<TableInfo>> {
        let info = sqlx::query_as::<_, TableInfo>("SELECT * FROM _catalog WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(info)
    }

    /// List all published tables
    pub async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let tables = sqlx::query_as::<_, TableInfo>("SELECT * FROM _catalog ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(tables)
    }

    /// Drop a table and its catalog entry; returns whether it existed
    pub async fn drop_table(&self, name: &str) -> Result<bool> {
        validate_table_name(name)?;

        let mut tx = self.writer.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)))
            .execute(tx.conn())
            .await?;
        let removed = sqlx::query("DELETE FROM _catalog WHERE name = ?")
            .bind(name)
            .execute(tx.conn())
            .await?
            .rows_affected();
        tx.commit().await?;

        if removed > 0 {
            info!("Dropped table '{}'", name);
        }
        Ok(removed > 0)
    }

    /// Begin building a replacement for `name` under a staging identity
    pub async fn stage(&self, name: &str, columns: Vec<Column>) -> Result<StagedTable> {
        validate_table_name(name)?;
        StagedTable::create(self.writer.clone(), name, columns, self.batch_size).await
    }

    /// Overwrite `name` with an in-memory dataset
    pub async fn write(
        &self,
        name: &str,
        columns: Vec<Column>,
        rows: Vec<Row>,
        source: &str,
    ) -> Result<TableInfo> {
        let mut staged = self.stage(name, columns).await?;
        if let Err(e) = staged.append(rows).await {
            staged.abort().await?;
            return Err(e);
        }
        staged.publish(source).await
    }

    /// Read a whole table, decoding each column by its catalogued type
    pub async fn read(&self, name: &str) -> Result<Table> {
        // Catalog row and table rows come from the same snapshot
        let mut snapshot = self.pool.begin().await?;
        let info = sqlx::query_as::<_, TableInfo>("SELECT * FROM _catalog WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *snapshot)
            .await?
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        let columns = info.columns()?;

        let rows = sqlx::query(&format!("SELECT * FROM {} ORDER BY rowid", quote_ident(name)))
            .fetch_all(&mut *snapshot)
            .await?;
        snapshot.rollback().await?;

        let rows = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(idx, column)| decode_value(row, idx, column.ty))
                    .collect::<Result<Row>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Table { columns, rows })
    }

    /// Run an ad-hoc read-only SQL statement against the store
    pub async fn query(&self, sql: &str) -> Result<Vec<SqliteRow>> {
        let rows = sqlx::query(sql).fetch_all(&self.query_pool).await?;
        Ok(rows)
    }

    /// Run an ad-hoc SQL statement and return each row as a JSON object
    pub async fn query_json(&self, sql: &str) -> Result<Vec<Map<String, JsonValue>>> {
        let rows = self.query(sql).await?;
        rows.iter().map(row_to_json).collect()
    }

    // ===== Load Run Operations =====

    /// Start a new load run
    pub async fn start_load_run(&self, table_name: &str, source: &str) -> Result<LoadRun> {
        let run = LoadRun::new(table_name.to_string(), source.to_string());
        let mut tx = self.writer.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO _load_runs (id, table_name, source, started_at, status, rows_loaded, rows_rejected)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.table_name)
        .bind(&run.source)
        .bind(&run.started_at)
        .bind(&run.status)
        .bind(run.rows_loaded)
        .bind(run.rows_rejected)
        .execute(tx.conn())
        .await?;
        tx.commit().await?;
        Ok(run)
    }

    /// Complete a load run
    pub async fn complete_load_run(
        &self,
        id: &str,
        status: RunStatus,
        rows_loaded: i64,
        rows_rejected: i64,
        error: Option<String>,
    ) -> Result<()> {
        let mut tx = self.writer.begin().await?;
        sqlx::query(
            r#"
            UPDATE _load_runs SET
                completed_at = ?,
                status = ?,
                rows_loaded = ?,
                rows_rejected = ?,
                error = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(status.to_string())
        .bind(rows_loaded)
        .bind(rows_rejected)
        .bind(error)
        .bind(id)
        .execute(tx.conn())
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Get latest load run for a table
    pub async fn latest_load_run(&self, table_name: &str) -> Result<Option<LoadRun>> {
        let run = sqlx::query_as::<_, LoadRun>(
            "SELECT * FROM _load_runs WHERE table_name = ? ORDER BY started_at DESC LIMIT 1",
        )
        .bind(table_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }
}

fn decode_value(row: &SqliteRow, idx: usize, ty: SemanticType) -> Result<Value> {
    let value = match ty {
        SemanticType::Int32 => row.try_get::<Option<i32>, _>(idx)?.map(Value::Int32),
        SemanticType::Int64 => row.try_get::<Option<i64>, _>(idx)?.map(Value::Int64),
        SemanticType::Float32 => row
            .try_get::<Option<f64>, _>(idx)?
            .map(|v| Value::Float32(v as f32)),
        SemanticType::Float64 => row.try_get::<Option<f64>, _>(idx)?.map(Value::Float64),
        SemanticType::Utf8 => row.try_get::<Option<String>, _>(idx)?.map(Value::Utf8),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Decode by the storage class of each value, since query results have no declared types
fn row_to_json(row: &SqliteRow) -> Result<Map<String, JsonValue>> {
    let mut object = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            JsonValue::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" => JsonValue::from(row.try_get::<i64, _>(idx)?),
                "REAL" => JsonValue::from(row.try_get::<f64, _>(idx)?),
                "BLOB" => JsonValue::from(format!("<{} bytes>", row.try_get::<Vec<u8>, _>(idx)?.len())),
                _ => JsonValue::from(row.try_get::<String, _>(idx)?),
            }
        };
        object.insert(column.name().to_string(), value);
    }
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup_test_store() -> (TableStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let options = StoreConfig {
            batch_size: 2,
            ..StoreConfig::default()
        };
        let store = TableStore::open(&tmp.path().join("silver").join("test.db"), &options)
            .await
            .unwrap();
        (store, tmp)
    }

    fn coupon_columns() -> Vec<Column> {
        vec![
            Column::new("coupon_upc", SemanticType::Utf8),
            Column::new("product_id", SemanticType::Int32),
            Column::new("campaign_id", SemanticType::Int32),
        ]
    }

    fn coupon_row(upc: &str, product: i32, campaign: Option<i32>) -> Row {
        vec![
            Value::Utf8(upc.to_string()),
            Value::Int32(product),
            Value::from(campaign),
        ]
    }

    #[tokio::test]
    async fn test_write_read_and_version() {
        let (store, _tmp) = setup_test_store().await;
        assert!(!store.exists("coupons").await.unwrap());

        let rows = vec![
            coupon_row("10000089061", 27160, Some(4)),
            coupon_row("10000089064", 27754, None),
            coupon_row("10000089073", 28897, Some(9)),
        ];
        let info = store
            .write("coupons", coupon_columns(), rows.clone(), "coupon.csv")
            .await
            .unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(info.row_count, 3);
        assert!(store.exists("coupons").await.unwrap());

        let table = store.read("coupons").await.unwrap();
        assert_eq!(table.columns, coupon_columns());
        assert_eq!(table.rows, rows);

        let again = store
            .write("coupons", coupon_columns(), rows, "coupon.csv")
            .await
            .unwrap();
        assert_eq!(again.version, 2);
        assert_eq!(again.content_hash, info.content_hash);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_rows() {
        let (store, _tmp) = setup_test_store().await;

        store
            .write(
                "coupons",
                coupon_columns(),
                vec![coupon_row("a", 1, Some(1)), coupon_row("b", 2, Some(2))],
                "first",
            )
            .await
            .unwrap();
        let second = store
            .write("coupons", coupon_columns(), vec![coupon_row("c", 3, None)], "second")
            .await
            .unwrap();

        let table = store.read("coupons").await.unwrap();
        assert_eq!(table.rows, vec![coupon_row("c", 3, None)]);
        assert_eq!(second.source, "second");
    }

    #[tokio::test]
    async fn test_abort_leaves_prior_table() {
        let (store, _tmp) = setup_test_store().await;
        let original = vec![coupon_row("a", 1, Some(1))];
        store
            .write("coupons", coupon_columns(), original.clone(), "first")
            .await
            .unwrap();

        let mut staged = store.stage("coupons", coupon_columns()).await.unwrap();
        staged
            .append(vec![
                coupon_row("x", 9, None),
                coupon_row("y", 8, None),
                coupon_row("z", 7, None),
            ])
            .await
            .unwrap();

        // The committed batches are invisible under the real name
        assert_eq!(store.read("coupons").await.unwrap().rows, original);

        staged.abort().await.unwrap();
        assert_eq!(store.read("coupons").await.unwrap().rows, original);
        assert_eq!(store.table_info("coupons").await.unwrap().unwrap().version, 1);

        let leftovers = store
            .query_json("SELECT name FROM sqlite_master WHERE name LIKE '%staging%'")
            .await
            .unwrap();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_nonconforming_rows() {
        let (store, _tmp) = setup_test_store().await;
        let bad = vec![vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)]];
        assert!(store.write("coupons", coupon_columns(), bad, "bad").await.is_err());
        assert!(!store.exists("coupons").await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_table() {
        let (store, _tmp) = setup_test_store().await;
        store
            .write("coupons", coupon_columns(), vec![coupon_row("a", 1, None)], "src")
            .await
            .unwrap();

        assert!(store.drop_table("coupons").await.unwrap());
        assert!(!store.exists("coupons").await.unwrap());
        assert!(!store.drop_table("coupons").await.unwrap());
        assert!(matches!(
            store.read("coupons").await,
            Err(Error::TableNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_query_json_joins_tables() {
        let (store, _tmp) = setup_test_store().await;
        store
            .write(
                "coupons",
                coupon_columns(),
                vec![coupon_row("a", 1, Some(8)), coupon_row("b", 2, Some(9))],
                "src",
            )
            .await
            .unwrap();
        store
            .write(
                "campaigns",
                vec![
                    Column::new("description", SemanticType::Utf8),
                    Column::new("campaign_id", SemanticType::Int32),
                ],
                vec![vec![Value::Utf8("TypeA".to_string()), Value::Int32(8)]],
                "src",
            )
            .await
            .unwrap();

        let rows = store
            .query_json(
                "SELECT c.coupon_upc, k.description FROM coupons c \
                 LEFT JOIN campaigns k ON c.campaign_id = k.campaign_id ORDER BY c.coupon_upc",
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["description"], JsonValue::from("TypeA"));
        assert_eq!(rows[1]["description"], JsonValue::Null);
    }

    #[tokio::test]
    async fn test_float_columns_round_trip() {
        let (store, _tmp) = setup_test_store().await;
        let columns = vec![
            Column::new("sales_amount", SemanticType::Float32),
            Column::new("amount_list", SemanticType::Float64),
        ];
        let rows = vec![vec![Value::Float32(9.99), Value::Float64(11.49)]];
        store.write("amounts", columns, rows.clone(), "src").await.unwrap();
        assert_eq!(store.read("amounts").await.unwrap().rows, rows);
    }

    #[tokio::test]
    async fn test_load_runs() {
        let (store, _tmp) = setup_test_store().await;
        let run = store.start_load_run("products", "product.csv").await.unwrap();
        store
            .complete_load_run(&run.id, RunStatus::Completed, 10, 1, None)
            .await
            .unwrap();

        let latest = store.latest_load_run("products").await.unwrap().unwrap();
        assert_eq!(latest.get_status().unwrap(), RunStatus::Completed);
        assert_eq!(latest.rows_loaded, 10);
        assert_eq!(latest.rows_rejected, 1);
    }

    #[tokio::test]
    async fn test_reopen_sweeps_abandoned_staging() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("test.db");

        {
            let store = TableStore::open(&path, &StoreConfig::default()).await.unwrap();
            let staged = store.stage("coupons", coupon_columns()).await.unwrap();
            // Simulate a crash: neither published nor aborted
            std::mem::forget(staged);
            store.close().await;
        }

        let options = StoreConfig {
            stale_staging_secs: 0,
            ..StoreConfig::default()
        };
        let store = TableStore::open(&path, &options).await.unwrap();
        let leftovers = store
            .query_json("SELECT name FROM sqlite_master WHERE name LIKE '\\_staging\\_%' ESCAPE '\\'")
            .await
            .unwrap();
        assert!(leftovers.is_empty());
        let leases = store
            .query_json("SELECT * FROM _stage_leases")
            .await
            .unwrap();
        assert!(leases.is_empty());
        assert!(!store.exists("coupons").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_keeps_staging_of_a_live_writer() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("test.db");
        let options = StoreConfig::default();

        let first = TableStore::open(&path, &options).await.unwrap();
        let mut staged = first.stage("coupons", coupon_columns()).await.unwrap();
        staged.append(vec![coupon_row("a", 1, Some(1))]).await.unwrap();

        // A second handle on the same file, like `journey status` from another shell
        let second = TableStore::open(&path, &options).await.unwrap();

        staged.append(vec![coupon_row("b", 2, None)]).await.unwrap();
        let info = staged.publish("coupon.csv").await.unwrap();
        assert_eq!(info.row_count, 2);
        assert_eq!(second.read("coupons").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_swept_staging_fails_publish() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("test.db");

        let first = TableStore::open(&path, &StoreConfig::default()).await.unwrap();
        let staged = first.stage("coupons", coupon_columns()).await.unwrap();

        let impatient = StoreConfig {
            stale_staging_secs: 0,
            ..StoreConfig::default()
        };
        TableStore::open(&path, &impatient).await.unwrap();

        let err = staged.publish("coupon.csv").await.err().unwrap();
        assert!(err.to_string().contains("swept"));
        assert!(!first.exists("coupons").await.unwrap());
    }

    #[tokio::test]
    async fn test_ad_hoc_queries_cannot_write() {
        let (store, _tmp) = setup_test_store().await;
        store
            .write("coupons", coupon_columns(), vec![coupon_row("a", 1, None)], "src")
            .await
            .unwrap();

        for sql in [
            "DROP TABLE coupons",
            "DELETE FROM coupons",
            "INSERT INTO coupons VALUES ('b', 2, 3)",
            "DELETE FROM _catalog",
        ] {
            assert!(store.query_json(sql).await.is_err(), "{}", sql);
        }

        assert_eq!(store.read("coupons").await.unwrap().len(), 1);
        let count = store.query_json("SELECT COUNT(*) AS n FROM coupons").await.unwrap();
        assert_eq!(count[0]["n"], JsonValue::from(1));
    }

    #[tokio::test]
    async fn test_read_follows_republished_layout() {
        let (store, _tmp) = setup_test_store().await;
        store
            .write("coupons", coupon_columns(), vec![coupon_row("a", 1, None)], "first")
            .await
            .unwrap();
        let narrow = vec![Column::new("coupon_upc", SemanticType::Utf8)];
        store
            .write(
                "coupons",
                narrow.clone(),
                vec![vec![Value::Utf8("z".to_string())]],
                "second",
            )
            .await
            .unwrap();

        let table = store.read("coupons").await.unwrap();
        assert_eq!(table.columns, narrow);
        assert_eq!(table.rows, vec![vec![Value::Utf8("z".to_string())]]);
    }

    #[tokio::test]
    async fn test_concurrent_writers_all_publish() {
        let (store, _tmp) = setup_test_store().await;
        let names = ["t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7"];

        let writes = names.iter().map(|name| {
            let store = store.clone();
            async move {
                let rows = (0..9).map(|i| coupon_row(name, i, Some(i))).collect();
                store.write(name, coupon_columns(), rows, "src").await
            }
        });
        let results = futures::future::join_all(writes).await;

        for (name, result) in names.iter().zip(results) {
            let info = result.unwrap_or_else(|e| panic!("{}: {}", name, e));
            assert_eq!(info.row_count, 9);
        }
        assert_eq!(store.list_tables().await.unwrap().len(), names.len());
    }
}
