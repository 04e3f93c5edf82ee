//! transactions_adj: per-line discount decomposition
//!
//! The adjuster only reads a transactions table that is in the catalog, and it
//! reads it inside one snapshot so the row count it checks against cannot move
//! underneath it.

mod decompose;

pub use decompose::*;

use crate::error::{Error, Result};
use crate::schema::{Dataset, TRANSACTIONS_SCHEMA};
use crate::store::{RunStatus, StagedTable, TableInfo, TableStore};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, Transaction};
use std::time::Instant;
use tracing::{info, warn};

/// Name of the derived table
pub const TRANSACTIONS_ADJ: &str = "transactions_adj";

const STREAM_BATCH_ROWS: usize = 4096;

/// Lines per coupon attribution in one build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponMix {
    pub no_coupon: i64,
    pub campaign: i64,
    pub manufacturer: i64,
}

impl CouponMix {
    pub fn record(&mut self, attribution: CouponAttribution) {
        match attribution {
            CouponAttribution::NoCoupon => self.no_coupon += 1,
            CouponAttribution::Campaign => self.campaign += 1,
            CouponAttribution::Manufacturer => self.manufacturer += 1,
        }
    }
}

/// Statistics from a completed adjustment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustStats {
    pub table: String,
    pub source: String,
    pub rows_written: i64,
    pub version: i64,
    pub content_hash: String,
    pub coupons: CouponMix,
    pub elapsed_ms: u64,
}

/// Rebuilds transactions_adj from the committed transactions table
pub struct TransactionAdjuster<'a> {
    store: &'a TableStore,
}

impl<'a> TransactionAdjuster<'a> {
    pub fn new(store: &'a TableStore) -> Self {
        Self { store }
    }

    pub async fn build(&self) -> Result<AdjustStats> {
        let source_table = Dataset::Transactions.name();
        let run = self
            .store
            .start_load_run(TRANSACTIONS_ADJ, source_table)
            .await?;

        let outcome = self.build_inner(source_table).await;

        let recorded = match &outcome {
            Ok(stats) => {
                self.store
                    .complete_load_run(&run.id, RunStatus::Completed, stats.rows_written, 0, None)
                    .await
            }
            Err(e) => {
                self.store
                    .complete_load_run(&run.id, RunStatus::Failed, 0, 0, Some(e.to_string()))
                    .await
            }
        };
        if let Err(e) = recorded {
            warn!("Could not record run for '{}': {}", TRANSACTIONS_ADJ, e);
        }

        outcome
    }

    async fn build_inner(&self, source_table: &str) -> Result<AdjustStats> {
        let started = Instant::now();
        let mut snapshot = self.store.pool().begin().await?;

        let source = sqlx::query_as::<_, TableInfo>("SELECT * FROM _catalog WHERE name = ?")
            .bind(source_table)
            .fetch_optional(&mut *snapshot)
            .await?
            .ok_or_else(|| Error::StaleRead(source_table.to_string()))?;

        if source.columns()? != TRANSACTIONS_SCHEMA.columns() {
            return Err(Error::SchemaMismatch {
                dataset: source_table.to_string(),
                path: source.source.clone(),
                detail: "committed columns differ from the declared transactions schema"
                    .to_string(),
            });
        }

        info!(
            "Adjusting {} rows of '{}' v{}",
            source.row_count, source_table, source.version
        );

        let mut staged = self
            .store
            .stage(TRANSACTIONS_ADJ, AdjustedTransaction::columns())
            .await?;

        let streamed = stream_adjusted(&mut snapshot, &mut staged).await;
        // Read-only; nothing to commit
        snapshot.rollback().await?;

        let checked = streamed.and_then(|mix| {
            let rows = staged.row_count();
            if rows == source.row_count {
                Ok(mix)
            } else {
                Err(Error::RowCountMismatch {
                    table: TRANSACTIONS_ADJ.to_string(),
                    expected: source.row_count,
                    found: rows,
                })
            }
        });
        let coupons = match checked {
            Ok(mix) => mix,
            Err(e) => {
                if let Err(abort_err) = staged.abort().await {
                    warn!("Could not discard staging for '{}': {}", TRANSACTIONS_ADJ, abort_err);
                }
                return Err(e);
            }
        };
        info!(
            "Coupon lines in '{}': {} campaign, {} manufacturer, {} without coupon",
            TRANSACTIONS_ADJ, coupons.campaign, coupons.manufacturer, coupons.no_coupon
        );

        let lineage = format!("{}@v{}", source_table, source.version);
        let info = staged.publish(&lineage).await?;

        Ok(AdjustStats {
            table: info.name,
            source: info.source,
            rows_written: info.row_count,
            version: info.version,
            content_hash: info.content_hash,
            coupons,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Stream every committed line through [`adjust`], tallying coupon attribution
async fn stream_adjusted(
    snapshot: &mut Transaction<'_, Sqlite>,
    staged: &mut StagedTable,
) -> Result<CouponMix> {
    let mut lines = sqlx::query_as::<_, RawTransaction>(
        "SELECT * FROM \"transactions\" ORDER BY rowid",
    )
    .fetch(&mut **snapshot);

    let mut mix = CouponMix::default();
    let mut batch = Vec::with_capacity(STREAM_BATCH_ROWS);
    while let Some(raw) = lines.try_next().await? {
        mix.record(Amounts::coalesce(&raw).attribution());
        batch.push(adjust(&raw).into_row());
        if batch.len() >= STREAM_BATCH_ROWS {
            staged.append(std::mem::take(&mut batch)).await?;
        }
    }
    if !batch.is_empty() {
        staged.append(batch).await?;
    }

    Ok(mix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::schema::{Column, Row, SemanticType, Value};
    use tempfile::TempDir;

    async fn setup() -> (TableStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let options = StoreConfig {
            batch_size: 3,
            ..StoreConfig::default()
        };
        let store = TableStore::open(&tmp.path().join("journey.db"), &options)
            .await
            .unwrap();
        (store, tmp)
    }

    fn transaction(basket: i64, sales: f32, coupon: Option<f32>, coupon_match: Option<f32>) -> Row {
        vec![
            Value::Int32(2375),
            Value::Int64(basket),
            Value::Int32(1),
            Value::Int32(1_004_906),
            Value::Int32(1),
            Value::Float32(sales),
            Value::Int32(364),
            Value::Float32(-0.39),
            Value::Int32(1631),
            Value::Int32(1),
            coupon.map(Value::Float32).unwrap_or(Value::Null),
            coupon_match.map(Value::Float32).unwrap_or(Value::Null),
        ]
    }

    async fn seed(store: &TableStore) -> TableInfo {
        let rows = (0..7)
            .map(|i| match i % 3 {
                0 => transaction(i, 1.39, Some(0.0), Some(0.0)),
                1 => transaction(i, 2.99, Some(-0.55), Some(0.0)),
                _ => transaction(i, 5.99, Some(-1.0), None),
            })
            .collect();
        store
            .write("transactions", TRANSACTIONS_SCHEMA.columns(), rows, "transaction_data.csv")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_stale_read_without_transactions() {
        let (store, _tmp) = setup().await;
        let err = TransactionAdjuster::new(&store).build().await.err().unwrap();
        assert!(matches!(err, Error::StaleRead(ref t) if t == "transactions"));
        assert!(!store.exists(TRANSACTIONS_ADJ).await.unwrap());

        let run = store.latest_load_run(TRANSACTIONS_ADJ).await.unwrap().unwrap();
        assert_eq!(run.get_status().unwrap(), RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_build_keeps_every_row() {
        let (store, _tmp) = setup().await;
        let source = seed(&store).await;

        let stats = TransactionAdjuster::new(&store).build().await.unwrap();
        assert_eq!(stats.rows_written, source.row_count);
        assert_eq!(stats.source, "transactions@v1");
        assert_eq!(
            stats.coupons,
            CouponMix {
                no_coupon: 3,
                campaign: 4,
                manufacturer: 0,
            }
        );

        let table = store.read(TRANSACTIONS_ADJ).await.unwrap();
        assert_eq!(table.columns, AdjustedTransaction::columns());
        assert_eq!(table.len() as i64, source.row_count);

        let baskets: Vec<_> = table.column("basket_id").unwrap();
        assert_eq!(baskets[0], &Value::Int64(0));
        assert_eq!(baskets[6], &Value::Int64(6));

        let campaign = table.column("campaign_coupon_discount").unwrap();
        match campaign[1] {
            Value::Float64(v) => assert!((v - 0.55).abs() < 1e-6),
            other => panic!("unexpected value {:?}", other),
        }

        // Raw table is untouched
        assert_eq!(store.table_info("transactions").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let (store, _tmp) = setup().await;
        seed(&store).await;
        let adjuster = TransactionAdjuster::new(&store);

        let first = adjuster.build().await.unwrap();
        let second = adjuster.build().await.unwrap();
        assert_eq!(second.version, first.version + 1);
        assert_eq!(second.content_hash, first.content_hash);
    }

    #[tokio::test]
    async fn test_tracks_new_source_version() {
        let (store, _tmp) = setup().await;
        seed(&store).await;
        seed(&store).await;

        let stats = TransactionAdjuster::new(&store).build().await.unwrap();
        assert_eq!(stats.source, "transactions@v2");
    }

    #[tokio::test]
    async fn test_rejects_foreign_transactions_layout() {
        let (store, _tmp) = setup().await;
        store
            .write(
                "transactions",
                vec![Column::new("household_id", SemanticType::Int32)],
                vec![vec![Value::Int32(1)]],
                "elsewhere",
            )
            .await
            .unwrap();

        let err = TransactionAdjuster::new(&store).build().await.err().unwrap();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
        assert!(!store.exists(TRANSACTIONS_ADJ).await.unwrap());
    }
}
