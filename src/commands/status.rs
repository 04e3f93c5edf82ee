//! Status command implementation

use crate::adjust::TRANSACTIONS_ADJ;
use crate::config::Config;
use crate::error::Result;
use crate::schema::Dataset;
use crate::store::{LoadRun, TableInfo, TableStore};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One expected silver table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStatus {
    pub name: String,
    pub table: Option<TableInfo>,
    pub last_run: Option<LoadRun>,
}

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub source_root: String,
    pub store_path: String,
    pub tables: Vec<TableStatus>,
}

/// Catalog state and the most recent attempt for every expected table
pub async fn cmd_status(config: &Config, store: &TableStore) -> Result<StatusInfo> {
    info!("Getting status");

    let names = Dataset::ALL
        .iter()
        .map(|d| d.name())
        .chain(std::iter::once(TRANSACTIONS_ADJ));

    let mut tables = Vec::new();
    for name in names {
        tables.push(TableStatus {
            name: name.to_string(),
            table: store.table_info(name).await?,
            last_run: store.latest_load_run(name).await?,
        });
    }

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        source_root: config.source_root.display().to_string(),
        store_path: config.store_file().display().to_string(),
        tables,
    })
}

pub fn print_status(status: &StatusInfo) {
    println!("\n📊 journey Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Source root: {}", status.source_root);
    println!("Table store: {}", status.store_path);
    println!("\nTables:");

    for entry in &status.tables {
        match &entry.table {
            Some(table) => println!(
                "  {:<22} v{:<4} {:>10} rows  {}  from {}",
                entry.name,
                table.version,
                table.row_count,
                &table.content_hash[..12.min(table.content_hash.len())],
                table.source
            ),
            None => println!("  {:<22} (not loaded)", entry.name),
        }

        if let Some(run) = &entry.last_run {
            if let Some(error) = &run.error {
                println!("      last attempt {} {}: {}", run.started_at, run.status, error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::COUPONS_SCHEMA;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_status_lists_expected_tables() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.silver_root = tmp.path().join("silver");
        let store = TableStore::connect(&config).await.unwrap();
        store
            .write("coupons", COUPONS_SCHEMA.columns(), Vec::new(), "coupon.csv")
            .await
            .unwrap();

        let status = cmd_status(&config, &store).await.unwrap();
        assert_eq!(status.tables.len(), 9);

        let coupons = status.tables.iter().find(|t| t.name == "coupons").unwrap();
        assert_eq!(coupons.table.as_ref().unwrap().row_count, 0);
        let adjusted = status.tables.last().unwrap();
        assert_eq!(adjusted.name, TRANSACTIONS_ADJ);
        assert!(adjusted.table.is_none());
    }
}
