//! Load command implementation

use crate::config::Config;
use crate::enrich::HouseholdEnricher;
use crate::error::{Error, Result};
use crate::load::{LoadOptions, LoadStats, TableLoader};
use crate::schema::Dataset;
use crate::store::TableStore;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

/// Result of one dataset's load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub dataset: String,
    pub path: String,
    pub stats: Option<LoadStats>,
    pub error: Option<String>,
}

impl LoadOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcomes of a batch of loads, in request order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadReport {
    pub outcomes: Vec<LoadOutcome>,
}

impl LoadReport {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.succeeded()).count()
    }

    pub fn outcome(&self, dataset: Dataset) -> Option<&LoadOutcome> {
        self.outcomes.iter().find(|o| o.dataset == dataset.name())
    }
}

/// Load one dataset into its silver table
pub async fn load_dataset(
    store: &TableStore,
    options: LoadOptions,
    source_root: &Path,
    dataset: Dataset,
) -> Result<LoadStats> {
    let path = source_root.join(dataset.source_file());
    let loader = TableLoader::new(store, options);

    match dataset {
        Dataset::Households => {
            loader
                .load_transformed(
                    &path,
                    dataset.schema(),
                    dataset.name(),
                    Arc::new(HouseholdEnricher::default()),
                )
                .await
        }
        _ => loader.load(&path, dataset.schema(), dataset.name()).await,
    }
}

/// Load the given datasets concurrently; one failure never stops the others
pub async fn cmd_load(config: &Config, store: &TableStore, datasets: &[Dataset]) -> Result<LoadReport> {
    let datasets = if datasets.is_empty() {
        Dataset::ALL.to_vec()
    } else {
        datasets.to_vec()
    };
    info!(
        "Loading {} datasets from {} (parallelism {})",
        datasets.len(),
        config.source_root.display(),
        config.load.parallelism
    );

    let permits = Arc::new(Semaphore::new(config.load.parallelism));
    let options = LoadOptions::from(config);

    let loads = datasets.iter().map(|&dataset| {
        let permits = Arc::clone(&permits);
        let options = options.clone();
        async move {
            let path = config.source_root.join(dataset.source_file());
            let result = match permits.acquire().await {
                Ok(_permit) => load_dataset(store, options, &config.source_root, dataset).await,
                Err(e) => Err(Error::Other(format!("Load scheduler closed: {}", e))),
            };

            match result {
                Ok(stats) => LoadOutcome {
                    dataset: dataset.name().to_string(),
                    path: path.display().to_string(),
                    stats: Some(stats),
                    error: None,
                },
                Err(e) => {
                    let scope = if e.is_dataset_scoped() { "" } else { " (store error)" };
                    error!(
                        "Load of '{}' from {} failed{}: {}",
                        dataset,
                        path.display(),
                        scope,
                        e
                    );
                    LoadOutcome {
                        dataset: dataset.name().to_string(),
                        path: path.display().to_string(),
                        stats: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        }
    });

    let outcomes = join_all(loads).await;
    Ok(LoadReport { outcomes })
}

pub fn print_load_report(report: &LoadReport) {
    println!("\n📦 Load Results\n");
    for outcome in &report.outcomes {
        match (&outcome.stats, &outcome.error) {
            (Some(stats), _) => {
                println!(
                    "  ✓ {:<22} v{:<4} {:>10} rows  ({} ms)",
                    outcome.dataset, stats.version, stats.rows_loaded, stats.elapsed_ms
                );
                if stats.rows_rejected > 0 {
                    println!("      {} malformed rows skipped", stats.rows_rejected);
                }
            }
            (None, Some(error)) => {
                println!("  ✗ {:<22} {}", outcome.dataset, error);
            }
            (None, None) => {}
        }
    }

    let failures = report.failures();
    println!();
    if failures == 0 {
        println!("All {} loads committed", report.outcomes.len());
    } else {
        println!(
            "{} of {} loads failed; their prior tables were left in place",
            failures,
            report.outcomes.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_header_only_extracts(root: &Path) {
        std::fs::create_dir_all(root).unwrap();
        for dataset in Dataset::ALL {
            let header = dataset
                .schema()
                .fields
                .iter()
                .map(|f| f.name)
                .collect::<Vec<_>>()
                .join(",");
            std::fs::write(root.join(dataset.source_file()), format!("{}\n", header)).unwrap();
        }
    }

    #[tokio::test]
    async fn test_parallel_loads_all_commit() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.source_root = tmp.path().join("bronze");
        config.silver_root = tmp.path().join("silver");
        config.load.parallelism = Dataset::ALL.len();
        write_header_only_extracts(&config.source_root);
        let store = TableStore::connect(&config).await.unwrap();

        for round in 1..=5 {
            let report = cmd_load(&config, &store, &[]).await.unwrap();
            assert_eq!(report.failures(), 0, "round {}: {:?}", round, report);
            for outcome in &report.outcomes {
                assert_eq!(outcome.stats.as_ref().unwrap().version, round);
            }
        }
        assert_eq!(store.list_tables().await.unwrap().len(), Dataset::ALL.len());
    }

    #[tokio::test]
    async fn test_unreadable_extract_is_reported_against_its_dataset() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.source_root = tmp.path().join("bronze");
        config.silver_root = tmp.path().join("silver");
        write_header_only_extracts(&config.source_root);

        let path = config.source_root.join(Dataset::Coupons.source_file());
        let mut content = std::fs::read(&path).unwrap();
        content.extend_from_slice(b"\xff\xfe,27160,4\n");
        std::fs::write(&path, content).unwrap();

        let store = TableStore::connect(&config).await.unwrap();
        let report = cmd_load(&config, &store, &[Dataset::Coupons, Dataset::Products])
            .await
            .unwrap();

        assert_eq!(report.failures(), 1);
        let error = report.outcome(Dataset::Coupons).unwrap().error.clone().unwrap();
        assert!(error.contains("coupons"), "{}", error);
        assert!(report.outcome(Dataset::Products).unwrap().succeeded());
    }
}
