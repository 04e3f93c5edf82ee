//! Run command implementation: every load, then the derived table

use super::load::{cmd_load, print_load_report, LoadReport};
use crate::adjust::{AdjustStats, TransactionAdjuster};
use crate::config::Config;
use crate::error::Result;
use crate::schema::Dataset;
use crate::store::TableStore;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// What a full refresh did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub loads: LoadReport,
    pub adjust: Option<AdjustStats>,
    pub adjust_error: Option<String>,
}

impl RunReport {
    pub fn failures(&self) -> usize {
        self.loads.failures() + usize::from(self.adjust_error.is_some())
    }
}

pub async fn cmd_run(config: &Config, store: &TableStore) -> Result<RunReport> {
    let loads = cmd_load(config, store, &Dataset::ALL).await?;

    let transactions_loaded = loads
        .outcome(Dataset::Transactions)
        .map(|o| o.succeeded())
        .unwrap_or(false);

    if !transactions_loaded {
        warn!("Skipping transactions_adj: the transactions load did not commit");
        return Ok(RunReport {
            loads,
            adjust: None,
            adjust_error: Some("skipped: transactions load failed".to_string()),
        });
    }

    let (adjust, adjust_error) = match TransactionAdjuster::new(store).build().await {
        Ok(stats) => (Some(stats), None),
        Err(e) => {
            error!("Building transactions_adj failed: {}", e);
            (None, Some(e.to_string()))
        }
    };

    Ok(RunReport {
        loads,
        adjust,
        adjust_error,
    })
}

pub fn print_run_report(report: &RunReport) {
    print_load_report(&report.loads);
    match (&report.adjust, &report.adjust_error) {
        (Some(stats), _) => println!(
            "\n✓ {} v{}: {} rows from {}",
            stats.table, stats.version, stats.rows_written, stats.source
        ),
        (None, Some(error)) => println!("\n✗ transactions_adj: {}", error),
        (None, None) => {}
    }
}
