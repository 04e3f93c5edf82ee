//! Adjust command implementation

use crate::adjust::{AdjustStats, TransactionAdjuster};
use crate::error::Result;
use crate::store::TableStore;

/// Rebuild transactions_adj from the committed transactions table
pub async fn cmd_adjust(store: &TableStore) -> Result<AdjustStats> {
    TransactionAdjuster::new(store).build().await
}

pub fn print_adjust_stats(stats: &AdjustStats) {
    println!("\n✓ Rebuilt {} v{}", stats.table, stats.version);
    println!("  Source: {}", stats.source);
    println!("  Rows: {}", stats.rows_written);
    println!(
        "  Coupons: {} campaign, {} manufacturer, {} lines without",
        stats.coupons.campaign, stats.coupons.manufacturer, stats.coupons.no_coupon
    );
    println!("  Content hash: {}", stats.content_hash);
    println!("  Elapsed: {} ms", stats.elapsed_ms);
}
