//! Default values for configuration

use std::path::PathBuf;

/// Default bronze root holding the raw extracts
pub fn default_source_root() -> PathBuf {
    std::env::var("JOURNEY_SOURCE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp/completejourney/bronze"))
}

/// Default silver root holding the table store
pub fn default_silver_root() -> PathBuf {
    std::env::var("JOURNEY_SILVER_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp/completejourney/silver"))
}

/// Default pool size (one stream reader plus staging writers)
pub fn default_max_connections() -> u32 {
    4
}

/// Default time a writer waits on the SQLite lock
pub fn default_busy_timeout_secs() -> u64 {
    60
}

/// Default rows per committed staging transaction
pub fn default_batch_size() -> usize {
    10_000
}

/// Default age after which an unrenewed staging lease counts as abandoned
pub fn default_stale_staging_secs() -> u64 {
    3600
}

/// Default number of base loads in flight
pub fn default_parallelism() -> usize {
    4
}

/// Default row batches buffered between parser and writer
pub fn default_channel_capacity() -> usize {
    4
}
