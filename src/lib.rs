//! journey: the Complete Journey retail extracts as versioned silver tables
//!
//! Raw delimited files are loaded strictly against fixed schemas into a SQLite
//! table store, households gain ordinal surrogates for income and composition,
//! and transaction lines are decomposed into separate discount categories.

pub mod adjust;
pub mod commands;
pub mod config;
pub mod enrich;
pub mod error;
pub mod load;
pub mod progress;
pub mod schema;
pub mod store;
