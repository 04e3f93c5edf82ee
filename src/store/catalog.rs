//! Catalog schema and bookkeeping records

use crate::error::{Error, Result};
use crate::schema::Column;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix of hidden tables that hold a dataset while it is being built
pub const STAGING_PREFIX: &str = "_staging_";

/// Bookkeeping tables that datasets may not overwrite
pub const RESERVED_TABLES: [&str; 3] = ["_catalog", "_load_runs", "_stage_leases"];

/// SQL schema for the store's own bookkeeping tables
pub const CATALOG_SQL: &str = r#"
-- Catalog: one row per published table
CREATE TABLE IF NOT EXISTS _catalog (
    name TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    row_count INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    columns_json TEXT NOT NULL,
    source TEXT NOT NULL,
    published_at TEXT NOT NULL
);

-- Load runs: tracking history
CREATE TABLE IF NOT EXISTS _load_runs (
    id TEXT PRIMARY KEY,
    table_name TEXT NOT NULL,
    source TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    rows_loaded INTEGER DEFAULT 0,
    rows_rejected INTEGER DEFAULT 0,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_load_runs_table ON _load_runs(table_name);

-- Stage leases: who is building each staging table, and when it last made progress
CREATE TABLE IF NOT EXISTS _stage_leases (
    staging_name TEXT PRIMARY KEY,
    table_name TEXT NOT NULL,
    touched_at INTEGER NOT NULL
);
"#;

/// Load run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(Error::Other(format!("Unknown run status: {}", s))),
        }
    }
}

/// A published table as recorded in the catalog
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub version: i64,
    pub row_count: i64,
    pub content_hash: String,
    pub columns_json: String,
    pub source: String,
    pub published_at: String,
}

impl TableInfo {
    pub fn columns(&self) -> Result<Vec<Column>> {
        Ok(serde_json::from_str(&self.columns_json)?)
    }
}

/// A load attempt record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LoadRun {
    pub id: String,
    pub table_name: String,
    pub source: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub rows_loaded: i64,
    pub rows_rejected: i64,
    pub error: Option<String>,
}

impl LoadRun {
    pub fn new(table_name: String, source: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            table_name,
            source,
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
            status: RunStatus::Running.to_string(),
            rows_loaded: 0,
            rows_rejected: 0,
            error: None,
        }
    }

    pub fn get_status(&self) -> Result<RunStatus> {
        self.status.parse()
    }
}

/// Reject names that are not plain lowercase identifiers
pub fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c == '_')
        .unwrap_or(false);
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    let reserved = name.starts_with(STAGING_PREFIX) || RESERVED_TABLES.contains(&name);

    if valid_start && valid_rest && !reserved {
        Ok(())
    } else {
        Err(Error::InvalidTableName(name.to_string()))
    }
}

/// Quote an already validated identifier
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name)
}

pub(crate) fn staging_name(table: &str) -> String {
    format!("{}{}_{}", STAGING_PREFIX, table, Uuid::new_v4().simple())
}
