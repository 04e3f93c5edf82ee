//! Custom error types for journey

use thiserror::Error;

/// Main error type for journey operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Source not found for dataset '{dataset}': {path}")]
    SourceNotFound { dataset: String, path: String },

    #[error("Schema mismatch for dataset '{dataset}' ({path}): {detail}")]
    SchemaMismatch {
        dataset: String,
        path: String,
        detail: String,
    },

    #[error(
        "Type mismatch for dataset '{dataset}' ({path}) at line {line}, column '{column}': \
         expected {expected}, found {value:?}"
    )]
    TypeMismatch {
        dataset: String,
        path: String,
        line: u64,
        column: String,
        expected: String,
        value: String,
    },

    #[error("Table '{0}' has not been committed yet; load it before deriving from it")]
    StaleRead(String),

    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Row count mismatch for '{table}': expected {expected}, found {found}")]
    RowCountMismatch {
        table: String,
        expected: i64,
        found: i64,
    },

    #[error("Not initialized: run 'journey init' first")]
    NotInitialized,

    #[error("Already initialized at {0}")]
    AlreadyInitialized(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors that abort a single dataset's branch and leave co-scheduled loads running
    pub fn is_dataset_scoped(&self) -> bool {
        matches!(
            self,
            Error::SourceNotFound { .. }
                | Error::SchemaMismatch { .. }
                | Error::TypeMismatch { .. }
                | Error::StaleRead(_)
                | Error::RowCountMismatch { .. }
        )
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Other(err.to_string())
    }
}

/// Result type alias for journey
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_scoped_errors() {
        let err = Error::SourceNotFound {
            dataset: "products".to_string(),
            path: "/nope/product.csv".to_string(),
        };
        assert!(err.is_dataset_scoped());
        assert!(err.to_string().contains("products"));
        assert!(err.to_string().contains("/nope/product.csv"));

        assert!(!Error::NotInitialized.is_dataset_scoped());
        assert!(!Error::Config("bad".to_string()).is_dataset_scoped());
    }
}
