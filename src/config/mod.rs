//! Configuration management for journey
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the table store inside the silver root
pub const STORE_FILE_NAME: &str = "journey.db";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the raw delimited extracts
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,

    /// Directory holding the silver-tier table store
    #[serde(default = "default_silver_root")]
    pub silver_root: PathBuf,

    /// Table store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Load configuration
    #[serde(default)]
    pub load: LoadConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Table store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum SQLite connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds a writer waits for the database lock
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,

    /// Rows written per committed staging transaction
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds a staging table may go without progress before it is swept
    #[serde(default = "default_stale_staging_secs")]
    pub stale_staging_secs: u64,
}

/// How a load reacts to a row that cannot be coerced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Abort the whole load on the first bad row
    #[default]
    Fail,
    /// Drop the bad row, log it and keep going
    SkipRow,
}

/// Load configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(default)]
    pub strictness: Strictness,

    /// Maximum base loads running at once
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Row batches buffered between the CSV parser and the writer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for journey settings
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_root: default_source_root(),
            silver_root: default_silver_root(),
            store: StoreConfig::default(),
            load: LoadConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout_secs(),
            batch_size: default_batch_size(),
            stale_staging_secs: default_stale_staging_secs(),
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            strictness: Strictness::default(),
            parallelism: default_parallelism(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Config {
    /// Get the default base directory for journey (~/.journey)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".journey")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub(crate) fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            base_dir: base,
        };
    }

    /// Path of the SQLite file backing the table store
    pub fn store_file(&self) -> PathBuf {
        self.silver_root.join(STORE_FILE_NAME)
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.store.max_connections < 2 {
            return Err(Error::Config(
                "store.max_connections must be >= 2".to_string(),
            ));
        }

        if self.store.batch_size == 0 {
            return Err(Error::Config("store.batch_size must be positive".to_string()));
        }

        if self.load.parallelism == 0 {
            return Err(Error::Config("load.parallelism must be positive".to_string()));
        }

        if self.load.channel_capacity == 0 {
            return Err(Error::Config(
                "load.channel_capacity must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.batch_size, 10_000);
        assert_eq!(config.load.strictness, Strictness::Fail);
        assert!(config.store_file().ends_with("journey.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.source_root = tmp.path().join("bronze");
        config.load.strictness = Strictness::SkipRow;

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.source_root, tmp.path().join("bronze"));
        assert_eq!(loaded.load.strictness, Strictness::SkipRow);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "source_root = \"/data/bronze\"\n\n[load]\nstrictness = \"skip_row\"\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.source_root, PathBuf::from("/data/bronze"));
        assert_eq!(config.load.strictness, Strictness::SkipRow);
        assert_eq!(config.load.parallelism, default_parallelism());
        assert_eq!(config.store.max_connections, default_max_connections());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.store.max_connections = 1;
        assert!(config.validate().is_err());
        config.store.max_connections = 2;
        assert!(config.validate().is_ok());

        config.store.batch_size = 0;
        assert!(config.validate().is_err());
        config.store.batch_size = 10;

        config.load.parallelism = 0;
        assert!(config.validate().is_err());
    }
}
