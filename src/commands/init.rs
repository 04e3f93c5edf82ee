//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::TableStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Where init put things
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitInfo {
    pub config_path: String,
    pub source_root: String,
    pub store_path: String,
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub base_dir: Option<PathBuf>,
    pub force: bool,
    pub source_root: Option<PathBuf>,
    pub silver_root: Option<PathBuf>,
}

/// Write a default config and create an empty table store
pub async fn cmd_init(options: InitOptions) -> Result<InitInfo> {
    let InitOptions {
        base_dir,
        force,
        source_root,
        silver_root,
    } = options;

    let mut config = Config::default();
    config.init_paths(base_dir);
    if let Some(root) = source_root {
        config.source_root = root;
    }
    if let Some(root) = silver_root {
        config.silver_root = root;
    }

    if config.paths.config_file.exists() && !force {
        return Err(Error::AlreadyInitialized(
            config.paths.base_dir.display().to_string(),
        ));
    }

    std::fs::create_dir_all(&config.paths.base_dir)?;
    config.validate()?;
    config.save()?;
    info!("Created config at {:?}", config.paths.config_file);

    let store = TableStore::connect(&config).await?;
    store.close().await;
    info!("Created table store at {:?}", config.store_file());

    if !config.source_root.is_dir() {
        tracing::warn!(
            "Source root {} does not exist yet; place the extracts there before loading",
            config.source_root.display()
        );
    }

    Ok(InitInfo {
        config_path: config.paths.config_file.display().to_string(),
        source_root: config.source_root.display().to_string(),
        store_path: config.store_file().display().to_string(),
    })
}

pub fn print_init(info: &InitInfo) {
    println!("✓ Initialized journey");
    println!("\nConfiguration: {}", info.config_path);
    println!("Source root: {}", info.source_root);
    println!("Table store: {}", info.store_path);
    println!("\nNext steps:");
    println!("  journey run                      # Load every extract and build transactions_adj");
    println!("  journey load --dataset products  # Refresh one table");
    println!("  journey status                   # Show table versions");
}
