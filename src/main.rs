//! journey CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use journey::{
    commands::{
        cmd_adjust, cmd_init, cmd_load, cmd_query, cmd_run, cmd_status, print_adjust_stats,
        print_init, print_load_report, print_query_results, print_run_report, print_status,
        InitOptions,
    },
    config::Config,
    error::{Error, Result},
    progress::LogWriterFactory,
    schema::Dataset,
    store::TableStore,
};
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "journey")]
#[command(version, about = "Load the Complete Journey extracts into versioned silver tables", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and create the table store
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,

        /// Directory holding the raw extracts
        #[arg(long, env = "JOURNEY_SOURCE_ROOT")]
        source_root: Option<PathBuf>,

        /// Directory for the silver table store
        #[arg(long, env = "JOURNEY_SILVER_ROOT")]
        silver_root: Option<PathBuf>,
    },

    /// Load raw extracts into their silver tables
    Load {
        /// Only load these datasets (repeatable; defaults to all)
        #[arg(short, long = "dataset", value_name = "NAME")]
        datasets: Vec<String>,
    },

    /// Rebuild transactions_adj from the committed transactions table
    Adjust,

    /// Load every extract, then rebuild transactions_adj
    Run,

    /// Show table versions and the latest load attempts
    Status,

    /// Run an ad-hoc SQL query over the silver tables
    Query {
        /// SQL statement
        sql: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(0) => {}
        Ok(_) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Returns the number of failed dataset operations
async fn run() -> Result<usize> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    // Init and completions run without an existing config or store
    let command = match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "journey", &mut std::io::stdout());
            return Ok(0);
        }
        Commands::Init {
            force,
            source_root,
            silver_root,
        } => {
            let options = InitOptions {
                base_dir: Some(base_dir_for(cli.config.as_deref())),
                force,
                source_root,
                silver_root,
            };
            let info = cmd_init(options).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print_init(&info);
            }
            return Ok(0);
        }
        command => command,
    };

    let config = load_config(cli.config.as_deref())?;
    let store = TableStore::connect(&config).await?;

    let failures = match command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Load { datasets } => {
            let datasets = datasets
                .iter()
                .map(|name| name.parse::<Dataset>())
                .collect::<Result<Vec<_>>>()?;
            let report = cmd_load(&config, &store, &datasets).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_load_report(&report);
            }
            report.failures()
        }

        Commands::Adjust => {
            let stats = cmd_adjust(&store).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_adjust_stats(&stats);
            }
            0
        }

        Commands::Run => {
            let report = cmd_run(&config, &store).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_run_report(&report);
            }
            report.failures()
        }

        Commands::Status => {
            let status = cmd_status(&config, &store).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
            0
        }

        Commands::Query { sql } => {
            let rows = cmd_query(&store, &sql).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_query_results(&rows);
            }
            0
        }
    };

    Ok(failures)
}

/// A `.toml` path names the config file itself; anything else is its directory
fn base_dir_for(path: Option<&Path>) -> PathBuf {
    match path {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(Config::default_base_dir),
        Some(path) => path.to_path_buf(),
        None => Config::default_base_dir(),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = match path {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => path.to_path_buf(),
        Some(dir) => dir.join("config.toml"),
        None => Config::default_config_path(),
    };

    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }
    Config::load(&config_path)
}
