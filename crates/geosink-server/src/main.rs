use anyhow::{Context, Result};
use clap::Parser;
use geosink_config::RuntimeConfig;
use std::path::PathBuf;

/// Location ingestion pipeline: queue store to warehouse via object storage
#[derive(Parser)]
#[command(name = "geosink")]
#[command(version)]
#[command(about = "Drains location queues into the warehouse through staged object storage", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run exactly one pipeline tick and exit (non-zero on failure)
    #[arg(long)]
    once: bool,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut config = if let Some(config_path) = &cli.config {
        RuntimeConfig::load_from_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        RuntimeConfig::load().context("Failed to load configuration")?
    };

    if let Some(level) = &cli.log_level {
        let server = config
            .server
            .get_or_insert_with(geosink_config::ServerConfig::default);
        server.log_level = level.clone();
    }

    if cli.once {
        geosink_server::run_once(config).await
    } else {
        geosink_server::run_with_config(config).await
    }
}
