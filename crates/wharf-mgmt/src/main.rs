use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wharf_meta::MetaStore;
use wharf_mgmt::{BrokerApi, BrokerConfig};

#[derive(Parser)]
#[command(name = "wharf-broker", about = "Metadata broker for a proxy-fronted storage fleet")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the broker and its control-plane API
    Serve {
        /// Path to a TOML or JSON configuration file
        #[arg(long, default_value = "wharf.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config } => serve(config).await,
    }
}

async fn serve(config_path: PathBuf) -> Result<()> {
    let config = if config_path.exists() {
        BrokerConfig::from_file(&config_path)?
    } else {
        tracing::warn!(
            "Config file not found, using defaults: {}",
            config_path.display()
        );
        BrokerConfig::default()
    };

    let store = match &config.snapshot_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "opening persisted metadata snapshot");
            Arc::new(MetaStore::open(path)?)
        }
        None => {
            tracing::info!("running with in-memory metadata only");
            Arc::new(MetaStore::new())
        }
    };

    let api = BrokerApi::new(store, config.migration_settings());
    api.serve(config.bind_addr).await
}
