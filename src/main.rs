use anyhow::Result;
use clap::Parser;
use dabbawala::config::Config;
use dabbawala::gateway;
use dabbawala::orders::SqliteOrderStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dabbawala", about = "Tiffin ordering gateway", version)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the order ledger.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Bind host (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides config).
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.gateway.host = host;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    std::fs::create_dir_all(&cli.data_dir)?;
    let store = SqliteOrderStore::open(&cli.data_dir.join("orders.db"))?;

    gateway::run_gateway(&config, Arc::new(store)).await
}
