use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use cdrd::bootstrap::Server;
use cdrd::config::Config;
use cdrd::telemetry::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(name = "cdrd")]
#[command(author, version, about = "Call-detail-record listener that stores missed calls")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first (to get log settings)
    let config = Config::load(&args.config)?;

    init_tracing(&TracingConfig::from(&config.telemetry))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "starting cdrd"
    );

    info!(
        listener = %config.listener.name,
        port = config.listener.port,
        framing = ?config.listener.framing,
        writers = config.store.writers.len(),
        "configuration loaded"
    );

    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }

    Server::new(config).run().await
}
