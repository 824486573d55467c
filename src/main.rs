use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use vmsync_server::config::{load_config, ServerConfig};
use vmsync_server::lifecycle::{self, wait_for_signal};
use vmsync_server::observability::{logging, metrics};
use vmsync_server::EmptyApplication;

#[derive(Parser)]
#[command(name = "vmsync-server")]
#[command(about = "View-model session server speaking JSON-Patch over HTTP and WebSocket", long_about = None)]
struct Args {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = ?args.config, "vmsync-server starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        workers = config.workers.count,
        slots_per_worker = config.session.slots_per_worker,
        versioning = config.patch.versioning,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = lifecycle::start(&config, Arc::new(EmptyApplication)).await?;
    wait_for_signal().await;
    server.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
