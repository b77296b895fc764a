use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use mirror_proxy::config::resolve_config;
use mirror_proxy::lifecycle::{spawn_signal_handler, Shutdown};
use mirror_proxy::observability::{init_logging, metrics};
use mirror_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "mirror-proxy")]
#[command(about = "Reverse proxy that mirrors a site under another host", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults and MIRROR_* variables apply without one.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = resolve_config(cli.config.as_deref())?;
    init_logging(&config.observability);

    if cli.check {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    tracing::info!(
        backend = %config.backend.origin,
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        max_body_bytes = config.rewrite.max_body_bytes,
        "mirror-proxy v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);

    let server = HttpServer::new(config)?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
