// Telemetry Ingestion Server - Main Entry Point

use clap::Parser;
use fleet_ingest::config::Config;
use fleet_ingest::net::listener::TcpServer;
use fleet_ingest::net::session::SessionSettings;
use fleet_ingest::store::{PgStore, StoreGateway};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    info!("Starting telemetry ingestion server");

    let store = match PgStore::connect(&config.database_url, config.db_pool_size).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to connect to the telemetry store: {}", e);
            return Err(e.into());
        }
    };
    let store: Arc<dyn StoreGateway> = Arc::new(store);
    info!("Store gateway connected");

    let settings = session_settings(&config);
    let shutdown = CancellationToken::new();

    // Setup device listeners
    let mut servers: Vec<TcpServer> = Vec::new();

    if config.listen.is_empty() {
        warn!("No listen addresses specified! Use --listen [host:]port");
    }

    for listen_addr in &config.listen {
        // Bare port means all interfaces
        let addr_str = if listen_addr.contains(':') {
            listen_addr.clone()
        } else {
            format!("0.0.0.0:{listen_addr}")
        };

        match addr_str.parse::<std::net::SocketAddr>() {
            Ok(addr) => {
                match TcpServer::start(addr, store.clone(), settings.clone(), shutdown.clone())
                    .await
                {
                    Ok(server) => servers.push(server),
                    Err(e) => error!("Failed to start listener on {}: {}", addr, e),
                }
            }
            Err(e) => error!("Invalid listen address '{}': {}", addr_str, e),
        }
    }

    info!("Server ready");

    // Wait for shutdown signal (Ctrl+C)
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal (Ctrl+C)");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
            return Err(err.into());
        }
    }

    // Graceful shutdown: stop accepting, signal sessions, bounded drain
    info!("Shutting down...");
    shutdown.cancel();
    let drain = Duration::from_secs(config.shutdown_timeout);
    for server in servers {
        server.shutdown(drain).await;
    }

    info!("Server stopped");

    Ok(())
}

fn session_settings(config: &Config) -> SessionSettings {
    SessionSettings {
        peek_timeout: Duration::from_secs(config.peek_timeout),
        idle_timeout_tfms90: Duration::from_secs(config.idle_timeout_tfms90),
        idle_timeout_teltonika: Duration::from_secs(config.idle_timeout_teltonika),
        coalesce_interval: Duration::from_secs(config.coalesce_interval),
        insert_queue_depth: config.drop_queue,
        ..SessionSettings::default()
    }
}

/// Logging setup: an explicit RUST_LOG wins; otherwise --verbose picks
/// the debug floor, info by default.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let fallback = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
