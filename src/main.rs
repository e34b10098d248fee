//! framewire: length-prefixed TCP services
//!
//! One binary, three modes:
//! - echo: every frame is written back to its sender
//! - broker: sessions join named channels and broadcast within them
//! - client: connects, handshakes, keeps alive and reconnects forever
//!
//! Configuration via CLI arguments or TOML file.

use std::sync::Arc;

use framewire::client::{Client, TcpConnector};
use framewire::config::{Config, Mode};
use framewire::protocols::broker::Broker;
use framewire::protocols::echo::EchoHandler;
use framewire::server::{Server, SessionHandler};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        mode = ?config.mode,
        header = ?config.codec().encoding(),
        idle_timeout = config.idle_timeout,
        "Starting framewire"
    );

    match config.mode {
        Mode::Echo => run_server(&config, Arc::new(EchoHandler)).await,
        Mode::Broker => run_server(&config, Arc::new(Broker::new())).await,
        Mode::Client => run_client(&config).await,
    }
}

/// Serve `handler` until Ctrl-C
async fn run_server(
    config: &Config,
    handler: Arc<dyn SessionHandler>,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(
        config.listen,
        config.session_options(),
        config.max_connections,
        handler,
    )?;
    server.run_until(shutdown_signal()).await?;
    Ok(())
}

/// Run the reconnecting client until Ctrl-C
async fn run_client(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(endpoint = %config.connect, id = %config.handshake_id, "Using client mode");

    let mut client = Client::new(TcpConnector::new(&config.connect), config.client_options());
    client.set_on_message(|session, message| {
        info!(
            peer = %session.address(),
            message = %String::from_utf8_lossy(&message),
            "Received"
        );
    });
    client.run_until(shutdown_signal()).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
