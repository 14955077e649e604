use std::time::Duration;

use clap::{Parser, ValueEnum};

use socks5_relay::config::{DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT};
use socks5_relay::{ConnectorKind, Server, ServerConfig};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Transport {
    Tcp,
}

impl From<Transport> for ConnectorKind {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Tcp => ConnectorKind::Tcp,
        }
    }
}

/// SOCKS5 relay (CONNECT only, no authentication)
#[derive(Parser, Debug)]
#[command(name = "socks5-relay", version)]
struct Args {
    /// Local address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Local port to bind
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum number of connections handled at once
    #[arg(short = 'm', long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// Seconds a client connection may stay idle
    #[arg(long, default_value_t = 300)]
    idle_timeout: u64,

    /// Seconds to wait for the outbound connection
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Seconds to wait for open connections on shutdown
    #[arg(long, default_value_t = 5)]
    shutdown_grace: u64,

    /// Transport used to reach destinations
    #[arg(long, value_enum, default_value_t = Transport::Tcp)]
    connector: Transport,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            max_connections: self.max_connections,
            idle_timeout: Duration::from_secs(self.idle_timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            shutdown_grace: Duration::from_secs(self.shutdown_grace),
            connector: self.connector.into(),
            ..ServerConfig::new(self.host, self.port)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Respects RUST_LOG (e.g. RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Args::parse().into_config();
    let server = Server::bind(config).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        if shutdown.trigger() {
            tracing::info!("Shutdown signal received, no longer accepting connections");
        }
    });

    server.run().await?;
    Ok(())
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}
