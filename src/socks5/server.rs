//! Listener lifecycle, admission control and shutdown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{lookup_host, TcpListener, TcpSocket};
use tokio::time::{sleep, timeout};
use tracing::Level;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::socks5::connector::TcpConnector;
use crate::socks5::registry::Registry;
use crate::socks5::session::{Session, SessionConfig, SessionOutcome};

/// Pause before re-checking a full registry or after a failed accept.
const ADMISSION_BACKOFF: Duration = Duration::from_millis(5);

/// Stops a running server. The flag only ever goes from running to stopped.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Returns `true` for the call that actually stopped the server.
    pub fn trigger(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    running: Arc<AtomicBool>,
    registry: Arc<Registry>,
}

impl Server {
    /// Resolve the listen address and start listening on it.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let unresolved = || Error::Resolution {
            host: config.listen_host.clone(),
            port: config.listen_port,
        };
        let addr = lookup_host((config.listen_host.as_str(), config.listen_port))
            .await
            .map_err(|_| unresolved())?
            .next()
            .ok_or_else(unresolved)?;

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(config.backlog())?;

        tracing::info!(
            "SOCKS5 relay listening on {} (max {} connections)",
            listener.local_addr()?,
            config.max_connections
        );

        Ok(Server {
            config,
            listener,
            running: Arc::new(AtomicBool::new(true)),
            registry: Arc::new(Registry::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: Arc::clone(&self.running),
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until shut down, then drain.
    pub async fn run(self) -> Result<()> {
        let Server {
            config,
            listener,
            running,
            registry,
        } = self;
        let session_config = SessionConfig::from(&config);

        while running.load(Ordering::SeqCst) {
            if registry.len() >= config.max_connections && registry.reclaim() == 0 {
                sleep(ADMISSION_BACKOFF).await;
                continue;
            }

            let (stream, client_addr) = match timeout(config.accept_poll, listener.accept()).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    tracing::warn!("Accept error: {}", e);
                    sleep(ADMISSION_BACKOFF).await;
                    continue;
                }
                Ok(Ok(accepted)) => accepted,
            };
            tracing::debug!("SOCKS5 connection from {}", client_addr);

            let session = Session::new(
                Box::new(TcpConnector::accepted(stream)),
                client_addr,
                session_config,
            );
            let handle = tokio::spawn(async move {
                let outcome = session.start().await;
                log_outcome(client_addr, &outcome);
            });
            registry.insert(client_addr, handle);
        }

        drop(listener);
        tracing::info!("Listener closed, {} connections tracked", registry.len());
        clean_up(&registry, config.shutdown_grace).await;
        Ok(())
    }
}

/// Timeouts are worth seeing at the default level; protocol noise is not.
fn outcome_level(outcome: &SessionOutcome) -> Level {
    match &outcome.error {
        None => Level::DEBUG,
        Some(e) if e.is_timeout() => Level::INFO,
        Some(e) if e.is_protocol_error() => Level::DEBUG,
        Some(Error::UnknownSocketFamily) => Level::WARN,
        Some(_) => Level::INFO,
    }
}

fn log_outcome(client_addr: SocketAddr, outcome: &SessionOutcome) {
    let stats = outcome.stats;
    match (&outcome.error, outcome_level(outcome)) {
        (None, _) => tracing::debug!(
            "{} closed, {} bytes up, {} bytes down",
            client_addr,
            stats.upstream,
            stats.downstream
        ),
        (Some(e), Level::WARN) => {
            tracing::warn!("{} dropped in {:?}: {}", client_addr, outcome.reached, e)
        }
        (Some(e), Level::INFO) => {
            tracing::info!("{} dropped in {:?}: {}", client_addr, outcome.reached, e)
        }
        (Some(e), _) => {
            tracing::debug!("{} dropped in {:?}: {}", client_addr, outcome.reached, e)
        }
    }
}

async fn clean_up(registry: &Registry, grace: Duration) {
    let reclaimed = registry.reclaim();
    tracing::debug!("Reclaimed {} finished connections", reclaimed);

    let remaining = registry.drain(grace).await;
    if remaining > 0 {
        tracing::warn!(
            "{} connections still open after {:?}, leaving them to finish",
            remaining,
            grace
        );
    }
}
