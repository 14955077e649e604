//! Server configuration.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::socks5::connector::ConnectorKind;

pub const DEFAULT_PORT: u16 = 1080;
pub const DEFAULT_MAX_CONNECTIONS: usize = 4096;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_ACCEPT_POLL: Duration = Duration::from_secs(1);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen host, resolved at bind time
    pub listen_host: String,
    /// Listen port
    pub listen_port: u16,
    /// Maximum concurrently handled connections, also used as listen backlog
    pub max_connections: usize,
    /// Idle timeout applied to every client connection
    pub idle_timeout: Duration,
    /// Timeout for the outbound connect
    pub connect_timeout: Duration,
    /// How often the accept loop re-checks the running flag
    pub accept_poll: Duration,
    /// How long shutdown waits for in-flight connections
    pub shutdown_grace: Duration,
    /// Transport used for outbound connections
    pub connector: ConnectorKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            accept_poll: DEFAULT_ACCEPT_POLL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            connector: ConnectorKind::Tcp,
        }
    }
}

impl ServerConfig {
    pub fn new(listen_host: impl Into<String>, listen_port: u16) -> Self {
        Self {
            listen_host: listen_host.into(),
            listen_port,
            ..Self::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.listen_host.is_empty() {
            return Err(Error::config("listen_host cannot be empty"));
        }
        if self.max_connections == 0 {
            return Err(Error::config("max_connections must be positive"));
        }
        if self.idle_timeout.is_zero() {
            return Err(Error::config("idle_timeout must be non-zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect_timeout must be non-zero"));
        }
        if self.accept_poll.is_zero() {
            return Err(Error::config("accept_poll must be non-zero"));
        }
        Ok(())
    }

    /// Listen backlog, clamped to what the OS call accepts.
    pub fn backlog(&self) -> u32 {
        u32::try_from(self.max_connections).unwrap_or(u32::MAX)
    }
}
