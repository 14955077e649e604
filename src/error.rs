//! Error types for the relay.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while serving a SOCKS5 connection.
#[derive(Error, Debug)]
pub enum Error {
    /// Client spoke a SOCKS version other than 5
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    /// None of the offered methods is supported
    #[error("no acceptable authentication method")]
    NoAcceptableMethod,

    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("unsupported address type {0:#04x}")]
    UnsupportedAddressType(u8),

    /// Peer closed before a full message arrived
    #[error("truncated message: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("malformed message: {0}")]
    Malformed(String),

    /// Destination did not resolve to any address
    #[error("cannot resolve address {host}:{port}")]
    Resolution { host: String, port: u16 },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    /// No data arrived within the idle timeout
    #[error("socket timeout after {}s idle", .0.as_secs())]
    IdleTimeout(Duration),

    #[error("duplicated connection")]
    AlreadyConnected,

    #[error("connector is not connected")]
    NotConnected,

    /// Outbound socket reported a family we cannot describe in a reply
    #[error("unknown socket family")]
    UnknownSocketFamily,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::Malformed(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Errors caused by what the client sent rather than by the network.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Error::VersionMismatch { .. }
                | Error::NoAcceptableMethod
                | Error::UnsupportedCommand(_)
                | Error::UnsupportedAddressType(_)
                | Error::Truncated { .. }
                | Error::Malformed(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::IdleTimeout(_) | Error::ConnectTimeout { .. })
    }
}
