//! A SOCKS5 relay: CONNECT-only, no authentication, one task per client.

pub mod config;
pub mod error;
pub mod socks5;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use socks5::connector::{Connector, ConnectorKind, TcpConnector};
pub use socks5::server::{Server, ShutdownHandle};
