//! Byte-stream transports used for both legs of a relayed connection.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::socks5::types::Address;

/// A bidirectional byte stream owned by exactly one session.
#[async_trait]
pub trait Connector: Send {
    /// Establish the underlying stream.
    async fn connect(&mut self) -> Result<()>;

    /// Release the stream. Calling it again, or before `connect`, is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Write all of `data`.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read at most `max_len` bytes. An empty buffer means the peer shut down.
    async fn receive(&mut self, max_len: usize) -> Result<Vec<u8>>;

    /// The locally bound endpoint of a connected stream.
    fn local_endpoint(&self) -> Result<Address>;

    /// Bound every subsequent `receive`; `None` waits forever.
    fn set_read_timeout(&mut self, timeout: Option<Duration>);
}

/// Transports the server can open outbound connections with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectorKind {
    #[default]
    Tcp,
}

impl ConnectorKind {
    /// Resolve `host:port` and return an unconnected connector for it.
    pub async fn open(
        self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Box<dyn Connector>> {
        match self {
            ConnectorKind::Tcp => {
                let connector = TcpConnector::resolve(host, port, connect_timeout).await?;
                Ok(Box::new(connector))
            }
        }
    }
}

#[derive(Debug)]
enum ConnectorState {
    Unconnected,
    Connected(TcpStream),
    Closed,
}

/// Plain TCP transport.
#[derive(Debug)]
pub struct TcpConnector {
    remote_addr: Option<SocketAddr>,
    state: ConnectorState,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl TcpConnector {
    /// Resolve the target first; the first returned address is used.
    pub async fn resolve(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let remote_addr = lookup_host((host, port))
            .await
            .map_err(|e| {
                tracing::debug!("resolve {}:{} failed: {}", host, port, e);
                Error::Resolution {
                    host: host.to_string(),
                    port,
                }
            })?
            .next()
            .ok_or_else(|| Error::Resolution {
                host: host.to_string(),
                port,
            })?;

        Ok(TcpConnector {
            remote_addr: Some(remote_addr),
            state: ConnectorState::Unconnected,
            connect_timeout: Some(connect_timeout),
            read_timeout: None,
        })
    }

    /// Wrap a stream that is already connected, such as an accepted client.
    pub fn accepted(stream: TcpStream) -> Self {
        TcpConnector {
            remote_addr: stream.peer_addr().ok(),
            state: ConnectorState::Connected(stream),
            connect_timeout: None,
            read_timeout: None,
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        match &mut self.state {
            ConnectorState::Connected(stream) => Ok(stream),
            _ => Err(Error::NotConnected),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&mut self) -> Result<()> {
        match self.state {
            ConnectorState::Unconnected => {}
            ConnectorState::Connected(_) => return Err(Error::AlreadyConnected),
            ConnectorState::Closed => return Err(Error::NotConnected),
        }
        let addr = self.remote_addr.ok_or(Error::NotConnected)?;

        let connecting = TcpStream::connect(addr);
        let result = match self.connect_timeout {
            Some(limit) => timeout(limit, connecting)
                .await
                .map_err(|_| Error::ConnectTimeout {
                    addr,
                    timeout: limit,
                })?,
            None => connecting.await,
        };
        let stream = result.map_err(|source| Error::Connect { addr, source })?;

        self.state = ConnectorState::Connected(stream);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let ConnectorState::Connected(mut stream) =
            std::mem::replace(&mut self.state, ConnectorState::Closed)
        {
            // The socket is released on drop whether or not the FIN makes it out.
            if let Err(e) = stream.shutdown().await {
                tracing::trace!("shutdown failed: {}", e);
            }
        }
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream()?.write_all(data).await?;
        Ok(())
    }

    async fn receive(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let read_timeout = self.read_timeout;
        let stream = self.stream()?;
        let mut buf = vec![0u8; max_len];

        let n = match read_timeout {
            Some(limit) => timeout(limit, stream.read(&mut buf))
                .await
                .map_err(|_| Error::IdleTimeout(limit))??,
            None => stream.read(&mut buf).await?,
        };
        buf.truncate(n);
        Ok(buf)
    }

    fn local_endpoint(&self) -> Result<Address> {
        match &self.state {
            ConnectorState::Connected(stream) => Ok(Address::from(stream.local_addr()?)),
            _ => Err(Error::NotConnected),
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }
}
