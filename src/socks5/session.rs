use std::net::SocketAddr;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::socks5::codec;
use crate::socks5::connector::{Connector, ConnectorKind};
use crate::socks5::types::*;

/// Largest read forwarded in one step of the relay.
pub const RELAY_CHUNK_SIZE: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Negotiating,
    AwaitingCommand,
    Resolving,
    Connecting,
    Relaying,
    Closed,
}

#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub connector: ConnectorKind,
}

impl From<&ServerConfig> for SessionConfig {
    fn from(config: &ServerConfig) -> Self {
        SessionConfig {
            idle_timeout: config.idle_timeout,
            connect_timeout: config.connect_timeout,
            connector: config.connector,
        }
    }
}

/// Bytes forwarded in each direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub upstream: u64,
    pub downstream: u64,
}

/// How a session ended.
#[derive(Debug)]
pub struct SessionOutcome {
    /// Last state entered before `Closed`
    pub reached: SessionState,
    pub stats: RelayStats,
    pub error: Option<Error>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Upstream,
    Downstream,
}

/// One client connection, from the first handshake byte to teardown.
pub struct Session {
    client_addr: SocketAddr,
    client: Box<dyn Connector>,
    remote: Option<Box<dyn Connector>>,
    state: SessionState,
    config: SessionConfig,
    stats: RelayStats,
}

impl Session {
    pub fn new(client: Box<dyn Connector>, client_addr: SocketAddr, config: SessionConfig) -> Self {
        Session {
            client_addr,
            client,
            remote: None,
            state: SessionState::Init,
            config,
            stats: RelayStats::default(),
        }
    }

    /// Drive the connection to completion. Errors stay inside the session.
    pub async fn start(mut self) -> SessionOutcome {
        let result = self.run().await;
        let reached = self.state;

        self.close().await;

        SessionOutcome {
            reached,
            stats: self.stats,
            error: result.err(),
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!("{} {:?} -> {:?}", self.client_addr, self.state, next);
        self.state = next;
    }

    async fn run(&mut self) -> Result<()> {
        self.client.set_read_timeout(Some(self.config.idle_timeout));

        self.transition(SessionState::Negotiating);
        self.handle_auth().await?;

        self.transition(SessionState::AwaitingCommand);
        let request = self.read_connection_request().await?;

        self.transition(SessionState::Resolving);
        self.handle_connection(&request).await?;

        self.transition(SessionState::Relaying);
        self.proxy().await
    }

    async fn handle_auth(&mut self) -> Result<()> {
        let request = codec::decode_auth_negotiation(&mut *self.client).await?;
        if request.version != SOCKS_VERSION {
            return Err(Error::VersionMismatch {
                expected: SOCKS_VERSION,
                actual: request.version,
            });
        }

        match select_method(&request.methods) {
            Some(method) => {
                codec::encode_auth_negotiation_reply(&mut *self.client, request.version, method)
                    .await
            }
            None => {
                codec::encode_auth_negotiation_reply(
                    &mut *self.client,
                    request.version,
                    AuthMethod::NoAcceptableMethod,
                )
                .await?;
                Err(Error::NoAcceptableMethod)
            }
        }
    }

    async fn read_connection_request(&mut self) -> Result<CommandRequest> {
        let request = codec::decode_command(&mut *self.client).await?;
        if request.version != SOCKS_VERSION {
            return Err(Error::VersionMismatch {
                expected: SOCKS_VERSION,
                actual: request.version,
            });
        }
        if request.command != SocksCommand::Connect {
            return Err(Error::UnsupportedCommand(request.command.code()));
        }
        Ok(request)
    }

    async fn handle_connection(&mut self, request: &CommandRequest) -> Result<()> {
        let remote = self
            .config
            .connector
            .open(&request.address, request.port, self.config.connect_timeout)
            .await?;
        // Owned by the session from here on so teardown closes it on every path.
        self.remote = Some(remote);

        tracing::trace!("{} -> {}", self.client_addr, request.destination());
        self.transition(SessionState::Connecting);
        let remote = self.remote.as_mut().ok_or(Error::NotConnected)?;
        remote.connect().await?;

        let bind_address = remote.local_endpoint()?;
        let address_type = match bind_address.family {
            AddressFamily::Ipv4 => AddressType::Ipv4,
            AddressFamily::Ipv6 => AddressType::Ipv6,
            AddressFamily::Unresolved => return Err(Error::UnknownSocketFamily),
        };

        codec::encode_command_reply(
            &mut *self.client,
            request.version,
            request.command,
            address_type,
            &bind_address,
        )
        .await
    }

    async fn proxy(&mut self) -> Result<()> {
        let client: &mut dyn Connector = &mut *self.client;
        let remote: &mut dyn Connector = match self.remote.as_mut() {
            Some(remote) => &mut **remote,
            None => return Err(Error::NotConnected),
        };

        // The client's read timeout restarts every iteration, so it bounds how
        // long both sides may stay silent.
        loop {
            let (direction, data) = tokio::select! {
                data = client.receive(RELAY_CHUNK_SIZE) => (Direction::Upstream, data?),
                data = remote.receive(RELAY_CHUNK_SIZE) => (Direction::Downstream, data?),
            };
            if data.is_empty() {
                return Ok(());
            }

            match direction {
                Direction::Upstream => {
                    remote.send(&data).await?;
                    self.stats.upstream += data.len() as u64;
                }
                Direction::Downstream => {
                    client.send(&data).await?;
                    self.stats.downstream += data.len() as u64;
                }
            }
        }
    }

    /// Close both legs. Safe on every exit path; each connector is closed once.
    async fn close(&mut self) {
        if let Some(mut remote) = self.remote.take() {
            if let Err(e) = remote.close().await {
                tracing::trace!("{} remote close failed: {}", self.client_addr, e);
            }
        }
        if let Err(e) = self.client.close().await {
            tracing::trace!("{} client close failed: {}", self.client_addr, e);
        }
        self.transition(SessionState::Closed);
    }
}
