use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::from_utf8;

use byteorder::{BigEndian, WriteBytesExt};
use nom::combinator::{map, map_res};
use nom::multi::{length_data, many0};
use nom::number::complete::{be_u16, be_u32, be_u8};
use nom::sequence::tuple;
use nom::IResult;

use crate::error::{Error, Result};

// SOCKS 5 PROTOCOL: https://www.ietf.org/rfc/rfc1928.txt
pub const SOCKS_VERSION: u8 = 0x05;
pub const RESERVED: u8 = 0x00;
pub const REPLY_SUCCEEDED: u8 = 0x00;

/// Methods this server is willing to use, in order of preference.
pub const METHODS_SUPPORTED: &[AuthMethod] = &[AuthMethod::NoAuth];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    NoAuth,
    GSSAPI,
    UserNamePassword,
    NoAcceptableMethod,
    Other(u8),
}

impl From<u8> for AuthMethod {
    fn from(byte: u8) -> Self {
        match byte {
            0x00 => AuthMethod::NoAuth,
            0x01 => AuthMethod::GSSAPI,
            0x02 => AuthMethod::UserNamePassword,
            0xFF => AuthMethod::NoAcceptableMethod,
            other => AuthMethod::Other(other),
        }
    }
}

impl From<AuthMethod> for u8 {
    fn from(method: AuthMethod) -> u8 {
        match method {
            AuthMethod::NoAuth => 0x00,
            AuthMethod::GSSAPI => 0x01,
            AuthMethod::UserNamePassword => 0x02,
            AuthMethod::NoAcceptableMethod => 0xFF,
            AuthMethod::Other(byte) => byte,
        }
    }
}

/// First method from `METHODS_SUPPORTED` that the client offered.
pub fn select_method(offered: &[AuthMethod]) -> Option<AuthMethod> {
    METHODS_SUPPORTED
        .iter()
        .copied()
        .find(|method| offered.contains(method))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocksCommand {
    Connect,
    Bind,
    UdpAssociate,
    Other(u8),
}

impl From<u8> for SocksCommand {
    fn from(byte: u8) -> Self {
        match byte {
            0x01 => SocksCommand::Connect,
            0x02 => SocksCommand::Bind,
            0x03 => SocksCommand::UdpAssociate,
            other => SocksCommand::Other(other),
        }
    }
}

impl SocksCommand {
    pub fn code(self) -> u8 {
        match self {
            SocksCommand::Connect => 0x01,
            SocksCommand::Bind => 0x02,
            SocksCommand::UdpAssociate => 0x03,
            SocksCommand::Other(byte) => byte,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressType {
    Ipv4,
    Domain,
    Ipv6,
    Other(u8),
}

impl From<u8> for AddressType {
    fn from(byte: u8) -> Self {
        match byte {
            0x01 => AddressType::Ipv4,
            0x03 => AddressType::Domain,
            0x04 => AddressType::Ipv6,
            other => AddressType::Other(other),
        }
    }
}

impl AddressType {
    pub fn code(self) -> u8 {
        match self {
            AddressType::Ipv4 => 0x01,
            AddressType::Domain => 0x03,
            AddressType::Ipv6 => 0x04,
            AddressType::Other(byte) => byte,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
    Unresolved,
}

/// A resolved (or not yet resolved) endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
    pub family: AddressFamily,
}

impl Address {
    pub fn unresolved(host: impl Into<String>, port: u16) -> Self {
        Address {
            host: host.into(),
            port,
            family: AddressFamily::Unresolved,
        }
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match self.family {
            AddressFamily::Unresolved => None,
            _ => self.host.parse().ok(),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        let family = match addr {
            SocketAddr::V4(_) => AddressFamily::Ipv4,
            SocketAddr::V6(_) => AddressFamily::Ipv6,
        };
        Address {
            host: addr.ip().to_string(),
            port: addr.port(),
            family,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            AddressFamily::Ipv6 => write!(f, "[{}]:{}", self.host, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub version: u8,
    pub methods: Vec<AuthMethod>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandshakeReply {
    pub version: u8,
    pub method: AuthMethod,
}

impl HandshakeReply {
    pub fn to_bytes(&self) -> Vec<u8> {
        vec![self.version, u8::from(self.method)]
    }
}

/// The fixed four bytes in front of every command request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandHeader {
    pub version: u8,
    pub command: SocksCommand,
    pub reserved: u8,
    pub address_type: AddressType,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandRequest {
    pub version: u8,
    pub command: SocksCommand,
    pub reserved: u8,
    pub address_type: AddressType,
    pub address: String,
    pub port: u16,
}

impl CommandRequest {
    pub fn destination(&self) -> Address {
        Address::unresolved(self.address.clone(), self.port)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandReply {
    pub version: u8,
    pub status: u8,
    pub address_type: AddressType,
    pub bind_address: Address,
}

impl CommandReply {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut raw_bytes = Vec::with_capacity(22);
        raw_bytes.push(self.version);
        raw_bytes.push(self.status);
        raw_bytes.push(RESERVED);
        raw_bytes.push(self.address_type.code());

        match (self.address_type, self.bind_address.ip()) {
            (AddressType::Ipv4, Some(IpAddr::V4(ip))) => {
                raw_bytes.write_u32::<BigEndian>(u32::from(ip))?;
            }
            (AddressType::Ipv6, Some(IpAddr::V6(ip))) => {
                raw_bytes.write_u128::<BigEndian>(u128::from(ip))?;
            }
            (address_type, _) => {
                return Err(Error::malformed(format!(
                    "cannot encode bound address {} as {:?}",
                    self.bind_address, address_type
                )));
            }
        }
        raw_bytes.write_u16::<BigEndian>(self.bind_address.port)?;

        Ok(raw_bytes)
    }
}

pub fn parser_negotiation_header(input: &[u8]) -> IResult<&[u8], (u8, u8)> {
    tuple((be_u8, be_u8))(input)
}

pub fn parser_auth_methods(input: &[u8]) -> IResult<&[u8], Vec<AuthMethod>> {
    many0(map(be_u8, AuthMethod::from))(input)
}

pub fn parser_command_header(input: &[u8]) -> IResult<&[u8], CommandHeader> {
    map(
        tuple((be_u8, be_u8, be_u8, be_u8)),
        |(version, command, reserved, address_type)| CommandHeader {
            version,
            command: SocksCommand::from(command),
            reserved,
            address_type: AddressType::from(address_type),
        },
    )(input)
}

pub fn parser_addr_ipv4(input: &[u8]) -> IResult<&[u8], (String, u16)> {
    map(tuple((be_u32, be_u16)), |(ipv4, port)| {
        (Ipv4Addr::from(ipv4).to_string(), port)
    })(input)
}

pub fn parser_domain(input: &[u8]) -> IResult<&[u8], &str> {
    map_res(length_data(be_u8), from_utf8)(input)
}

pub fn parser_addr_domain(input: &[u8]) -> IResult<&[u8], (String, u16)> {
    map(tuple((parser_domain, be_u16)), |(domain, port)| {
        (domain.to_string(), port)
    })(input)
}
