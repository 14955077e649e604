//! Reading and writing handshake messages over a `Connector`.
//!
//! Every function here is stateless; the session decides what to do with the
//! decoded values.

use nom::IResult;

use crate::error::{Error, Result};
use crate::socks5::connector::Connector;
use crate::socks5::types::*;

/// Read exactly `length` bytes, failing if the peer shuts down first.
pub async fn read_length(conn: &mut dyn Connector, length: usize) -> Result<Vec<u8>> {
    let mut raw_bytes = Vec::with_capacity(length);

    while raw_bytes.len() < length {
        let chunk = conn.receive(length - raw_bytes.len()).await?;
        if chunk.is_empty() {
            return Err(Error::Truncated {
                expected: length,
                actual: raw_bytes.len(),
            });
        }
        raw_bytes.extend(chunk);
    }

    Ok(raw_bytes)
}

fn parse<'a, O>(
    mut parser: impl FnMut(&'a [u8]) -> IResult<&'a [u8], O>,
    input: &'a [u8],
    what: &str,
) -> Result<O> {
    match parser(input) {
        Ok((_, output)) => Ok(output),
        Err(e) => Err(Error::malformed(format!("{}: {:?}", what, e))),
    }
}

/// `[version:1][nmethods:1][methods:nmethods]`
pub async fn decode_auth_negotiation(conn: &mut dyn Connector) -> Result<HandshakeRequest> {
    let header = read_length(conn, 2).await?;
    let (version, num_method) = parse(parser_negotiation_header, &header, "negotiation header")?;

    let raw_methods = read_length(conn, num_method as usize).await?;
    let methods = parse(parser_auth_methods, &raw_methods, "auth methods")?;

    Ok(HandshakeRequest { version, methods })
}

/// `[version:1][method:1]`, method `0xFF` rejecting the client.
pub async fn encode_auth_negotiation_reply(
    conn: &mut dyn Connector,
    version: u8,
    method: AuthMethod,
) -> Result<()> {
    let reply = HandshakeReply { version, method };
    conn.send(&reply.to_bytes()).await
}

/// `[version:1][cmd:1][rsv:1][atype:1][dst.addr:variable][dst.port:2]`
pub async fn decode_command(conn: &mut dyn Connector) -> Result<CommandRequest> {
    let raw_header = read_length(conn, 4).await?;
    let header = parse(parser_command_header, &raw_header, "command header")?;

    let (address, port) = match header.address_type {
        AddressType::Ipv4 => {
            let raw_address_bytes = read_length(conn, 6).await?;
            parse(parser_addr_ipv4, &raw_address_bytes, "ipv4 address")?
        }
        AddressType::Domain => {
            let mut raw_address_bytes = read_length(conn, 1).await?;
            let length = raw_address_bytes[0] as usize;
            raw_address_bytes.extend(read_length(conn, length + 2).await?);
            parse(parser_addr_domain, &raw_address_bytes, "domain address")?
        }
        other => return Err(Error::UnsupportedAddressType(other.code())),
    };

    Ok(CommandRequest {
        version: header.version,
        command: header.command,
        reserved: header.reserved,
        address_type: header.address_type,
        address,
        port,
    })
}

/// `[version:1][rep:1][rsv:1][atype:1][bnd.addr][bnd.port:2]`, CONNECT only.
pub async fn encode_command_reply(
    conn: &mut dyn Connector,
    version: u8,
    command: SocksCommand,
    address_type: AddressType,
    bind_address: &Address,
) -> Result<()> {
    if command != SocksCommand::Connect {
        return Err(Error::UnsupportedCommand(command.code()));
    }

    let reply = CommandReply {
        version,
        status: REPLY_SUCCEEDED,
        address_type,
        bind_address: bind_address.clone(),
    };
    conn.send(&reply.to_bytes()?).await
}
