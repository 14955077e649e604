use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use socks5_relay::socks5::registry::Registry;
use socks5_relay::{Server, ServerConfig, ShutdownHandle};

const STEP: Duration = Duration::from_secs(5);

struct Running {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    registry: Arc<Registry>,
    task: JoinHandle<socks5_relay::Result<()>>,
}

async fn start_server(max_connections: usize) -> Running {
    let mut config = ServerConfig::new("127.0.0.1", 0);
    config.max_connections = max_connections;
    config.accept_poll = Duration::from_millis(20);
    config.shutdown_grace = Duration::from_millis(200);

    let server = Server::bind(config).await.unwrap();
    Running {
        addr: server.local_addr().unwrap(),
        shutdown: server.shutdown_handle(),
        registry: server.registry(),
        task: tokio::spawn(server.run()),
    }
}

/// Echoes every connection back to its sender until it closes.
async fn start_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

async fn read_exactly(stream: &mut TcpStream, length: usize) -> Vec<u8> {
    let mut buf = vec![0u8; length];
    timeout(STEP, stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .unwrap();
    buf
}

async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let n = timeout(STEP, stream.read(&mut buf))
        .await
        .expect("connection was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0, "unexpected bytes: {:?}", &buf[..n]);
}

/// Negotiate and CONNECT to `destination`, returning the command reply.
async fn connect_through(proxy: SocketAddr, destination: SocketAddr) -> (TcpStream, Vec<u8>) {
    let mut client = TcpStream::connect(proxy).await.unwrap();

    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    assert_eq!(read_exactly(&mut client, 2).await, vec![0x05, 0x00]);

    let ip = match destination {
        SocketAddr::V4(v4) => v4.ip().octets(),
        SocketAddr::V6(_) => unreachable!("tests use IPv4 destinations"),
    };
    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    request.extend_from_slice(&ip);
    request.extend_from_slice(&destination.port().to_be_bytes());
    client.write_all(&request).await.unwrap();

    let reply = read_exactly(&mut client, 10).await;
    (client, reply)
}

async fn stop(running: Running) {
    running.shutdown.trigger();
    timeout(STEP, running.task)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn negotiation_selects_no_auth() {
    let running = start_server(16).await;
    let mut client = TcpStream::connect(running.addr).await.unwrap();

    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    assert_eq!(read_exactly(&mut client, 2).await, vec![0x05, 0x00]);

    stop(running).await;
}

#[tokio::test]
async fn connect_replies_with_bound_ipv4_address() {
    let running = start_server(16).await;
    let echo = start_echo().await;

    let (mut client, reply) = connect_through(running.addr, echo).await;
    assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);
    assert_eq!(&reply[4..8], &[127, 0, 0, 1]);
    let bound_port = u16::from_be_bytes([reply[8], reply[9]]);
    assert_ne!(bound_port, 0);

    client.write_all(b"hello through socks").await.unwrap();
    assert_eq!(
        read_exactly(&mut client, 19).await,
        b"hello through socks".to_vec()
    );

    drop(client);
    stop(running).await;
}

#[tokio::test]
async fn connect_by_domain_name() {
    let running = start_server(16).await;
    let echo = start_echo().await;
    let mut client = TcpStream::connect(running.addr).await.unwrap();

    client.write_all(&[0x05, 0x02, 0x02, 0x00]).await.unwrap();
    assert_eq!(read_exactly(&mut client, 2).await, vec![0x05, 0x00]);

    let domain = b"127.0.0.1";
    let mut request = vec![0x05, 0x01, 0x00, 0x03, domain.len() as u8];
    request.extend_from_slice(domain);
    request.extend_from_slice(&echo.port().to_be_bytes());
    client.write_all(&request).await.unwrap();

    let reply = read_exactly(&mut client, 10).await;
    assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);

    client.write_all(&[1, 2, 3]).await.unwrap();
    assert_eq!(read_exactly(&mut client, 3).await, vec![1, 2, 3]);

    drop(client);
    stop(running).await;
}

#[tokio::test]
async fn unsupported_method_gets_ff_and_close() {
    let running = start_server(16).await;
    let mut client = TcpStream::connect(running.addr).await.unwrap();

    client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
    assert_eq!(read_exactly(&mut client, 2).await, vec![0x05, 0xFF]);
    assert_closed(&mut client).await;

    stop(running).await;
}

#[tokio::test]
async fn socks4_negotiation_is_dropped_silently() {
    let running = start_server(16).await;
    let mut client = TcpStream::connect(running.addr).await.unwrap();

    client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();
    assert_closed(&mut client).await;

    stop(running).await;
}

#[tokio::test]
async fn socks4_command_is_dropped_silently() {
    let running = start_server(16).await;
    let mut client = TcpStream::connect(running.addr).await.unwrap();

    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    assert_eq!(read_exactly(&mut client, 2).await, vec![0x05, 0x00]);
    client
        .write_all(&[0x04, 0x01, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01, 0x00, 0x50])
        .await
        .unwrap();
    assert_closed(&mut client).await;

    stop(running).await;
}

#[tokio::test]
async fn unreachable_destination_closes_client() {
    let running = start_server(16).await;
    let closed_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let mut client = TcpStream::connect(running.addr).await.unwrap();

    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    assert_eq!(read_exactly(&mut client, 2).await, vec![0x05, 0x00]);
    let mut request = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
    request.extend_from_slice(&closed_port.port().to_be_bytes());
    client.write_all(&request).await.unwrap();
    assert_closed(&mut client).await;

    stop(running).await;
}

#[tokio::test]
async fn concurrent_connections_do_not_mix_data() {
    let running = start_server(64).await;
    let echo = start_echo().await;
    let proxy = running.addr;

    let clients = (0..16u8).map(|id| async move {
        let (mut client, reply) = connect_through(proxy, echo).await;
        assert_eq!(reply[1], 0x00);

        let payload: Vec<u8> = (0..4096).map(|i| id.wrapping_add(i as u8)).collect();
        client.write_all(&payload).await.unwrap();
        let echoed = read_exactly(&mut client, payload.len()).await;
        echoed == payload
    });

    let results = join_all(clients).await;
    assert!(results.into_iter().all(|matched| matched));

    stop(running).await;
}

#[tokio::test]
async fn full_registry_admits_after_reclaim() {
    let running = start_server(1).await;
    let echo = start_echo().await;

    let (first, reply) = connect_through(running.addr, echo).await;
    assert_eq!(reply[1], 0x00);

    // At capacity: the second client is queued in the backlog, not served.
    let mut second = TcpStream::connect(running.addr).await.unwrap();
    second.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut buf = [0u8; 2];
    assert!(
        timeout(Duration::from_millis(200), second.read_exact(&mut buf))
            .await
            .is_err()
    );

    // Once the first handler finishes, one reclamation pass frees its slot.
    drop(first);
    assert_eq!(read_exactly(&mut second, 2).await, vec![0x05, 0x00]);
    assert_eq!(running.registry.len(), 1);

    drop(second);
    stop(running).await;
}

#[tokio::test]
async fn shutdown_waits_for_open_connections() {
    let running = start_server(16).await;
    let echo = start_echo().await;
    let (mut client, _) = connect_through(running.addr, echo).await;

    let addr = running.addr;
    running.shutdown.trigger();
    // Grace runs out while the relay is still open, then the server returns.
    timeout(STEP, running.task)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
    assert!(TcpStream::connect(addr).await.is_err());

    // The in-flight connection was never aborted.
    client.write_all(b"still here").await.unwrap();
    assert_eq!(read_exactly(&mut client, 10).await, b"still here".to_vec());
}
