//! In-memory connector for exercising the codec and session without sockets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::socks5::connector::Connector;
use crate::socks5::types::Address;

/// Replays a scripted input and records everything written to it.
pub struct MemoryConnector {
    input: Vec<u8>,
    pos: usize,
    chunk: usize,
    closed: bool,
    probe: MemoryProbe,
}

/// Observes a `MemoryConnector` after it has been moved into a session.
#[derive(Clone, Default)]
pub struct MemoryProbe {
    written: Arc<Mutex<Vec<u8>>>,
    closes: Arc<AtomicUsize>,
    read_timeout: Arc<Mutex<Option<Duration>>>,
}

impl MemoryProbe {
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    /// Number of `close` calls that actually released the stream.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        *self.read_timeout.lock()
    }
}

impl MemoryConnector {
    pub fn new(input: impl Into<Vec<u8>>) -> (Self, MemoryProbe) {
        let probe = MemoryProbe::default();
        let connector = MemoryConnector {
            input: input.into(),
            pos: 0,
            chunk: usize::MAX,
            closed: false,
            probe: probe.clone(),
        };
        (connector, probe)
    }

    /// Hand out at most `chunk` bytes per `receive`, to exercise short reads.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&mut self) -> Result<()> {
        Err(Error::AlreadyConnected)
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.probe.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        self.probe.written.lock().extend_from_slice(data);
        Ok(())
    }

    async fn receive(&mut self, max_len: usize) -> Result<Vec<u8>> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        let n = max_len.min(self.chunk).min(self.input.len() - self.pos);
        let chunk = self.input[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(chunk)
    }

    fn local_endpoint(&self) -> Result<Address> {
        Ok(Address::from(std::net::SocketAddr::from(([127, 0, 0, 1], 1080))))
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        *self.probe.read_timeout.lock() = timeout;
    }
}
