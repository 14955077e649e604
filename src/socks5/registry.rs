//! Bookkeeping for connections currently being served.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// A handler task registered at accept time.
#[derive(Debug)]
pub struct ConnectionRecord {
    handle: JoinHandle<()>,
    accepted_at: Instant,
}

impl ConnectionRecord {
    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn age(&self) -> Duration {
        self.accepted_at.elapsed()
    }
}

/// Client address plus an accept sequence number, so a reused address never
/// displaces a handler that is still running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub client_addr: SocketAddr,
    seq: u64,
}

/// Live handlers keyed by client address and accept order.
///
/// The lock is only taken for the map operation itself, never across an await.
#[derive(Debug, Default)]
pub struct Registry {
    connections: Mutex<HashMap<ConnectionKey, ConnectionRecord>>,
    next_seq: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, client_addr: SocketAddr, handle: JoinHandle<()>) -> ConnectionKey {
        let key = ConnectionKey {
            client_addr,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        let record = ConnectionRecord {
            handle,
            accepted_at: Instant::now(),
        };
        self.connections.lock().insert(key, record);
        key
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn contains(&self, key: &ConnectionKey) -> bool {
        self.connections.lock().contains_key(key)
    }

    /// Drop every record whose handler has finished. Returns how many went.
    pub fn reclaim(&self) -> usize {
        let mut connections = self.connections.lock();
        let before = connections.len();
        connections.retain(|_, record| record.is_alive());
        before - connections.len()
    }

    fn take_all(&self) -> Vec<ConnectionRecord> {
        self.connections
            .lock()
            .drain()
            .map(|(_, record)| record)
            .collect()
    }

    /// Wait up to `grace` for every registered handler to finish on its own.
    ///
    /// Returns the number still running when the grace period ran out. Those
    /// handlers are detached, not aborted.
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut records = self.take_all();
        if records.is_empty() {
            return 0;
        }

        let pending = join_all(records.iter_mut().map(|record| &mut record.handle));
        if timeout(grace, pending).await.is_ok() {
            return 0;
        }

        let remaining: Vec<_> = records.iter().filter(|record| record.is_alive()).collect();
        if let Some(oldest) = remaining.iter().map(|record| record.age()).max() {
            tracing::debug!(
                "{} connections still open, oldest accepted {:?} ago",
                remaining.len(),
                oldest
            );
        }
        remaining.len()
    }
}
