//! In-process connection handle.
//!
//! [`pair`] returns a [`MemoryConnection`] to hand to a registry and the
//! [`MemoryPeer`] that observes and steers it: reading what was written,
//! closing the connection, failing writes or slowing them down.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

use crate::traits::{Connection, ConnectionId, ReadyState, TransportError};

#[derive(Debug, Default)]
struct Controls {
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
}

/// Create a connected handle/peer pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    pair_with_id(ConnectionId::generate())
}

/// Create a connected handle/peer pair with a fixed connection ID.
#[must_use]
pub fn pair_with_id(id: impl Into<ConnectionId>) -> (MemoryConnection, MemoryPeer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = ReadyState::open();
    let controls = Arc::new(Controls::default());
    let id = id.into();

    let conn = MemoryConnection {
        id: id.clone(),
        outbox: tx,
        state: state.clone(),
        controls: Arc::clone(&controls),
    };
    let peer = MemoryPeer {
        id,
        inbox: rx,
        state,
        controls,
    };

    (conn, peer)
}

/// Handle side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    outbox: mpsc::UnboundedSender<Bytes>,
    state: ReadyState,
    controls: Arc<Controls>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.state.is_open() && !self.outbox.is_closed()
    }

    async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
        let delay = self.controls.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if !self.state.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        if self.controls.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("write rejected by peer".into()));
        }

        trace!(connection = %self.id, bytes = data.len(), "Memory write");
        self.outbox
            .send(data)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.mark_closed();
        Ok(())
    }
}

/// Peer side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    id: ConnectionId,
    inbox: mpsc::UnboundedReceiver<Bytes>,
    state: ReadyState,
    controls: Arc<Controls>,
}

impl MemoryPeer {
    /// Get the ID of the paired connection.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Wait for the next write. Returns `None` once the handle is dropped.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbox.recv().await
    }

    /// Take the next write if one is queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.inbox.try_recv().ok()
    }

    /// Check whether the paired connection is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Close the connection from the peer side.
    pub fn close(&self) {
        self.state.mark_closed();
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.controls.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every subsequent write by `delay` before it is acknowledged.
    pub fn set_write_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.controls.write_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Check whether the handle side has been dropped.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inbox.is_closed()
    }
}
