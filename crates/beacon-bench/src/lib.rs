//! Shared fixtures for Beacon benchmarks.

use beacon_core::{ClientInfo, Registry, RegistryConfig};
use beacon_protocol::Message;
use beacon_transport::memory::{self, MemoryPeer};
use tokio::runtime::Runtime;

/// Multi-threaded runtime for async benchmarks.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
#[must_use]
pub fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
}

/// Client id used for the `n`th fixture client.
#[must_use]
pub fn client_id(n: usize) -> String {
    format!("client-{}", n)
}

/// A registry holding `count` offline clients.
///
/// # Panics
///
/// Panics if a client cannot be created.
pub async fn populated_registry(count: usize) -> Registry {
    let registry = Registry::with_config(RegistryConfig {
        max_clients: count.max(1) * 2,
        ..Default::default()
    });

    for n in 0..count {
        let info = ClientInfo::new().with("index", n as u64);
        registry
            .create(&client_id(n), Some(info))
            .await
            .expect("create fixture client");
    }

    registry
}

/// A registry holding `count` online clients, with the peers of their
/// connections in client order.
///
/// # Panics
///
/// Panics if a client cannot be created or registered.
pub async fn online_registry(count: usize) -> (Registry, Vec<MemoryPeer>) {
    let registry = populated_registry(count).await;
    let mut peers = Vec::with_capacity(count);

    for n in 0..count {
        let (conn, peer) = memory::pair();
        registry
            .register(&client_id(n), conn)
            .await
            .expect("register fixture client");
        peers.push(peer);
    }

    (registry, peers)
}

/// A chat-style message with a body of `body_len` bytes.
#[must_use]
pub fn sample_message(body_len: usize) -> Message {
    Message::new()
        .with("type", "chat")
        .with("from", "bench")
        .with("body", "x".repeat(body_len))
}

/// Discard everything queued for a peer.
pub fn drain(peer: &mut MemoryPeer) -> usize {
    let mut count = 0;
    while peer.try_recv().is_some() {
        count += 1;
    }
    count
}
