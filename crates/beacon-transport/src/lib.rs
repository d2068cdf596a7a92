//! # beacon-transport
//!
//! Connection handles for the Beacon presence registry.
//!
//! The registry talks to clients through the [`Connection`] trait and never
//! looks past it. This crate provides:
//!
//! - **WebSocket** - The write half of an axum WebSocket
//! - **Memory** - An in-process loopback handle for tests and embedding
//!
//! ```rust,ignore
//! use beacon_transport::{Connection, WebSocketConnection};
//!
//! async fn on_upgrade(socket: axum::extract::ws::WebSocket) {
//!     let (conn, mut reader) = WebSocketConnection::split(socket, None);
//!     // hand `conn` to the registry, keep `reader` to notice the close
//!     while reader.recv().await.is_some() {}
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryConnection, MemoryPeer};
pub use traits::{Connection, ConnectionId, ReadyState, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{Inbound, WebSocketConnection, WebSocketReader};
