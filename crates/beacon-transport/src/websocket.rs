//! WebSocket connection handle.
//!
//! Wraps the write half of an axum WebSocket. The read half stays with the
//! task that owns the socket; both share a [`ReadyState`] so a close observed
//! on either side is visible to the other.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::traits::{Connection, ConnectionId, ReadyState, TransportError};

/// Write half of a WebSocket, usable as a registry connection handle.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: SplitSink<WebSocket, Message>,
    state: ReadyState,
    remote_addr: Option<SocketAddr>,
}

impl WebSocketConnection {
    /// Split a socket into a connection handle and its inbound stream.
    #[must_use]
    pub fn split(socket: WebSocket, remote_addr: Option<SocketAddr>) -> (Self, WebSocketReader) {
        let (sink, stream) = socket.split();
        let state = ReadyState::open();
        let id = ConnectionId::generate();

        debug!(connection = %id, "WebSocket handle created");

        let reader = WebSocketReader {
            id: id.clone(),
            stream,
            state: state.clone(),
        };

        let conn = Self {
            id,
            sink,
            state,
            remote_addr,
        };

        (conn, reader)
    }

    /// Get the shared readiness state.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.state.clone()
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
        if !self.state.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        // JSON payloads go out as text frames.
        let message = match String::from_utf8(data.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };

        self.sink.send(message).await.map_err(|e| {
            warn!(connection = %self.id, error = %e, "WebSocket write failed");
            TransportError::SendFailed(e.to_string())
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.state.mark_closed() {
            return Ok(()); // Already closed
        }

        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

/// What the read half of a socket observed.
#[derive(Debug)]
pub enum Inbound {
    /// A text message from the client.
    Text(String),
    /// A binary message from the client.
    Binary(Vec<u8>),
}

/// Read half of a WebSocket.
pub struct WebSocketReader {
    id: ConnectionId,
    stream: SplitStream<WebSocket>,
    state: ReadyState,
}

impl WebSocketReader {
    /// Get the ID of the connection this reader belongs to.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Receive the next data message.
    ///
    /// Control frames are skipped. Returns `None` once the socket is closed,
    /// after marking the shared state closed.
    pub async fn recv(&mut self) -> Option<Inbound> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Inbound::Text(text)),
                Some(Ok(Message::Binary(data))) => return Some(Inbound::Binary(data)),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pongs are queued by the socket itself
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    break;
                }
                Some(Err(e)) => {
                    warn!(connection = %self.id, error = %e, "WebSocket error");
                    break;
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    break;
                }
            }
        }

        self.state.mark_closed();
        None
    }
}
