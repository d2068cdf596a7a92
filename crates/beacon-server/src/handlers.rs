//! Connection handlers for Beacon server.
//!
//! This module binds WebSocket connections to registry clients and wires up
//! the HTTP routes.

use crate::api;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use beacon_core::{Registry, RegistryError};
use beacon_transport::{Connection, Inbound, WebSocketConnection};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

/// Shared server state.
pub struct AppState {
    /// The client registry.
    pub registry: Registry,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            registry: Registry::with_config(config.registry_config()),
            config,
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let websocket_route = state.config.websocket_route();

    Router::new()
        .route(&websocket_route, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/clients", get(api::list_clients))
        .route(
            "/clients/:id",
            get(api::get_client)
                .put(api::create_client)
                .patch(api::update_client)
                .delete(api::delete_client),
        )
        .route("/clients/:id/messages", post(api::send_message))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the server fails
/// to start.
pub async fn run_server(config: Config) -> Result<()> {
    config.validate()?;
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = app(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}/{{id}}",
        addr,
        config.transport.websocket_path.trim_end_matches('/')
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.registry.stats().await;

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "clients": stats.client_count,
        "online": stats.online_count,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, id, remote_addr, state))
}

/// Handle a WebSocket connection for client `id`.
///
/// The socket's write half is registered as the client's connection; this
/// task keeps the read half and takes the client offline when it ends.
async fn handle_websocket(
    socket: WebSocket,
    id: String,
    remote_addr: Option<SocketAddr>,
    state: Arc<AppState>,
) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (conn, mut reader) = WebSocketConnection::split(socket, remote_addr);
    let connection_id = conn.id().clone();

    debug!(client = %id, connection = %connection_id, remote = ?remote_addr, "WebSocket connected");

    if state.config.registry.auto_create {
        match state.registry.create(&id, None).await {
            Ok(_) | Err(RegistryError::AlreadyExists(_)) => {}
            Err(e) => {
                warn!(client = %id, error = %e, "Failed to create client");
                metrics::record_error(e.kind());
                return;
            }
        }
    }

    // On failure the handle is dropped with the error, closing the socket.
    if let Err(e) = state.registry.register(&id, conn).await {
        warn!(client = %id, connection = %connection_id, error = %e, "Registration failed");
        metrics::record_error(e.kind());
        return;
    }
    metrics::set_clients(&state.registry.stats().await);

    while let Some(inbound) = reader.recv().await {
        metrics::record_message("inbound");
        match inbound {
            Inbound::Text(text) => {
                trace!(client = %id, bytes = text.len(), "Inbound text message ignored");
            }
            Inbound::Binary(data) => {
                trace!(client = %id, bytes = data.len(), "Inbound binary message ignored");
            }
        }
    }

    match state.registry.unregister_connection(&id, &connection_id).await {
        Ok(()) => {}
        // Deleted, unbound, or replaced while this socket was open
        Err(
            e @ (RegistryError::NotFound(_)
            | RegistryError::AlreadyOffline(_)
            | RegistryError::ConnectionMismatch { .. }),
        ) => {
            debug!(client = %id, connection = %connection_id, reason = %e, "Connection already unbound");
        }
        Err(e) => {
            warn!(client = %id, connection = %connection_id, error = %e, "Failed to unregister");
            metrics::record_error(e.kind());
        }
    }
    metrics::set_clients(&state.registry.stats().await);

    debug!(client = %id, connection = %connection_id, "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_protocol::Message;
    use futures_util::StreamExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    async fn spawn_server(config: Config) -> (SocketAddr, Arc<AppState>) {
        let state = Arc::new(AppState::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = app(Arc::clone(&state));

        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        (addr, state)
    }

    async fn wait_for_status(state: &AppState, id: &str, online: bool) {
        for _ in 0..200 {
            if let Ok(record) = state.registry.info(id).await {
                if record.is_online() == online {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("client {} did not reach online={}", id, online);
    }

    #[tokio::test]
    async fn test_websocket_presence() {
        let (addr, state) = spawn_server(Config::default()).await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/alice", addr))
            .await
            .unwrap();
        wait_for_status(&state, "alice", true).await;

        let message = Message::new().with("type", "hello").with("n", 1);
        state.registry.send("alice", &message).await.unwrap();

        match socket.next().await.unwrap().unwrap() {
            WsMessage::Text(text) => {
                let value: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value, json!({"type": "hello", "n": 1}));
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        socket.close(None).await.unwrap();
        wait_for_status(&state, "alice", false).await;

        // The record outlives the connection.
        let record = state.registry.info("alice").await.unwrap();
        assert!(record.last_online_at.is_some());
        assert!(record.connection.is_none());
    }

    #[tokio::test]
    async fn test_websocket_second_connection_rejected() {
        let (addr, state) = spawn_server(Config::default()).await;
        let url = format!("ws://{}/ws/alice", addr);

        let (_first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        wait_for_status(&state, "alice", true).await;
        let bound = state.registry.info("alice").await.unwrap().connection;

        let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let ended = tokio::time::timeout(Duration::from_secs(5), second.next())
            .await
            .unwrap();
        assert!(matches!(ended, None | Some(Err(_)) | Some(Ok(WsMessage::Close(_)))));

        let record = state.registry.info("alice").await.unwrap();
        assert!(record.is_online());
        assert_eq!(record.connection, bound);
    }

    #[tokio::test]
    async fn test_websocket_without_auto_create() {
        let mut config = Config::default();
        config.registry.auto_create = false;
        let (addr, state) = spawn_server(config).await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/ghost", addr))
            .await
            .unwrap();
        let ended = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap();
        assert!(matches!(ended, None | Some(Err(_)) | Some(Ok(WsMessage::Close(_)))));
        assert!(!state.registry.exists("ghost").await);
    }

    #[tokio::test]
    async fn test_websocket_custom_path() {
        let mut config = Config::default();
        config.transport.websocket_path = "/realtime/ws/".to_string();
        config.validate().unwrap();
        let (addr, state) = spawn_server(config).await;

        let (_socket, _) =
            tokio_tungstenite::connect_async(format!("ws://{}/realtime/ws/alice", addr))
                .await
                .unwrap();
        wait_for_status(&state, "alice", true).await;
    }

    #[tokio::test]
    async fn test_health() {
        let (addr, state) = spawn_server(Config::default()).await;
        state.registry.create("alice", None).await.unwrap();

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        tokio::io::AsyncWriteExt::write_all(&mut stream, request.as_bytes())
            .await
            .unwrap();

        let mut response = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
            .await
            .unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"clients\":1"));
    }
}
