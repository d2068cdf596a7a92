//! HTTP admin API.
//!
//! Thin JSON layer over the registry: every route maps to one registry
//! operation and every registry error to an HTTP status.

use crate::handlers::AppState;
use crate::metrics;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use beacon_core::{ClientInfo, ClientRecord, RegistryError};
use beacon_protocol::{Message, ProtocolError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error};

/// Errors returned by admin API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The registry rejected the operation.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The request body is not acceptable.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Registry(e) => match e {
                RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
                RegistryError::AlreadyExists(_)
                | RegistryError::AlreadyOnline(_)
                | RegistryError::AlreadyOffline(_)
                | RegistryError::Offline(_)
                | RegistryError::HandleNotOpen(_)
                | RegistryError::ConnectionMismatch { .. } => StatusCode::CONFLICT,
                RegistryError::CapacityExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
                RegistryError::Encode(ProtocolError::MessageTooLarge { .. }) => {
                    StatusCode::PAYLOAD_TOO_LARGE
                }
                RegistryError::Encode(_) => StatusCode::UNPROCESSABLE_ENTITY,
                RegistryError::TransportWrite { .. } => StatusCode::BAD_GATEWAY,
                RegistryError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                RegistryError::MissingConnection(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Registry(e) => e.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();

        match &self {
            ApiError::Registry(e) if e.is_internal() => {
                error!(error = %e, "Registry invariant violated");
            }
            _ => debug!(status = status.as_u16(), error = %self, "Request failed"),
        }
        metrics::record_error(kind);

        let body = serde_json::json!({
            "error": kind,
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Parse a JSON body, treating an empty body as absent.
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<Option<T>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// `GET /clients`
pub async fn list_clients(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ClientRecord>>, ApiError> {
    let mut ids = state.registry.client_ids().await;
    ids.sort();

    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        match state.registry.info(&id).await {
            Ok(record) => records.push(record),
            // Deleted since the listing
            Err(RegistryError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Json(records))
}

/// `GET /clients/{id}`
pub async fn get_client(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ClientRecord>, ApiError> {
    Ok(Json(state.registry.info(&id).await?))
}

/// `PUT /clients/{id}` with an optional info object.
pub async fn create_client(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<ClientRecord>), ApiError> {
    let info: Option<ClientInfo> = parse_body(&body)?;
    let record = state.registry.create(&id, info).await?;
    metrics::set_clients(&state.registry.stats().await);

    Ok((StatusCode::CREATED, Json(record)))
}

/// `PATCH /clients/{id}` with the fields to merge.
pub async fn update_client(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ClientRecord>, ApiError> {
    let patch: ClientInfo = parse_body(&body)?.unwrap_or_default();
    Ok(Json(state.registry.update(&id, patch).await?))
}

/// `DELETE /clients/{id}`
pub async fn delete_client(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete(&id).await?;
    metrics::set_clients(&state.registry.stats().await);

    Ok(StatusCode::NO_CONTENT)
}

/// `POST /clients/{id}/messages` with a JSON object to deliver.
pub async fn send_message(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let message: Message = parse_body(&body)?
        .ok_or_else(|| ApiError::BadRequest("message body is required".to_string()))?;

    let start = Instant::now();
    state.registry.send(&id, &message).await?;
    metrics::record_send_latency(start.elapsed().as_secs_f64());
    metrics::record_message("outbound");

    Ok(StatusCode::NO_CONTENT)
}
