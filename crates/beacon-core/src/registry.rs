//! Client presence registry.
//!
//! The registry owns every client record, binds live connections to online
//! clients and delivers messages over those connections.
//!
//! ```text
//!     create                     register(open connection)
//!       |                  +------------------------------+
//!       v                  |                              v
//!   [Offline] -------------+                          [Online]
//!       ^                                                 |
//!       +------------------- unregister ------------------+
//!
//!   delete from either state -> removed (the id can be created again)
//! ```

use crate::record::{ClientEntry, ClientInfo, ClientRecord, ClientStatus};
use crate::store::{ClientStore, MemoryStore};
use beacon_protocol::{codec, ProtocolError, MAX_MESSAGE_SIZE};
use beacon_transport::{Connection, ConnectionId, TransportError};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedMappedMutexGuard, OwnedMutexGuard};
use tracing::{debug, info, trace, warn};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No client with this id.
    #[error("Client not found: {0}")]
    NotFound(String),

    /// A client with this id already exists.
    #[error("Client already exists: {0}")]
    AlreadyExists(String),

    /// The client already has a connection bound.
    #[error("Client is already online: {0}")]
    AlreadyOnline(String),

    /// The client has no connection to unbind.
    #[error("Client is already offline: {0}")]
    AlreadyOffline(String),

    /// A message was sent to an offline client.
    #[error("Client is offline: {0}")]
    Offline(String),

    /// The connection is not in an open state.
    #[error("Connection not open for client: {0}")]
    HandleNotOpen(String),

    /// An online client has no connection bound.
    #[error("Online client has no connection: {0}")]
    MissingConnection(String),

    /// The bound connection is not the one named by the caller.
    #[error("Client {id} is bound to connection {bound}, not {given}")]
    ConnectionMismatch {
        /// Client id.
        id: String,
        /// Connection currently bound.
        bound: ConnectionId,
        /// Connection named by the caller.
        given: ConnectionId,
    },

    /// The registry holds its maximum number of clients.
    #[error("Maximum clients reached ({0})")]
    CapacityExceeded(usize),

    /// The message could not be encoded.
    #[error("Failed to encode message: {0}")]
    Encode(#[from] ProtocolError),

    /// The connection rejected or failed the write.
    #[error("Transport write failed for client {id}: {source}")]
    TransportWrite {
        /// Client id.
        id: String,
        /// Error reported by the transport.
        #[source]
        source: TransportError,
    },

    /// Delivery did not complete in time.
    #[error("Send to client {0} timed out")]
    Timeout(String),
}

impl RegistryError {
    /// Whether the error reflects a broken registry invariant rather than a
    /// caller mistake or a transport failure.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, RegistryError::MissingConnection(_))
    }

    /// Short, stable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::NotFound(_) => "not_found",
            RegistryError::AlreadyExists(_) => "already_exists",
            RegistryError::AlreadyOnline(_) => "already_online",
            RegistryError::AlreadyOffline(_) => "already_offline",
            RegistryError::Offline(_) => "offline",
            RegistryError::HandleNotOpen(_) => "handle_not_open",
            RegistryError::MissingConnection(_) => "missing_connection",
            RegistryError::ConnectionMismatch { .. } => "connection_mismatch",
            RegistryError::CapacityExceeded(_) => "capacity_exceeded",
            RegistryError::Encode(_) => "encode",
            RegistryError::TransportWrite { .. } => "transport_write",
            RegistryError::Timeout(_) => "timeout",
        }
    }
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of clients.
    pub max_clients: usize,
    /// Deadline applied by [`Registry::send`]. `None` waits indefinitely.
    pub send_timeout: Option<Duration>,
    /// Whether deleting an online client also closes its connection.
    pub close_on_delete: bool,
    /// Maximum encoded message size in bytes.
    pub max_message_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_clients: 100_000,
            send_timeout: None,
            close_on_delete: true,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of clients.
    pub client_count: usize,
    /// Number of online clients.
    pub online_count: usize,
}

type EntryGuard = OwnedMappedMutexGuard<Option<ClientEntry>, ClientEntry>;

/// The client presence registry.
///
/// Every operation on a client runs under that client's lock, so
/// check-then-act sequences (such as register's precondition checks) can't
/// interleave with other operations on the same id.
pub struct Registry<S = MemoryStore> {
    /// Client storage.
    store: S,
    /// Number of online clients.
    online: AtomicUsize,
    /// Configuration.
    config: RegistryConfig,
}

impl Registry<MemoryStore> {
    /// Create a new in-memory registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new in-memory registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        Self::with_store(MemoryStore::new(), config)
    }
}

impl Default for Registry<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ClientStore> Registry<S> {
    /// Create a registry over a custom store.
    #[must_use]
    pub fn with_store(store: S, config: RegistryConfig) -> Self {
        info!("Creating registry with config: {:?}", config);
        Self {
            store,
            online: AtomicUsize::new(0),
            config,
        }
    }

    /// Get the registry configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Lock a client's entry.
    async fn entry(&self, id: &str) -> Result<EntryGuard, RegistryError> {
        let slot = self
            .store
            .slot(id)
            .await
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let guard = slot.lock_owned().await;
        OwnedMutexGuard::try_map(guard, |entry| entry.as_mut())
            .map_err(|_| RegistryError::NotFound(id.to_string()))
    }

    /// Check if a client exists.
    pub async fn exists(&self, id: &str) -> bool {
        self.store.contains(id).await
    }

    /// Get a snapshot of a client record.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the client does not exist.
    pub async fn info(&self, id: &str) -> Result<ClientRecord, RegistryError> {
        Ok(self.entry(id).await?.snapshot())
    }

    /// Create an offline client.
    ///
    /// Reserved fields in `info` are ignored; status and timestamps are always
    /// assigned by the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is taken or the registry is full.
    pub async fn create(
        &self,
        id: &str,
        info: Option<ClientInfo>,
    ) -> Result<ClientRecord, RegistryError> {
        if self.store.contains(id).await {
            return Err(RegistryError::AlreadyExists(id.to_string()));
        }

        if self.store.len().await >= self.config.max_clients {
            warn!(client = %id, max = self.config.max_clients, "Registry full");
            return Err(RegistryError::CapacityExceeded(self.config.max_clients));
        }

        let entry = ClientEntry::new(id, info.unwrap_or_default());
        let record = entry.snapshot();

        if !self.store.insert(entry).await {
            return Err(RegistryError::AlreadyExists(id.to_string()));
        }

        info!(client = %id, "Client created");
        Ok(record)
    }

    /// Merge fields into a client's info.
    ///
    /// Works in either status. Reserved fields in `patch` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the client does not exist.
    pub async fn update(&self, id: &str, patch: ClientInfo) -> Result<ClientRecord, RegistryError> {
        let mut entry = self.entry(id).await?;
        let fields = patch.len();
        entry.merge_info(patch);

        debug!(client = %id, fields, "Client updated");
        Ok(entry.snapshot())
    }

    /// Delete a client, releasing its connection if it is online.
    ///
    /// The client is gone from the registry before its connection is closed,
    /// so a slow close never holds up the id. The close is bounded by the
    /// configured send timeout, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the client does not exist.
    pub async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let slot = self
            .store
            .slot(id)
            .await
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let connection = {
            let mut guard = slot.lock().await;
            let mut entry = guard
                .take()
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

            self.store.remove(id, &slot).await;
            entry.take_offline()
        };
        info!(client = %id, "Client deleted");

        let Some(mut connection) = connection else {
            return Ok(());
        };
        self.online.fetch_sub(1, Ordering::SeqCst);

        if self.config.close_on_delete {
            let closed = match self.config.send_timeout {
                Some(timeout) => tokio::time::timeout(timeout, connection.close())
                    .await
                    .unwrap_or(Err(TransportError::Timeout)),
                None => connection.close().await,
            };
            if let Err(e) = closed {
                warn!(client = %id, connection = %connection.id(), error = %e, "Failed to close connection");
            }
        }

        debug!(client = %id, connection = %connection.id(), "Connection released");
        Ok(())
    }

    /// Bind a connection to an offline client, bringing it online.
    ///
    /// Checks, in order: the client exists, it is offline, the connection is
    /// open. On failure nothing changes and the connection is dropped.
    ///
    /// # Errors
    ///
    /// Returns the first failed check.
    pub async fn register<C>(&self, id: &str, connection: C) -> Result<ClientRecord, RegistryError>
    where
        C: Connection + 'static,
    {
        let mut entry = self.entry(id).await?;

        if entry.status() == ClientStatus::Online {
            debug!(client = %id, "Register rejected: already online");
            return Err(RegistryError::AlreadyOnline(id.to_string()));
        }

        if !connection.is_open() {
            debug!(client = %id, connection = %connection.id(), "Register rejected: connection not open");
            return Err(RegistryError::HandleNotOpen(id.to_string()));
        }

        let connection_id = connection.id().clone();
        entry
            .bring_online(Box::new(connection))
            .map_err(|_| RegistryError::AlreadyOnline(id.to_string()))?;
        self.online.fetch_add(1, Ordering::SeqCst);

        info!(client = %id, connection = %connection_id, "Client online");
        Ok(entry.snapshot())
    }

    /// Unbind a client's connection, taking it offline.
    ///
    /// The connection is dropped, not closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the client does not exist or is offline.
    pub async fn unregister(&self, id: &str) -> Result<(), RegistryError> {
        let mut entry = self.entry(id).await?;

        let connection = entry
            .take_offline()
            .ok_or_else(|| RegistryError::AlreadyOffline(id.to_string()))?;
        self.online.fetch_sub(1, Ordering::SeqCst);

        info!(client = %id, connection = %connection.id(), "Client offline");
        Ok(())
    }

    /// Unbind a client's connection only if it is `connection_id`.
    ///
    /// Lets the owner of a closed connection take its client offline without
    /// racing a newer connection that has since been bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the client does not exist, is offline, or is bound
    /// to another connection.
    pub async fn unregister_connection(
        &self,
        id: &str,
        connection_id: &ConnectionId,
    ) -> Result<(), RegistryError> {
        let mut entry = self.entry(id).await?;

        match entry.connection_id() {
            None => return Err(RegistryError::AlreadyOffline(id.to_string())),
            Some(bound) if bound != connection_id => {
                return Err(RegistryError::ConnectionMismatch {
                    id: id.to_string(),
                    bound: bound.clone(),
                    given: connection_id.clone(),
                });
            }
            Some(_) => {}
        }

        entry.take_offline();
        self.online.fetch_sub(1, Ordering::SeqCst);

        info!(client = %id, connection = %connection_id, "Client offline");
        Ok(())
    }

    /// Deliver a message to an online client.
    ///
    /// Resolves once the connection has accepted the write. A failed write
    /// leaves the client online. Applies the configured send timeout, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is missing or offline, its connection
    /// is not open, the message cannot be encoded, or the write fails.
    pub async fn send<M>(&self, id: &str, message: &M) -> Result<(), RegistryError>
    where
        M: Serialize + Sync + ?Sized,
    {
        match self.config.send_timeout {
            Some(timeout) => self.send_timeout(id, message, timeout).await,
            None => self.deliver(id, message).await,
        }
    }

    /// Deliver a message, giving up after `timeout`.
    ///
    /// The deadline covers waiting for the client's lock as well as the
    /// write. A write abandoned at the deadline may still reach the client.
    ///
    /// # Errors
    ///
    /// As [`Registry::send`], plus [`RegistryError::Timeout`].
    pub async fn send_timeout<M>(
        &self,
        id: &str,
        message: &M,
        timeout: Duration,
    ) -> Result<(), RegistryError>
    where
        M: Serialize + Sync + ?Sized,
    {
        match tokio::time::timeout(timeout, self.deliver(id, message)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(client = %id, timeout_ms = timeout.as_millis() as u64, "Send timed out");
                Err(RegistryError::Timeout(id.to_string()))
            }
        }
    }

    async fn deliver<M>(&self, id: &str, message: &M) -> Result<(), RegistryError>
    where
        M: Serialize + Sync + ?Sized,
    {
        let mut entry = self.entry(id).await?;

        if entry.status() == ClientStatus::Offline {
            return Err(RegistryError::Offline(id.to_string()));
        }

        let connection = entry
            .connection_mut()
            .ok_or_else(|| RegistryError::MissingConnection(id.to_string()))?;

        if !connection.is_open() {
            return Err(RegistryError::HandleNotOpen(id.to_string()));
        }

        let data = codec::encode_with_limit(message, self.config.max_message_size)?;
        let size = data.len();

        // The client's lock is held across the write: one writer per connection.
        connection.send(data).await.map_err(|source| {
            warn!(client = %id, error = %source, "Delivery failed");
            RegistryError::TransportWrite {
                id: id.to_string(),
                source,
            }
        })?;

        trace!(client = %id, bytes = size, "Message delivered");
        Ok(())
    }

    /// Get all client IDs.
    pub async fn client_ids(&self) -> Vec<String> {
        self.store.ids().await
    }

    /// Get registry statistics.
    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            client_count: self.store.len().await,
            online_count: self.online.load(Ordering::SeqCst),
        }
    }
}
