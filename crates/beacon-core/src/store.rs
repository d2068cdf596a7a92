//! Storage for client entries.
//!
//! Each client lives in its own [`Slot`]: a mutex around an optional entry.
//! Operations on one client serialize on that mutex while different clients
//! proceed in parallel. A slot that has been emptied belongs to a deleted
//! client; anyone who was waiting on it sees the client as missing.

use crate::record::ClientEntry;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

/// Per-client lock around an entry. `None` once the client is deleted.
pub type Slot = Arc<Mutex<Option<ClientEntry>>>;

/// Backing store for a registry.
///
/// Methods are async so a store may suspend; the registry never holds a
/// store-level lock across calls.
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Check if a client is present.
    async fn contains(&self, id: &str) -> bool;

    /// Get the slot of a client.
    async fn slot(&self, id: &str) -> Option<Slot>;

    /// Insert a new entry.
    ///
    /// Returns `false` without inserting if the id is already present.
    async fn insert(&self, entry: ClientEntry) -> bool;

    /// Unlink a client, but only if `slot` is still the one stored for it.
    ///
    /// Returns `true` if the slot was removed.
    async fn remove(&self, id: &str, slot: &Slot) -> bool;

    /// Number of stored clients.
    async fn len(&self) -> usize;

    /// All stored client IDs.
    async fn ids(&self) -> Vec<String>;
}

/// In-memory store backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    clients: DashMap<String, Slot>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn contains(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    async fn slot(&self, id: &str) -> Option<Slot> {
        self.clients.get(id).map(|slot| Arc::clone(slot.value()))
    }

    async fn insert(&self, entry: ClientEntry) -> bool {
        match self.clients.entry(entry.id().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                trace!(client = %entry.id(), "Slot inserted");
                vacant.insert(Arc::new(Mutex::new(Some(entry))));
                true
            }
        }
    }

    async fn remove(&self, id: &str, slot: &Slot) -> bool {
        let removed = self
            .clients
            .remove_if(id, |_, current| Arc::ptr_eq(current, slot))
            .is_some();
        if removed {
            trace!(client = %id, "Slot removed");
        }
        removed
    }

    async fn len(&self) -> usize {
        self.clients.len()
    }

    async fn ids(&self) -> Vec<String> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ClientInfo;

    #[tokio::test]
    async fn test_store_insert_once() {
        let store = MemoryStore::new();

        assert!(store.insert(ClientEntry::new("alice", ClientInfo::new())).await);
        assert!(!store.insert(ClientEntry::new("alice", ClientInfo::new())).await);
        assert!(store.contains("alice").await);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.ids().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_store_remove_matches_slot() {
        let store = MemoryStore::new();
        store.insert(ClientEntry::new("alice", ClientInfo::new())).await;
        let old = store.slot("alice").await.unwrap();

        assert!(store.remove("alice", &old).await);
        store.insert(ClientEntry::new("alice", ClientInfo::new())).await;

        // A stale slot must not unlink the new client.
        assert!(!store.remove("alice", &old).await);
        assert!(store.contains("alice").await);
    }

    #[tokio::test]
    async fn test_store_missing() {
        let store = MemoryStore::new();
        assert!(store.slot("nobody").await.is_none());
        assert!(!store.contains("nobody").await);
    }
}
