//! Client records.
//!
//! A record tracks one client id: its status, lifecycle timestamps, the
//! connection bound to it while online, and free-form info fields supplied by
//! the application.

use beacon_transport::{Connection, ConnectionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Field names owned by the registry. Info payloads can never set them.
pub const RESERVED_FIELDS: [&str; 5] = ["id", "status", "createdAt", "lastOnlineAt", "connection"];

/// Check whether a field name is reserved for the registry.
#[must_use]
pub fn is_reserved(key: &str) -> bool {
    RESERVED_FIELDS.contains(&key)
}

/// Client status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    /// No connection is bound.
    Offline,
    /// A live connection is bound.
    Online,
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientStatus::Offline => write!(f, "offline"),
            ClientStatus::Online => write!(f, "online"),
        }
    }
}

/// Application-defined client fields.
///
/// Every way of building or extending an info map drops reserved keys.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct ClientInfo(Map<String, Value>);

impl ClientInfo {
    /// Create an empty info map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, ignoring reserved names.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a field.
    ///
    /// Returns `false` if the key is reserved and the value was discarded.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        if is_reserved(&key) {
            return false;
        }
        self.0.insert(key, value.into());
        true
    }

    /// Get a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Remove a field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Overwrite fields with those of `patch`. Fields absent from the patch
    /// are kept.
    pub fn merge(&mut self, patch: ClientInfo) {
        for (key, value) in patch.0 {
            self.insert(key, value);
        }
    }

    /// Iterate over fields.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for ClientInfo {
    fn from(map: Map<String, Value>) -> Self {
        Self(map.into_iter().filter(|(k, _)| !is_reserved(k)).collect())
    }
}

impl TryFrom<Value> for ClientInfo {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(map.into()),
            other => Err(other),
        }
    }
}

impl Serialize for ClientInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// A point-in-time copy of a client record.
///
/// Snapshots are detached from the registry: changing one has no effect on
/// the stored record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    /// Client identifier.
    pub id: String,
    /// Status at the time of the snapshot.
    pub status: ClientStatus,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Time of the last status transition, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_online_at: Option<DateTime<Utc>>,
    /// ID of the bound connection while online.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    /// Application fields.
    #[serde(flatten)]
    pub info: ClientInfo,
}

impl ClientRecord {
    /// Check if the client was online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status == ClientStatus::Online
    }
}

/// Whether a connection is bound to a client.
enum Presence {
    /// No connection.
    Offline,
    /// Exclusive owner of the client's connection.
    Online(Box<dyn Connection>),
}

impl fmt::Debug for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Presence::Offline => f.write_str("Offline"),
            Presence::Online(conn) => f.debug_tuple("Online").field(conn.id()).finish(),
        }
    }
}

/// A stored client record.
#[derive(Debug)]
pub struct ClientEntry {
    id: String,
    info: ClientInfo,
    created_at: DateTime<Utc>,
    last_online_at: Option<DateTime<Utc>>,
    presence: Presence,
}

impl ClientEntry {
    /// Create an offline entry.
    pub(crate) fn new(id: impl Into<String>, info: ClientInfo) -> Self {
        Self {
            id: id.into(),
            info,
            created_at: Utc::now(),
            last_online_at: None,
            presence: Presence::Offline,
        }
    }

    /// Get the client ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the current status.
    #[must_use]
    pub fn status(&self) -> ClientStatus {
        match self.presence {
            Presence::Offline => ClientStatus::Offline,
            Presence::Online(_) => ClientStatus::Online,
        }
    }

    /// Get the application fields.
    #[must_use]
    pub fn info(&self) -> &ClientInfo {
        &self.info
    }

    /// Get the creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the time of the last status transition.
    #[must_use]
    pub fn last_online_at(&self) -> Option<DateTime<Utc>> {
        self.last_online_at
    }

    /// Get the bound connection.
    #[must_use]
    pub fn connection(&self) -> Option<&(dyn Connection + 'static)> {
        match &self.presence {
            Presence::Online(conn) => Some(conn.as_ref()),
            Presence::Offline => None,
        }
    }

    pub(crate) fn connection_mut(&mut self) -> Option<&mut (dyn Connection + 'static)> {
        match &mut self.presence {
            Presence::Online(conn) => Some(conn.as_mut()),
            Presence::Offline => None,
        }
    }

    /// Get the ID of the bound connection.
    #[must_use]
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.connection().map(|conn| conn.id())
    }

    /// Copy the record out.
    #[must_use]
    pub fn snapshot(&self) -> ClientRecord {
        ClientRecord {
            id: self.id.clone(),
            status: self.status(),
            created_at: self.created_at,
            last_online_at: self.last_online_at,
            connection: self.connection_id().map(|id| id.as_str().to_string()),
            info: self.info.clone(),
        }
    }

    pub(crate) fn merge_info(&mut self, patch: ClientInfo) {
        self.info.merge(patch);
    }

    /// Bind a connection, going online.
    ///
    /// Hands the connection back if one is already bound.
    pub(crate) fn bring_online(
        &mut self,
        connection: Box<dyn Connection>,
    ) -> Result<(), Box<dyn Connection>> {
        if let Presence::Online(_) = self.presence {
            return Err(connection);
        }
        self.presence = Presence::Online(connection);
        self.stamp_transition();
        Ok(())
    }

    /// Unbind the connection, going offline.
    ///
    /// Returns `None` without touching the entry if it was already offline.
    pub(crate) fn take_offline(&mut self) -> Option<Box<dyn Connection>> {
        match std::mem::replace(&mut self.presence, Presence::Offline) {
            Presence::Online(conn) => {
                self.stamp_transition();
                Some(conn)
            }
            Presence::Offline => None,
        }
    }

    // Transition times never move backwards, even if the wall clock does.
    fn stamp_transition(&mut self) {
        let floor = self.last_online_at.unwrap_or(self.created_at);
        self.last_online_at = Some(Utc::now().max(floor));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_transport::memory;
    use serde_json::json;

    #[test]
    fn test_info_strips_reserved_fields() {
        let info = ClientInfo::try_from(json!({
            "id": "other",
            "status": "online",
            "createdAt": "yesterday",
            "lastOnlineAt": "today",
            "connection": "sock",
            "nickname": "x"
        }))
        .unwrap();

        assert_eq!(info.len(), 1);
        assert_eq!(info.get("nickname"), Some(&json!("x")));
    }

    #[test]
    fn test_info_insert_reserved() {
        let mut info = ClientInfo::new();
        assert!(!info.insert("status", "online"));
        assert!(info.insert("room", "lobby"));
        assert_eq!(info.len(), 1);
    }

    #[test]
    fn test_info_merge_overwrites() {
        let mut info = ClientInfo::new().with("a", 1).with("b", 2);
        info.merge(ClientInfo::new().with("b", 3).with("c", 4));

        assert_eq!(info.get("a"), Some(&json!(1)));
        assert_eq!(info.get("b"), Some(&json!(3)));
        assert_eq!(info.get("c"), Some(&json!(4)));
    }

    #[test]
    fn test_info_deserialize_strips_reserved() {
        let info: ClientInfo = serde_json::from_str(r#"{"id":"x","name":"Alice"}"#).unwrap();
        assert!(info.get("id").is_none());
        assert_eq!(info.get("name"), Some(&json!("Alice")));
    }

    #[test]
    fn test_entry_transitions() {
        let mut entry = ClientEntry::new("alice", ClientInfo::new());
        assert_eq!(entry.status(), ClientStatus::Offline);
        assert!(entry.last_online_at().is_none());
        assert!(entry.take_offline().is_none());
        assert!(entry.last_online_at().is_none());

        let (conn, _peer) = memory::pair_with_id("conn-1");
        assert!(entry.bring_online(Box::new(conn)).is_ok());
        assert_eq!(entry.status(), ClientStatus::Online);
        assert_eq!(entry.connection_id().map(|c| c.as_str()), Some("conn-1"));
        let online_at = entry.last_online_at().unwrap();
        assert!(online_at >= entry.created_at());

        let (second, _peer2) = memory::pair();
        assert!(entry.bring_online(Box::new(second)).is_err());

        assert!(entry.take_offline().is_some());
        assert_eq!(entry.status(), ClientStatus::Offline);
        assert!(entry.connection().is_none());
        assert!(entry.last_online_at().unwrap() >= online_at);
    }

    #[test]
    fn test_snapshot_serialization() {
        let entry = ClientEntry::new("alice", ClientInfo::new().with("nickname", "al"));
        let value = serde_json::to_value(entry.snapshot()).unwrap();

        assert_eq!(value["id"], "alice");
        assert_eq!(value["status"], "offline");
        assert_eq!(value["nickname"], "al");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("lastOnlineAt").is_none());
        assert!(value.get("connection").is_none());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let entry = ClientEntry::new("alice", ClientInfo::new());
        let mut record = entry.snapshot();
        record.status = ClientStatus::Online;
        record.info.insert("x", 1);

        assert_eq!(entry.status(), ClientStatus::Offline);
        assert!(entry.info().is_empty());
    }
}
