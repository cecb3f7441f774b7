use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Opaque identity of one live transport connection.
///
/// The broker only ever compares these for equality; it never looks inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Room metadata. Immutable after creation; the clear password is never
/// stored, only its SHA-256 hex digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMeta {
    pub id: String,
    pub name: String,
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RoomMeta {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// A single chat message, append-only once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub username: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "file_info", rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    File(FileInfo),
}

/// Descriptor for an uploaded file. The broker only records and broadcasts
/// this; the bytes themselves live under the upload directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub storage_name: String,
    pub original_name: String,
    pub url: String,
}

/// Room listing entry; `user_count` is sourced from the live session table,
/// not from the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub has_password: bool,
    pub user_count: usize,
}

/// The full durable image of all rooms and histories. Round-trips exactly
/// through `SnapshotStore::open` / its atomic rewrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub rooms: HashMap<String, RoomMeta>,
    pub histories: HashMap<String, Vec<Message>>,
}
