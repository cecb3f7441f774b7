//! Room registry: creation, lookup, and password checks.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::{BrokerError, Result};
use crate::models::RoomMeta;
use crate::sessions::SessionTable;
use crate::store::SnapshotStore;

/// One registered room: immutable metadata plus the live session table.
/// The mutex around the sessions is the per-room serialization point.
pub struct RoomEntry {
    pub meta: RoomMeta,
    pub sessions: Mutex<SessionTable>,
}

impl RoomEntry {
    fn new(meta: RoomMeta) -> Arc<Self> {
        Arc::new(Self {
            meta,
            sessions: Mutex::new(SessionTable::default()),
        })
    }
}

/// Mapping from room id to room entry. The map itself is only locked for
/// lookups and inserts; it is never held across an await.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<RoomEntry>>>,
}

impl RoomRegistry {
    /// Seed the registry from snapshot metadata, with empty session tables.
    pub fn from_metas(metas: Vec<RoomMeta>) -> Self {
        let rooms = metas
            .into_iter()
            .map(|meta| (meta.id.clone(), RoomEntry::new(meta)))
            .collect();
        Self {
            rooms: RwLock::new(rooms),
        }
    }

    /// Create a room and persist it before publishing. Empty or
    /// whitespace-only names are rejected.
    pub async fn create_room(
        &self,
        store: &SnapshotStore,
        name: &str,
        password: Option<&str>,
    ) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BrokerError::Validation("room name is required".into()));
        }

        let id = Uuid::new_v4().to_string()[..8].to_string();
        let meta = RoomMeta {
            id: id.clone(),
            name: name.to_string(),
            password_hash: password.and_then(hash_password),
            created_at: chrono::Utc::now(),
        };

        store
            .insert_room(meta.clone())
            .await
            .map_err(|e| BrokerError::Internal(e.to_string()))?;

        self.rooms.write().insert(id.clone(), RoomEntry::new(meta));
        info!("created room {} ({:?})", id, name);
        Ok(id)
    }

    pub fn get(&self, room_id: &str) -> Result<Arc<RoomEntry>> {
        self.rooms
            .read()
            .get(room_id)
            .cloned()
            .ok_or(BrokerError::RoomNotFound)
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.read().contains_key(room_id)
    }

    /// True when the room has no password, or the supplied password hashes
    /// to the stored digest. The supplied string is hashed verbatim; only
    /// room creation trims.
    pub fn check_password(&self, room_id: &str, supplied: &str) -> Result<bool> {
        let entry = self.get(room_id)?;
        Ok(match &entry.meta.password_hash {
            None => true,
            Some(stored) => digest(supplied) == *stored,
        })
    }

    /// All entries, for listing and for the disconnect scan.
    pub fn all(&self) -> Vec<Arc<RoomEntry>> {
        self.rooms.read().values().cloned().collect()
    }
}

/// SHA-256 hex digest of a non-empty password; empty or whitespace-only
/// input means "no password". Trimming happens here, at creation time only.
fn hash_password(password: &str) -> Option<String> {
    let password = password.trim();
    if password.is_empty() {
        return None;
    }
    Some(digest(password))
}

fn digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}
