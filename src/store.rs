//! Durable snapshot of all rooms and their histories.
//!
//! The store owns the canonical copy of room metadata and message history
//! and rewrites the whole snapshot file on every mutation, using atomic
//! write-to-temp-then-rename so a crash mid-write never leaves a partial
//! file that a later load would accept.

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::models::{Message, RoomMeta, Snapshot};

pub struct SnapshotStore {
    path: PathBuf,
    state: Mutex<Snapshot>,
}

impl SnapshotStore {
    /// Open the store, loading any prior snapshot. A missing file means a
    /// fresh start; a corrupt or unreadable file degrades to empty state
    /// rather than failing startup.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<Snapshot>(&raw) {
                Ok(snapshot) => {
                    info!("loaded snapshot with {} rooms", snapshot.rooms.len());
                    snapshot
                }
                Err(e) => {
                    warn!("snapshot at {:?} is corrupt, starting empty: {}", path, e);
                    Snapshot::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Snapshot::default(),
            Err(e) => {
                warn!("snapshot at {:?} is unreadable, starting empty: {}", path, e);
                Snapshot::default()
            }
        };

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Record a newly created room. If the durable write fails, the
    /// in-memory insert is undone before the error is returned.
    pub async fn insert_room(&self, meta: RoomMeta) -> Result<()> {
        let mut state = self.state.lock().await;
        let id = meta.id.clone();
        state.rooms.insert(id.clone(), meta);
        state.histories.entry(id.clone()).or_default();

        if let Err(e) = Self::persist(&state, &self.path).await {
            // Room ids are freshly generated, so this cannot evict an
            // older room under the same id.
            state.rooms.remove(&id);
            state.histories.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    /// Append one message to a room's history and persist. The append and
    /// the durable write are a single unit: on write failure the message
    /// is popped again, so history and the file never diverge.
    pub async fn append(&self, room_id: &str, message: Message) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .histories
            .entry(room_id.to_string())
            .or_default()
            .push(message);

        if let Err(e) = Self::persist(&state, &self.path).await {
            if let Some(history) = state.histories.get_mut(room_id) {
                history.pop();
            }
            return Err(e);
        }
        Ok(())
    }

    /// Ordered history of a room, empty when the room has none.
    pub async fn history(&self, room_id: &str) -> Vec<Message> {
        self.state
            .lock()
            .await
            .histories
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Metadata of every known room, for seeding the registry at startup.
    pub async fn room_metas(&self) -> Vec<RoomMeta> {
        self.state.lock().await.rooms.values().cloned().collect()
    }

    /// Full copy of the current snapshot.
    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.clone()
    }

    async fn persist(state: &Snapshot, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(state).context("serialize snapshot")?;
        let temp_path = path.with_extension("tmp");

        fs::write(&temp_path, json)
            .await
            .with_context(|| format!("write {:?}", temp_path))?;

        // Atomic rename
        fs::rename(&temp_path, path)
            .await
            .with_context(|| format!("rename {:?} into place", temp_path))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageKind;
    use chrono::Utc;
    use tempfile::TempDir;

    fn meta(id: &str, name: &str) -> RoomMeta {
        RoomMeta {
            id: id.to_string(),
            name: name.to_string(),
            password_hash: None,
            created_at: Utc::now(),
        }
    }

    fn message(username: &str, body: &str) -> Message {
        Message {
            username: username.to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
            kind: MessageKind::Text,
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("snapshot.json");

        let store = SnapshotStore::open(&path).await;
        store.insert_room(meta("abc12345", "Lobby")).await.unwrap();
        store.append("abc12345", message("alice", "hi")).await.unwrap();
        store.append("abc12345", message("bob", "hello")).await.unwrap();
        let before = store.snapshot().await;

        let reopened = SnapshotStore::open(&path).await;
        assert_eq!(reopened.snapshot().await, before);
        let history = reopened.history("abc12345").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].body, "hi");
        assert_eq!(history[1].body, "hello");
    }

    #[tokio::test]
    async fn corrupt_snapshot_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("snapshot.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = SnapshotStore::open(&path).await;
        assert!(store.room_metas().await.is_empty());
        assert!(store.history("anything").await.is_empty());
    }

    #[tokio::test]
    async fn missing_snapshot_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(temp_dir.path().join("snapshot.json")).await;
        assert_eq!(store.snapshot().await, Snapshot::default());
    }

    #[tokio::test]
    async fn failed_write_rolls_back_append() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        let path = data_dir.join("snapshot.json");

        let store = SnapshotStore::open(&path).await;
        store.insert_room(meta("abc12345", "Lobby")).await.unwrap();

        // Make the temp-file write fail by removing the parent directory.
        std::fs::remove_dir_all(&data_dir).unwrap();
        let err = store.append("abc12345", message("alice", "lost")).await;
        assert!(err.is_err());
        assert!(store.history("abc12345").await.is_empty());

        // The room stays usable once the directory is back.
        std::fs::create_dir_all(&data_dir).unwrap();
        store.append("abc12345", message("alice", "kept")).await.unwrap();
        let history = store.history("abc12345").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].body, "kept");
    }

    #[tokio::test]
    async fn failed_write_rolls_back_room_insert() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path().join("data");
        let store = SnapshotStore::open(data_dir.join("snapshot.json")).await;

        // Parent directory was never created, so persisting fails.
        assert!(store.insert_room(meta("abc12345", "Lobby")).await.is_err());
        assert!(store.room_metas().await.is_empty());
    }
}
