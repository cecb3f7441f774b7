//! Room broker: the serialization and broadcast authority.
//!
//! Every join/leave/send for a given room runs under that room's session
//! lock, so the uniqueness check, the history append, and the fan-out
//! observe a consistent view and happen in one strict order. Operations on
//! different rooms never contend. Lock order is always registry map, then
//! one room's sessions, then the store; the store mutex is innermost, which
//! keeps full-snapshot writes from deadlocking against per-room traffic.
//!
//! Fan-out never awaits a recipient: each connection drains its own bounded
//! outbox, and `try_send` drops the event for an unreachable member without
//! surfacing anything to the sender.

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::{BrokerError, Result};
use crate::events::ServerEvent;
use crate::models::{ConnId, FileInfo, Message, MessageKind, RoomSummary};
use crate::registry::RoomRegistry;
use crate::store::SnapshotStore;

pub struct RoomBroker {
    registry: RoomRegistry,
    store: SnapshotStore,
}

impl RoomBroker {
    /// Load the snapshot and seed the registry from it.
    pub async fn new(config: &ServerConfig) -> Self {
        let store = SnapshotStore::open(config.snapshot_path()).await;
        let registry = RoomRegistry::from_metas(store.room_metas().await);
        Self { registry, store }
    }

    // --- synchronous request/response API (web layer) ---

    pub async fn create_room(&self, name: &str, password: Option<&str>) -> Result<String> {
        self.registry.create_room(&self.store, name, password).await
    }

    pub fn check_password(&self, room_id: &str, supplied: &str) -> Result<bool> {
        self.registry.check_password(room_id, supplied)
    }

    pub fn room_exists(&self, room_id: &str) -> bool {
        self.registry.contains(room_id)
    }

    /// Read-only room listing; live counts come from the session tables.
    pub async fn list_rooms(&self) -> Vec<RoomSummary> {
        let mut entries = self.registry.all();
        entries.sort_by(|a, b| a.meta.created_at.cmp(&b.meta.created_at));

        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            let user_count = entry.sessions.lock().await.len();
            summaries.push(RoomSummary {
                id: entry.meta.id.clone(),
                name: entry.meta.name.clone(),
                has_password: entry.meta.has_password(),
                user_count,
            });
        }
        summaries
    }

    /// Ordered history of a room, as the persistence store has it.
    pub async fn history(&self, room_id: &str) -> Result<Vec<Message>> {
        self.registry.get(room_id)?;
        Ok(self.store.history(room_id).await)
    }

    // --- connection event stream ---

    /// Register a session. On success the joiner gets `join_success`, every
    /// live member (the joiner included) gets `user_joined`, and the joiner
    /// then receives the full history. The history is read under the same
    /// room lock as the registration, so it is a prefix-consistent snapshot:
    /// it holds every message broadcast before the acknowledgment and none
    /// broadcast after it.
    pub async fn join(
        &self,
        room_id: &str,
        conn: ConnId,
        username: &str,
        outbox: mpsc::Sender<ServerEvent>,
    ) -> Result<()> {
        let username = username.trim();
        if username.is_empty() {
            return Err(BrokerError::Validation("username is required".into()));
        }

        let entry = self.registry.get(room_id)?;
        let mut sessions = entry.sessions.lock().await;
        sessions.claim(conn, username, outbox.clone())?;
        let user_count = sessions.len();

        let _ = outbox.try_send(ServerEvent::JoinSuccess);
        sessions.broadcast(&ServerEvent::UserJoined {
            username: username.to_string(),
            user_count,
        });
        let messages = self.store.history(room_id).await;
        let _ = outbox.try_send(ServerEvent::MessageHistory { messages });

        info!("{} joined room {} ({} online)", username, room_id, user_count);
        Ok(())
    }

    /// Remove a connection's session from one room. A no-op when the room
    /// is unknown or the connection was not a member.
    pub async fn leave(&self, room_id: &str, conn: ConnId) {
        let Ok(entry) = self.registry.get(room_id) else {
            return;
        };
        let mut sessions = entry.sessions.lock().await;
        if sessions.release(conn) {
            sessions.broadcast(&ServerEvent::UserLeft {
                user_count: sessions.len(),
            });
        }
    }

    /// Drop every session the connection holds. The departing connection's
    /// room is not tracked anywhere, so this scans all rooms.
    pub async fn disconnect(&self, conn: ConnId) {
        for entry in self.registry.all() {
            let mut sessions = entry.sessions.lock().await;
            if sessions.release(conn) {
                info!("connection {} left room {}", conn, entry.meta.id);
                sessions.broadcast(&ServerEvent::UserLeft {
                    user_count: sessions.len(),
                });
            }
        }
    }

    /// Record and broadcast a text message from a registered member.
    pub async fn send(&self, room_id: &str, conn: ConnId, body: String) -> Result<()> {
        self.record_and_broadcast(room_id, conn, MessageKind::Text, body)
            .await
    }

    /// Record and broadcast a file-share notice. The file bytes themselves
    /// were handled by the upload endpoint; only the descriptor travels
    /// through the room.
    pub async fn share_file(&self, room_id: &str, conn: ConnId, file_info: FileInfo) -> Result<()> {
        let body = format!("shared a file: {}", file_info.original_name);
        self.record_and_broadcast(room_id, conn, MessageKind::File(file_info), body)
            .await
    }

    async fn record_and_broadcast(
        &self,
        room_id: &str,
        conn: ConnId,
        kind: MessageKind,
        body: String,
    ) -> Result<()> {
        let entry = self.registry.get(room_id)?;
        let sessions = entry.sessions.lock().await;
        let username = sessions
            .username_of(conn)
            .ok_or_else(|| BrokerError::Validation("not a member of this room".into()))?
            .to_string();

        let message = Message {
            username,
            body,
            timestamp: Utc::now(),
            kind,
        };

        // Append and durable write are one unit; on failure the store has
        // already rolled the append back and the room stays usable.
        self.store.append(room_id, message.clone()).await.map_err(|e| {
            error!("failed to persist message for room {}: {}", room_id, e);
            BrokerError::Internal(e.to_string())
        })?;

        // Still under the room lock: broadcast order == history order.
        sessions.broadcast(&ServerEvent::Message(message));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::mpsc::Receiver;

    async fn test_broker() -> (TempDir, Arc<RoomBroker>) {
        let temp_dir = TempDir::new().unwrap();
        let config = ServerConfig::with_base_dir(temp_dir.path());
        config.ensure_dirs().await.unwrap();
        let broker = Arc::new(RoomBroker::new(&config).await);
        (temp_dir, broker)
    }

    fn outbox() -> (mpsc::Sender<ServerEvent>, Receiver<ServerEvent>) {
        mpsc::channel(64)
    }

    fn drain(rx: &mut Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn join_emits_ack_membership_then_history() {
        let (_guard, broker) = test_broker().await;
        let room = broker.create_room("Lobby", None).await.unwrap();

        let (tx, mut rx) = outbox();
        broker.join(&room, ConnId::new(), "alice", tx).await.unwrap();

        let events = drain(&mut rx);
        assert!(matches!(events[0], ServerEvent::JoinSuccess));
        assert!(matches!(
            &events[1],
            ServerEvent::UserJoined { username, user_count: 1 } if username == "alice"
        ));
        assert!(matches!(
            &events[2],
            ServerEvent::MessageHistory { messages } if messages.is_empty()
        ));
    }

    #[tokio::test]
    async fn second_join_with_same_username_is_rejected() {
        let (_guard, broker) = test_broker().await;
        let room = broker.create_room("Lobby", None).await.unwrap();

        let (tx1, _rx1) = outbox();
        broker.join(&room, ConnId::new(), "alice", tx1).await.unwrap();

        let (tx2, _rx2) = outbox();
        let err = broker
            .join(&room, ConnId::new(), "alice", tx2)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::UsernameTaken(_)));

        let rooms = broker.list_rooms().await;
        assert_eq!(rooms[0].user_count, 1);
    }

    #[tokio::test]
    async fn join_unknown_room_fails() {
        let (_guard, broker) = test_broker().await;
        let (tx, _rx) = outbox();
        let err = broker
            .join("missing", ConnId::new(), "alice", tx)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::RoomNotFound));
    }

    #[tokio::test]
    async fn send_reaches_all_members_in_order() {
        let (_guard, broker) = test_broker().await;
        let room = broker.create_room("Lobby", None).await.unwrap();

        let alice = ConnId::new();
        let (alice_tx, mut alice_rx) = outbox();
        broker.join(&room, alice, "alice", alice_tx).await.unwrap();

        let bob = ConnId::new();
        let (bob_tx, mut bob_rx) = outbox();
        broker.join(&room, bob, "bob", bob_tx).await.unwrap();

        drain(&mut alice_rx);
        drain(&mut bob_rx);

        broker.send(&room, alice, "hi".into()).await.unwrap();
        broker.send(&room, bob, "hello".into()).await.unwrap();

        for rx in [&mut alice_rx, &mut bob_rx] {
            let events = drain(rx);
            let bodies: Vec<_> = events
                .iter()
                .map(|event| match event {
                    ServerEvent::Message(m) => (m.username.as_str(), m.body.as_str()),
                    other => panic!("unexpected event {:?}", other),
                })
                .collect();
            assert_eq!(bodies, vec![("alice", "hi"), ("bob", "hello")]);
        }

        let history = broker.history(&room).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].body, "hi");
    }

    #[tokio::test]
    async fn send_without_membership_is_rejected() {
        let (_guard, broker) = test_broker().await;
        let room = broker.create_room("Lobby", None).await.unwrap();
        let err = broker
            .send(&room, ConnId::new(), "hi".into())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Validation(_)));
        assert!(broker.history(&room).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn share_file_records_a_notice() {
        let (_guard, broker) = test_broker().await;
        let room = broker.create_room("Lobby", None).await.unwrap();

        let alice = ConnId::new();
        let (tx, mut rx) = outbox();
        broker.join(&room, alice, "alice", tx).await.unwrap();
        drain(&mut rx);

        let file_info = FileInfo {
            storage_name: "ab12cd34_notes.txt".into(),
            original_name: "notes.txt".into(),
            url: "/uploads/ab12cd34_notes.txt".into(),
        };
        broker.share_file(&room, alice, file_info.clone()).await.unwrap();

        let events = drain(&mut rx);
        match &events[0] {
            ServerEvent::Message(m) => {
                assert_eq!(m.body, "shared a file: notes.txt");
                assert_eq!(m.kind, MessageKind::File(file_info));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn join_history_is_a_prefix_consistent_snapshot() {
        let (_guard, broker) = test_broker().await;
        let room = broker.create_room("Lobby", None).await.unwrap();

        let alice = ConnId::new();
        let (alice_tx, _alice_rx) = outbox();
        broker.join(&room, alice, "alice", alice_tx).await.unwrap();
        broker.send(&room, alice, "before".into()).await.unwrap();

        let (bob_tx, mut bob_rx) = outbox();
        broker.join(&room, ConnId::new(), "bob", bob_tx).await.unwrap();
        broker.send(&room, alice, "after".into()).await.unwrap();

        let events = drain(&mut bob_rx);
        let history: &[Message] = match &events[2] {
            ServerEvent::MessageHistory { messages } => messages,
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].body, "before");
        // The message sent after the join arrives live, not in history.
        assert!(matches!(
            &events[3],
            ServerEvent::Message(m) if m.body == "after"
        ));
    }

    #[tokio::test]
    async fn disconnect_frees_the_username_and_notifies() {
        let (_guard, broker) = test_broker().await;
        let room = broker.create_room("Lobby", None).await.unwrap();

        let alice = ConnId::new();
        let (alice_tx, _alice_rx) = outbox();
        broker.join(&room, alice, "alice", alice_tx).await.unwrap();

        let (bob_tx, mut bob_rx) = outbox();
        broker.join(&room, ConnId::new(), "bob", bob_tx).await.unwrap();
        drain(&mut bob_rx);

        broker.disconnect(alice).await;
        let events = drain(&mut bob_rx);
        assert!(matches!(events[0], ServerEvent::UserLeft { user_count: 1 }));

        // "alice" is claimable again on a fresh connection.
        let (tx, _rx) = outbox();
        broker.join(&room, ConnId::new(), "alice", tx).await.unwrap();
    }

    #[tokio::test]
    async fn leave_is_a_noop_for_nonmembers_and_unknown_rooms() {
        let (_guard, broker) = test_broker().await;
        let room = broker.create_room("Lobby", None).await.unwrap();
        broker.leave(&room, ConnId::new()).await;
        broker.leave("missing", ConnId::new()).await;
        broker.disconnect(ConnId::new()).await;
    }

    #[tokio::test]
    async fn concurrent_joins_admit_exactly_one_username() {
        let (_guard, broker) = test_broker().await;
        let room = broker.create_room("Lobby", None).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let broker = broker.clone();
            let room = room.clone();
            tasks.push(tokio::spawn(async move {
                let (tx, _rx) = mpsc::channel(64);
                broker.join(&room, ConnId::new(), "alice", tx).await
            }));
        }

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(broker.list_rooms().await[0].user_count, 1);
    }

    #[tokio::test]
    async fn persist_failure_surfaces_internal_and_rolls_back() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServerConfig::with_base_dir(temp_dir.path());
        config.ensure_dirs().await.unwrap();
        let broker = RoomBroker::new(&config).await;
        let room = broker.create_room("Lobby", None).await.unwrap();

        let alice = ConnId::new();
        let (tx, mut rx) = outbox();
        broker.join(&room, alice, "alice", tx).await.unwrap();
        drain(&mut rx);

        // Break the snapshot directory out from under the store.
        std::fs::remove_dir_all(&config.data_dir).unwrap();
        let err = broker.send(&room, alice, "lost".into()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Internal(_)));
        assert!(drain(&mut rx).is_empty());
        assert!(broker.history(&room).await.unwrap().is_empty());

        // The room remains usable for subsequent operations.
        std::fs::create_dir_all(&config.data_dir).unwrap();
        broker.send(&room, alice, "kept".into()).await.unwrap();
        let history = broker.history(&room).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].body, "kept");
    }

    #[tokio::test]
    async fn restart_restores_rooms_and_histories() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServerConfig::with_base_dir(temp_dir.path());
        config.ensure_dirs().await.unwrap();

        let room = {
            let broker = RoomBroker::new(&config).await;
            let room = broker.create_room("Lobby", Some("xyz")).await.unwrap();
            let alice = ConnId::new();
            let (tx, _rx) = outbox();
            broker.join(&room, alice, "alice", tx).await.unwrap();
            broker.send(&room, alice, "hi".into()).await.unwrap();
            room
        };

        let broker = RoomBroker::new(&config).await;
        assert!(broker.check_password(&room, "xyz").unwrap());
        assert!(!broker.check_password(&room, "wrong").unwrap());
        let history = broker.history(&room).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].username, "alice");

        // Sessions are not persisted: the restarted room is empty.
        assert_eq!(broker.list_rooms().await[0].user_count, 0);
    }
}
