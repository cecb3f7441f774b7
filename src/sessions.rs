//! Per-room session table: which connection holds which username, and the
//! outbox used to reach it.

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{BrokerError, Result};
use crate::events::ServerEvent;
use crate::models::ConnId;

struct Member {
    username: String,
    outbox: mpsc::Sender<ServerEvent>,
}

/// Live members of one room. All access happens under the owning room's
/// lock, which is what makes the uniqueness check and the registration
/// atomic with respect to concurrent joins and leaves.
#[derive(Default)]
pub struct SessionTable {
    members: std::collections::HashMap<ConnId, Member>,
}

impl SessionTable {
    /// Claim a username for a connection. Exact string match against every
    /// live member; the same name becomes available again once its holder
    /// leaves.
    pub fn claim(
        &mut self,
        conn: ConnId,
        username: &str,
        outbox: mpsc::Sender<ServerEvent>,
    ) -> Result<()> {
        if self.members.values().any(|m| m.username == username) {
            return Err(BrokerError::UsernameTaken(username.to_string()));
        }
        self.members.insert(
            conn,
            Member {
                username: username.to_string(),
                outbox,
            },
        );
        Ok(())
    }

    /// Remove a connection's session. Returns false (and is a no-op) when
    /// the connection had none.
    pub fn release(&mut self, conn: ConnId) -> bool {
        self.members.remove(&conn).is_some()
    }

    pub fn username_of(&self, conn: ConnId) -> Option<&str> {
        self.members.get(&conn).map(|m| m.username.as_str())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Fan an event out to every live member. Delivery is fire-and-forget:
    /// a full or closed outbox means the recipient is slow or already gone,
    /// and the event is dropped for that recipient only.
    pub fn broadcast(&self, event: &ServerEvent) {
        for (conn, member) in &self.members {
            if member.outbox.try_send(event.clone()).is_err() {
                debug!("dropping event for unreachable connection {}", conn);
            }
        }
    }
}
