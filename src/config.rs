//! Server configuration and shared app state.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::broker::RoomBroker;

/// Configuration for the huddle server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Directory holding the durable snapshot
    pub data_dir: PathBuf,
    /// Directory holding uploaded file bytes
    pub upload_dir: PathBuf,
    /// Listen address
    pub bind_addr: SocketAddr,
    /// Per-connection outbox depth; a member whose outbox is full is
    /// treated as unreachable and skipped
    pub outbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let root = std::env::var("HUDDLE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("huddle_data"));
        let port = std::env::var("HUDDLE_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5000);
        Self {
            data_dir: root.join("data"),
            upload_dir: root.join("uploads"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            outbox_capacity: 256,
        }
    }
}

impl ServerConfig {
    /// Config rooted at a custom base directory (used by tests).
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            data_dir: base_dir.join("data"),
            upload_dir: base_dir.join("uploads"),
            ..Self::default()
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("snapshot.json")
    }

    /// Ensure all directories exist
    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        Ok(())
    }
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<RoomBroker>,
    pub config: ServerConfig,
}
