//! Huddle — a LAN chat server.
//!
//! Ad-hoc groups on a local network join named, optionally password-protected
//! rooms and exchange text messages and file-share notices in real time, with
//! history persisted across restarts. The room broker serializes all traffic
//! for a room so membership, history, and broadcasts stay consistent.

pub mod broker;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod registry;
pub mod sessions;
pub mod store;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use broker::RoomBroker;
use config::{AppState, ServerConfig};

pub async fn run() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    // Already-set means another test or embedder initialized tracing first.
    let _ = tracing::subscriber::set_global_default(subscriber);

    let config = ServerConfig::default();
    config.ensure_dirs().await?;

    info!("=== Huddle Server ===");
    info!("Data directory: {:?}", config.data_dir);
    info!("Upload directory: {:?}", config.upload_dir);

    let broker = Arc::new(RoomBroker::new(&config).await);
    let state = AppState {
        broker,
        config: config.clone(),
    };

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the full router; split out so tests can drive it in-process.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/rooms",
            get(handlers::list_rooms).post(handlers::create_room),
        )
        .route("/api/rooms/{room_id}/join", post(handlers::join_check))
        .route("/api/upload", post(handlers::upload_file))
        .route("/uploads/{name}", get(handlers::download_file))
        .route("/ws", get(handlers::ws_upgrade))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "OK - Huddle Server"
}
