//! HTTP and WebSocket boundary. Thin, stateless wrappers over the broker.

mod rooms;
mod uploads;
mod ws;

pub use rooms::{create_room, join_check, list_rooms};
pub use uploads::{download_file, upload_file};
pub use ws::ws_upgrade;
