//! Wire events exchanged over the WebSocket connection.
//!
//! Both directions are tagged unions with explicit fields; a payload that
//! does not parse into `ClientEvent` is answered with an `error` event
//! instead of being interpreted loosely.

use serde::{Deserialize, Serialize};

use crate::models::{FileInfo, Message};

/// Events a connection sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Join { room: String, username: String },
    Leave { room: String },
    Message { room: String, body: String },
    FileShared { room: String, file_info: FileInfo },
}

/// Events the server delivers to one or many connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Acknowledgment to the joining connection only.
    JoinSuccess,
    /// Join rejection to the originating connection only.
    UsernameTaken { message: String },
    /// Any other per-connection failure; never broadcast.
    Error { message: String },
    /// Membership change, broadcast to every live member of the room.
    UserJoined { username: String, user_count: usize },
    UserLeft { user_count: usize },
    /// Full history in append order, delivered to a joiner only.
    MessageHistory { messages: Vec<Message> },
    /// A newly recorded chat or file-share message.
    Message(Message),
}
