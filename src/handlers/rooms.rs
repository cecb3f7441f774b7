//! Room listing, creation, and the pre-join password check.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::AppState;
use crate::error::BrokerError;
use crate::models::RoomSummary;

#[derive(Debug, Deserialize)]
pub struct CreateRoomInput {
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateRoomReply {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
pub struct JoinCheckInput {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct JoinCheckReply {
    pub ok: bool,
}

/// GET /api/rooms
pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(state.broker.list_rooms().await)
}

/// POST /api/rooms
pub async fn create_room(
    State(state): State<AppState>,
    Json(input): Json<CreateRoomInput>,
) -> Result<Json<CreateRoomReply>, BrokerError> {
    let room_id = state
        .broker
        .create_room(&input.name, input.password.as_deref())
        .await?;
    Ok(Json(CreateRoomReply { room_id }))
}

/// POST /api/rooms/{room_id}/join
///
/// Password check before the WebSocket join. 404 for an unknown room,
/// 403 with `ok: false` for a wrong password.
pub async fn join_check(
    Path(room_id): Path<String>,
    State(state): State<AppState>,
    Json(input): Json<JoinCheckInput>,
) -> Result<(StatusCode, Json<JoinCheckReply>), BrokerError> {
    let ok = state.broker.check_password(&room_id, &input.password)?;
    if !ok {
        info!("rejected password for room {}", room_id);
    }
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };
    Ok((status, Json(JoinCheckReply { ok })))
}
