//! File upload and download. The broker never sees file bytes; uploads
//! land under the configured upload directory and the returned descriptor
//! is what travels through the room as a `file_shared` notice.

use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::Json,
};
use bytes::Bytes;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::AppState;
use crate::error::BrokerError;
use crate::models::FileInfo;

/// POST /api/upload
///
/// Multipart form with a `file` field and a `room_id` field. Stores the
/// bytes under a server-assigned name and returns the file descriptor.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<FileInfo>, BrokerError> {
    let mut original_name = None;
    let mut data: Option<Bytes> = None;
    let mut room_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BrokerError::Validation(format!("bad multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                original_name = field.file_name().map(|s| s.to_string());
                data = Some(field.bytes().await.map_err(|e| {
                    BrokerError::Validation(format!("failed to read file field: {}", e))
                })?);
            }
            "room_id" => {
                room_id = Some(field.text().await.map_err(|e| {
                    BrokerError::Validation(format!("failed to read room_id field: {}", e))
                })?);
            }
            _ => {}
        }
    }

    let data = data.ok_or_else(|| BrokerError::Validation("no file provided".into()))?;
    let original_name = original_name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| BrokerError::Validation("no file selected".into()))?;
    let room_id = room_id.ok_or_else(|| BrokerError::Validation("room_id is required".into()))?;

    if !state.broker.room_exists(&room_id) {
        return Err(BrokerError::RoomNotFound);
    }

    let storage_name = format!(
        "{}_{}",
        &Uuid::new_v4().to_string()[..8],
        sanitize_filename(&original_name)
    );
    let path = state.config.upload_dir.join(&storage_name);
    tokio::fs::write(&path, &data).await.map_err(|e| {
        error!("failed to store upload {:?}: {}", path, e);
        BrokerError::Internal(format!("failed to store upload: {}", e))
    })?;

    info!("stored upload {} ({} bytes)", storage_name, data.len());

    Ok(Json(FileInfo {
        url: format!("/uploads/{}", storage_name),
        storage_name,
        original_name,
    }))
}

/// GET /uploads/{name}
pub async fn download_file(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<(HeaderMap, Bytes), StatusCode> {
    // Storage names are flat; anything path-like is not ours.
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(StatusCode::NOT_FOUND);
    }

    let path = state.config.upload_dir.join(&name);
    let data = tokio::fs::read(&path)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        "application/octet-stream".parse().unwrap(),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{}\"", name)
            .parse()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
    );

    Ok((headers, Bytes::from(data)))
}

/// Keep only characters that are safe in a flat storage name.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}
