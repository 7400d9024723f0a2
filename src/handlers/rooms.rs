//! Room endpoints (§6) — creation, listing, lookup, director state
//! transitions, and deletion.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::auth::{generate_access_key, require_room_access_key};
use crate::models::Room;
use crate::state_machine::{apply_room_command, RoomCommand};
use crate::{db, AppError, AppState, Result};

/// Roughly "1-2s in the future" per §4.1's `scheduled_recording_start`.
const RECORDING_START_LEAD: Duration = Duration::milliseconds(1500);

#[derive(Debug, Deserialize, Default)]
pub struct CreateRoomRequest {
    pub room_id: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    pub room_id: String,
    pub access_key: String,
    pub access_token: Option<String>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub recording_ids: Vec<String>,
}

async fn to_response(state: &AppState, room: &Room) -> Result<RoomResponse> {
    let recording_ids = db::list_recording_ids_in_room(&state.db, &room.id).await?;
    Ok(RoomResponse {
        room_id: room.id.clone(),
        access_key: room.access_key.clone(),
        access_token: room.access_token.clone(),
        state: room.state.clone(),
        created_at: room.created_at,
        updated_at: room.updated_at,
        recording_ids,
    })
}

pub async fn create_room(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateRoomRequest>>,
) -> Result<Json<RoomResponse>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let room_id = body.room_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let access_key = generate_access_key();

    let room = db::upsert_room(&state.db, &room_id, &access_key, body.access_token.as_deref())
        .await?;
    Ok(Json(to_response(&state, &room).await?))
}

pub async fn list_rooms(State(state): State<Arc<AppState>>) -> Result<Json<Vec<RoomResponse>>> {
    let rooms = db::list_rooms(&state.db).await?;
    let mut out = Vec::with_capacity(rooms.len());
    for room in &rooms {
        out.push(to_response(&state, room).await?);
    }
    Ok(Json(out))
}

pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RoomResponse>> {
    let room = db::find_room(&state.db, &room_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("room {} not found", room_id)))?;
    require_room_access_key(&headers, &room)?;
    Ok(Json(to_response(&state, &room).await?))
}

pub async fn get_room_by_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<RoomResponse>> {
    let room = db::find_room_by_token(&state.db, &token)
        .await?
        .ok_or_else(|| AppError::NotFound("room not found for token".to_string()))?;
    Ok(Json(to_response(&state, &room).await?))
}

#[derive(Debug, Deserialize)]
pub struct RoomStateRequest {
    pub command: String,
}

pub async fn patch_room_state(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RoomStateRequest>,
) -> Result<Json<RoomResponse>> {
    let room = db::find_room(&state.db, &room_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("room {} not found", room_id)))?;
    require_room_access_key(&headers, &room)?;

    let command = RoomCommand::parse(&body.command)
        .ok_or_else(|| AppError::BadRequest(format!("unknown command '{}'", body.command)))?;
    let next = apply_room_command(room.state_enum(), command)?;

    let updated = db::update_room_state(&state.db, &room_id, next.as_str()).await?;
    if command == RoomCommand::Reset {
        db::clear_room_recordings(&state.db, &room_id).await?;
    }

    state
        .coordinator
        .broadcast_room_state_changed(&room_id, next.as_str())
        .await;

    if command == RoomCommand::Start {
        let start_at = Utc::now() + RECORDING_START_LEAD;
        state
            .coordinator
            .broadcast_scheduled_start(&room_id, start_at)
            .await;
    }

    // A `stop` only enters `finalizing`; nothing else re-checks the
    // all-synced predicate afterwards. If every bound guest already synced
    // before the director stopped (or the room has no guest-recordings at
    // all), the predicate is already true the moment `finalizing` is
    // entered, so finalize right here rather than waiting on a sync event
    // that will never arrive (§4.1, §8).
    let mut updated = updated;
    if command == RoomCommand::Stop && state.coordinator.all_synced(&room_id).await {
        if let Err(e) =
            crate::finalize_room(&state.db, &state.job_queue, &state.coordinator, &room_id).await
        {
            tracing::warn!("failed to finalize room {} after stop: {}", room_id, e);
        } else if let Some(room) = db::find_room(&state.db, &room_id).await? {
            updated = room;
        }
    }

    Ok(Json(to_response(&state, &updated).await?))
}

pub async fn delete_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let room = db::find_room(&state.db, &room_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("room {} not found", room_id)))?;
    require_room_access_key(&headers, &room)?;

    db::delete_room(&state.db, &room_id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn list_room_recordings(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<crate::models::Recording>>> {
    let room = db::find_room(&state.db, &room_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("room {} not found", room_id)))?;
    require_room_access_key(&headers, &room)?;

    let recordings = db::list_recordings_in_room(&state.db, &room_id).await?;
    Ok(Json(recordings))
}
