//! Recording endpoints (§6) — creation, state/metadata mutation, chunked
//! upload (proxy and presigned), and download.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::auth::require_room_access_key;
use crate::config::StorageBackend;
use crate::models::Recording;
use crate::state_machine::{apply_recording_transition, can_mutate_metadata};
use crate::storage::{self, ChunkKind};
use crate::{db, AppError, AppState, Result};

/// Room-scoped endpoints require the room's access key *only when the
/// recording is bound to a room*; standalone recordings have no room to
/// scope access to (§4.1).
async fn require_access_for_recording(
    state: &AppState,
    headers: &HeaderMap,
    recording: &Recording,
) -> Result<()> {
    let Some(room_id) = &recording.room_id else {
        return Ok(());
    };
    let room = db::find_room(&state.db, room_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("room {} not found", room_id)))?;
    require_room_access_key(headers, &room)
}

async fn find_or_404(state: &AppState, recording_id: &str) -> Result<Recording> {
    db::find_recording(&state.db, recording_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("recording {} not found", recording_id)))
}

#[derive(Debug, Deserialize)]
pub struct CreateRecordingQuery {
    pub room_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateRecordingResponse {
    pub recording_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub state: String,
}

pub async fn create_recording(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CreateRecordingQuery>,
    headers: HeaderMap,
) -> Result<Json<CreateRecordingResponse>> {
    // A recording bound to a room is room-scoped (§4.1): the only HTTP
    // endpoint exempt from the access-key check is room *creation* itself,
    // not every recording endpoint that happens to take a `roomId`.
    if let Some(room_id) = &query.room_id {
        let room = db::find_room(&state.db, room_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("room {} not found", room_id)))?;
        require_room_access_key(&headers, &room)?;
    }

    let recording_id = Uuid::new_v4().to_string();
    let recording =
        db::upsert_recording(&state.db, &recording_id, query.room_id.as_deref()).await?;

    if let Some(room_id) = &recording.room_id {
        db::add_recording_to_room(&state.db, room_id, &recording_id).await?;
    }

    Ok(Json(CreateRecordingResponse {
        recording_id: recording.id,
        created_at: recording.created_at,
        state: recording.state,
    }))
}

pub async fn get_recording(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Recording>> {
    let recording = find_or_404(&state, &recording_id).await?;
    require_access_for_recording(&state, &headers, &recording).await?;
    Ok(Json(recording))
}

#[derive(Debug, Deserialize)]
pub struct RecordingStateRequest {
    pub state: String,
}

pub async fn patch_recording_state(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RecordingStateRequest>,
) -> Result<Json<Recording>> {
    let recording = find_or_404(&state, &recording_id).await?;
    require_access_for_recording(&state, &headers, &recording).await?;

    let target = crate::models::RecordingState::parse(&body.state)
        .ok_or_else(|| AppError::BadRequest(format!("unknown recording state '{}'", body.state)))?;
    apply_recording_transition(recording.state_enum(), target)?;

    let updated = db::update_recording_state(&state.db, &recording_id, target.as_str()).await?;
    Ok(Json(updated))
}

pub async fn patch_recording_metadata(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<crate::models::RecordingMetadata>,
) -> Result<Json<Recording>> {
    let recording = find_or_404(&state, &recording_id).await?;
    require_access_for_recording(&state, &headers, &recording).await?;

    if !can_mutate_metadata(recording.state_enum()) {
        return Err(AppError::OperationInvalid(
            "metadata can only be mutated in standby or recording state".to_string(),
        ));
    }

    // PATCH semantics: fields the caller omits keep their stored value
    // (e.g. `participant_name`, which the coordinator sets on
    // `set_recording_id` and a later device-info-only patch shouldn't erase).
    let mut merged = recording
        .metadata_json()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    let patch = serde_json::to_value(&patch)
        .map_err(|e| AppError::Internal(format!("failed to encode metadata patch: {}", e)))?;
    if let Some(patch_obj) = patch.as_object() {
        for (key, value) in patch_obj {
            if !value.is_null() {
                merged.insert(key.clone(), value.clone());
            }
        }
    }

    let updated = db::update_recording_metadata(
        &state.db,
        &recording_id,
        &serde_json::Value::Object(merged).to_string(),
    )
    .await?;
    Ok(Json(updated))
}

pub async fn post_init_segment(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    if state.config.storage_backend() != StorageBackend::Local {
        return Err(AppError::BadRequest(
            "proxy init-segment upload is only available on the local storage backend".to_string(),
        ));
    }

    let recording = find_or_404(&state, &recording_id).await?;
    require_access_for_recording(&state, &headers, &recording).await?;

    state
        .chunk_store
        .save_init(&recording_id, recording.room_id.as_deref(), body.to_vec())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    pub chunk_id: u64,
}

pub async fn post_chunk(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
    Query(query): Query<ChunkQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    let recording = find_or_404(&state, &recording_id).await?;
    require_access_for_recording(&state, &headers, &recording).await?;

    // `X-Chunk-Hash` is an optional client-supplied integrity hint carried
    // out-of-band; the store only commits byte length (§3).
    let len = body.len() as i64;
    state
        .chunk_store
        .save_chunk(
            &recording_id,
            recording.room_id.as_deref(),
            query.chunk_id,
            body.to_vec(),
        )
        .await?;
    db::increment_chunk_count(&state.db, &recording_id, len).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_upload_url_init_segment(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<storage::UploadUrl>> {
    let recording = find_or_404(&state, &recording_id).await?;
    require_access_for_recording(&state, &headers, &recording).await?;

    let url = state
        .chunk_store
        .issue_upload_url(
            &recording_id,
            recording.room_id.as_deref(),
            ChunkKind::Init,
            state.config.default_presign_ttl_secs(),
        )
        .await?;
    Ok(Json(url))
}

pub async fn get_upload_url_chunk(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
    Query(query): Query<ChunkQuery>,
    headers: HeaderMap,
) -> Result<Json<storage::UploadUrl>> {
    let recording = find_or_404(&state, &recording_id).await?;
    require_access_for_recording(&state, &headers, &recording).await?;

    let url = state
        .chunk_store
        .issue_upload_url(
            &recording_id,
            recording.room_id.as_deref(),
            ChunkKind::Index(query.chunk_id),
            state.config.default_presign_ttl_secs(),
        )
        .await?;
    Ok(Json(url))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UploadConfirmRequest {
    #[serde(rename = "init-segment")]
    InitSegment,
    #[serde(rename = "chunk")]
    Chunk {
        #[serde(rename = "chunkId")]
        chunk_id: Option<u64>,
    },
}

pub async fn post_upload_confirm(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<UploadConfirmRequest>,
) -> Result<Json<Recording>> {
    let recording = find_or_404(&state, &recording_id).await?;
    require_access_for_recording(&state, &headers, &recording).await?;

    let updated = match body {
        UploadConfirmRequest::InitSegment => recording,
        UploadConfirmRequest::Chunk { .. } => {
            // Byte length isn't observable server-side on the presigned path.
            db::increment_chunk_count(&state.db, &recording_id, 0).await?
        }
    };
    Ok(Json(updated))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase", untagged)]
pub enum DownloadUrlsResponse {
    Direct {
        direct_download: bool,
        filename: String,
        init_segment: Option<storage::PresignedChunk>,
        chunks: Vec<storage::PresignedChunk>,
        total_chunks: usize,
        expires_in: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        m4a_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        m4a_filename: Option<String>,
    },
    Proxy {
        direct_download: bool,
        filename: String,
        download_url: String,
    },
}

pub async fn get_download_urls(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DownloadUrlsResponse>> {
    let recording = find_or_404(&state, &recording_id).await?;
    require_access_for_recording(&state, &headers, &recording).await?;

    let filename = format!("{}.mp4", recording_id);
    let urls = state
        .chunk_store
        .issue_download_urls(
            &recording_id,
            recording.room_id.as_deref(),
            state.config.default_presign_ttl_secs(),
        )
        .await?;

    if urls.direct_download {
        let (m4a_url, m4a_filename) = match &recording.output_m4a_key {
            Some(key) => (
                state
                    .chunk_store
                    .presign_get(key, state.config.default_presign_ttl_secs())
                    .await?,
                Some(format!("{}.m4a", recording_id)),
            ),
            None => (None, None),
        };
        Ok(Json(DownloadUrlsResponse::Direct {
            direct_download: true,
            filename,
            total_chunks: urls.chunks.len(),
            init_segment: urls.init_segment,
            chunks: urls.chunks,
            expires_in: urls.expires_in,
            m4a_url,
            m4a_filename,
        }))
    } else {
        Ok(Json(DownloadUrlsResponse::Proxy {
            direct_download: false,
            filename,
            download_url: format!("/recordings/{}/download", recording_id),
        }))
    }
}

pub async fn get_download(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let recording = find_or_404(&state, &recording_id).await?;
    require_access_for_recording(&state, &headers, &recording).await?;

    let bytes = storage::assemble(
        state.chunk_store.as_ref(),
        &recording_id,
        recording.room_id.as_deref(),
    )
    .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.mp4\"", recording_id),
            ),
        ],
        bytes,
    )
        .into_response())
}
