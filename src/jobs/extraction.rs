//! Audio-extraction job handler (§4.5). Downloads a recording's chunks,
//! reassembles the fMP4, copies the audio track out with `ffmpeg` (no
//! re-encode), and uploads both outputs — the same external-tool-via-temp-file
//! shape as the teacher's `audio::convert_to_mp3`, generalized from a
//! single-file conversion to a fetch-assemble-transcode-upload pipeline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::process::Command;
use uuid::Uuid;

use crate::queue::AudioExtractionJob;
use crate::storage::{self, ChunkStore};
use crate::{db, AppError, Result};

const DOWNLOAD_CONCURRENCY: usize = 6;
const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Serialize)]
pub struct RecordingOutput {
    pub mp4_key: String,
    pub m4a_key: String,
    pub mp4_size: u64,
    pub m4a_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub outputs: HashMap<String, RecordingOutput>,
    pub processing_duration_ms: u64,
}

/// Processes every recording in the batch sequentially, never aborting on
/// a single recording's failure (§4.5). The returned result's `outputs`
/// map holds only the recordings that succeeded.
pub async fn run(
    db_pool: &SqlitePool,
    chunk_store: &dyn ChunkStore,
    temp_root: &Path,
    job: &AudioExtractionJob,
) -> Result<ExtractionResult> {
    let started = std::time::Instant::now();
    let mut outputs = HashMap::new();

    for recording_id in &job.recording_ids {
        match process_one(db_pool, chunk_store, temp_root, &job.room_id, recording_id).await {
            Ok(output) => {
                outputs.insert(recording_id.clone(), output);
            }
            Err(e) => {
                tracing::error!(
                    recording_id = %recording_id,
                    room_id = %job.room_id,
                    "audio extraction failed: {}",
                    e
                );
                let _ = db::update_processing_state(
                    db_pool,
                    recording_id,
                    "failed",
                    Some(&e.to_string()),
                    None,
                    None,
                )
                .await;
            }
        }
    }

    Ok(ExtractionResult {
        outputs,
        processing_duration_ms: started.elapsed().as_millis() as u64,
    })
}

async fn process_one(
    db_pool: &SqlitePool,
    chunk_store: &dyn ChunkStore,
    temp_root: &Path,
    room_id: &str,
    recording_id: &str,
) -> Result<RecordingOutput> {
    db::update_processing_state(db_pool, recording_id, "processing", None, None, None).await?;

    let init = chunk_store
        .get_init(recording_id, Some(room_id))
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("init segment missing for recording {}", recording_id))
        })?;

    let ids = chunk_store.list_chunk_ids(recording_id, Some(room_id)).await?;
    if ids.is_empty() {
        return Err(AppError::NotFound(format!(
            "no chunks found for recording {}",
            recording_id
        )));
    }

    let downloaded: Vec<(u64, Vec<u8>)> = stream::iter(ids)
        .map(|id| async move {
            let bytes = chunk_store.get_chunk(recording_id, Some(room_id), id).await?;
            Ok::<_, AppError>((id, bytes.unwrap_or_default()))
        })
        .buffer_unordered(DOWNLOAD_CONCURRENCY)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let mut ordered = downloaded;
    ordered.sort_by_key(|(id, _)| *id);

    let work_dir = temp_root.join(format!("extract-{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&work_dir)
        .await
        .map_err(|e| AppError::Internal(format!("failed to create temp dir: {}", e)))?;

    let outcome = transcode_and_upload(&work_dir, init, &ordered, recording_id, room_id, chunk_store).await;

    let _ = tokio::fs::remove_dir_all(&work_dir).await;
    let output = outcome?;

    db::update_processing_state(
        db_pool,
        recording_id,
        "completed",
        None,
        Some(&output.mp4_key),
        Some(&output.m4a_key),
    )
    .await?;

    Ok(output)
}

async fn transcode_and_upload(
    work_dir: &Path,
    init: Vec<u8>,
    chunks: &[(u64, Vec<u8>)],
    recording_id: &str,
    room_id: &str,
    chunk_store: &dyn ChunkStore,
) -> Result<RecordingOutput> {
    let mut mp4_bytes = init;
    for (_, chunk) in chunks {
        mp4_bytes.extend_from_slice(chunk);
    }

    let mp4_path: PathBuf = work_dir.join("combined.mp4");
    tokio::fs::write(&mp4_path, &mp4_bytes)
        .await
        .map_err(|e| AppError::Internal(format!("failed to write combined mp4: {}", e)))?;

    let m4a_path = work_dir.join("audio.m4a");
    run_ffmpeg_extract_audio(&mp4_path, &m4a_path).await?;

    let m4a_bytes = tokio::fs::read(&m4a_path)
        .await
        .map_err(|e| AppError::Internal(format!("failed to read extracted audio: {}", e)))?;

    let mp4_key = storage::output_key(recording_id, room_id, "output.mp4");
    let m4a_key = storage::output_key(recording_id, room_id, "audio.m4a");
    let mp4_size = mp4_bytes.len() as u64;
    let m4a_size = m4a_bytes.len() as u64;

    chunk_store.put_output(&mp4_key, mp4_bytes, "video/mp4").await?;
    chunk_store.put_output(&m4a_key, m4a_bytes, "audio/mp4").await?;

    Ok(RecordingOutput {
        mp4_key,
        m4a_key,
        mp4_size,
        m4a_size,
    })
}

async fn run_ffmpeg_extract_audio(input: &Path, output: &Path) -> Result<()> {
    let command_fut = Command::new("ffmpeg")
        .args([
            "-i",
            input.to_str().unwrap(),
            "-vn",
            "-acodec",
            "copy",
            "-y",
            output.to_str().unwrap(),
        ])
        .output();

    let result = tokio::time::timeout(TRANSCODE_TIMEOUT, command_fut)
        .await
        .map_err(|_| AppError::Internal("ffmpeg timed out after 5 minutes".to_string()))?
        .map_err(|e| AppError::Internal(format!("failed to run ffmpeg (is it installed?): {}", e)))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(AppError::Internal(format!(
            "audio extraction failed: {}",
            stderr.lines().last().unwrap_or("unknown error")
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_result_serializes_with_recording_id_keys() {
        let mut outputs = HashMap::new();
        outputs.insert(
            "rec-a".to_string(),
            RecordingOutput {
                mp4_key: "rooms/R1/rec-a/output.mp4".to_string(),
                m4a_key: "rooms/R1/rec-a/audio.m4a".to_string(),
                mp4_size: 100,
                m4a_size: 20,
            },
        );
        let result = ExtractionResult {
            outputs,
            processing_duration_ms: 42,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json["outputs"]["rec-a"]["mp4_key"],
            "rooms/R1/rec-a/output.mp4"
        );
    }
}
