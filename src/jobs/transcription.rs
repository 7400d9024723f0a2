//! Transcription job handler (§4.5). Downloads the extracted audio,
//! invokes the configured provider, renders WebVTT, and uploads the
//! result. Unlike extraction, a failure here rethrows so the queue's
//! backoff applies (§4.5, §7).

use sqlx::SqlitePool;

use super::transcription_provider::TranscriptionProvider;
use crate::queue::TranscriptionJob;
use crate::storage::{self, ChunkStore};
use crate::vtt::render_vtt;
use crate::{db, Result};

pub async fn run(
    db_pool: &SqlitePool,
    chunk_store: &dyn ChunkStore,
    provider: &dyn TranscriptionProvider,
    job: &TranscriptionJob,
) -> Result<String> {
    db::update_transcription_state(db_pool, &job.recording_id, "processing", None, None).await?;

    let outcome = transcribe_and_upload(chunk_store, provider, job).await;

    match outcome {
        Ok(vtt_key) => {
            db::update_transcription_state(
                db_pool,
                &job.recording_id,
                "completed",
                None,
                Some(&vtt_key),
            )
            .await?;
            Ok(vtt_key)
        }
        Err(e) => {
            db::update_transcription_state(
                db_pool,
                &job.recording_id,
                "failed",
                Some(&e.to_string()),
                None,
            )
            .await?;
            Err(e)
        }
    }
}

async fn transcribe_and_upload(
    chunk_store: &dyn ChunkStore,
    provider: &dyn TranscriptionProvider,
    job: &TranscriptionJob,
) -> Result<String> {
    let audio_bytes = chunk_store.get_object(&job.m4a_key).await?;
    let segments = provider.transcribe(audio_bytes).await?;
    let vtt = render_vtt(&segments);

    let vtt_key = storage::output_key(&job.recording_id, &job.room_id, "subtitle.vtt");
    chunk_store
        .put_output(&vtt_key, vtt.into_bytes(), "text/vtt")
        .await?;

    Ok(vtt_key)
}
