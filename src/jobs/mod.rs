//! Worker-side job handlers (§4.5). `extraction` and `transcription` are
//! the two queue handlers; [`chain_to_transcription`] is the "external
//! subscriber" the spec describes watching the extraction queue's
//! completed event — implemented inline in the worker loop rather than as
//! a separate process, since this crate ships one worker binary.

pub mod extraction;
pub mod transcription;
pub mod transcription_provider;

use sqlx::SqlitePool;

use crate::queue::{JobQueue, TranscriptionJob, TRANSCRIPTION_QUEUE};
use crate::{db, Result};

/// For every recording in an extraction result that produced a non-empty
/// `m4aKey`, marks `transcriptionState = pending` and enqueues a
/// `TranscriptionJob`. Recordings whose `roomId` can't be resolved from C2
/// are skipped (§4.5).
pub async fn chain_to_transcription(
    db_pool: &SqlitePool,
    queue: &JobQueue,
    result: &extraction::ExtractionResult,
) -> Result<()> {
    for (recording_id, output) in &result.outputs {
        if output.m4a_key.is_empty() {
            continue;
        }

        let Some(recording) = db::find_recording(db_pool, recording_id).await? else {
            tracing::warn!(recording_id, "recording vanished before transcription chaining, skipping");
            continue;
        };
        let Some(room_id) = recording.room_id else {
            tracing::warn!(recording_id, "recording has no room_id, skipping transcription chaining");
            continue;
        };

        db::update_transcription_state(db_pool, recording_id, "pending", None, None).await?;

        queue
            .enqueue(
                TRANSCRIPTION_QUEUE,
                TranscriptionJob {
                    room_id,
                    recording_id: recording_id.clone(),
                    m4a_key: output.m4a_key.clone(),
                    created_at: chrono::Utc::now(),
                },
            )
            .await?;
    }
    Ok(())
}
