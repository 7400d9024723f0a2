use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::{Recording, Room};
use crate::{AppError, Result};

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rooms (
            id TEXT PRIMARY KEY,
            access_key TEXT NOT NULL,
            access_token TEXT,
            state TEXT NOT NULL DEFAULT 'idle',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recordings (
            id TEXT PRIMARY KEY,
            room_id TEXT,
            state TEXT NOT NULL DEFAULT 'standby',
            metadata TEXT,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            total_size INTEGER NOT NULL DEFAULT 0,
            start_time TEXT,
            end_time TEXT,
            processing_state TEXT NOT NULL DEFAULT 'pending',
            processing_error TEXT,
            output_mp4_key TEXT,
            output_m4a_key TEXT,
            processed_at TEXT,
            transcription_state TEXT NOT NULL DEFAULT 'pending',
            transcription_error TEXT,
            output_vtt_key TEXT,
            transcribed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS room_recordings (
            room_id TEXT NOT NULL,
            recording_id TEXT NOT NULL,
            PRIMARY KEY (room_id, recording_id),
            FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE,
            FOREIGN KEY (recording_id) REFERENCES recordings(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_recordings_room_id ON recordings(room_id)")
        .execute(pool)
        .await?;

    tracing::info!("metadata store migrations completed");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────
// Rooms
// ─────────────────────────────────────────────────────────────────────────

pub async fn upsert_room(
    pool: &SqlitePool,
    id: &str,
    access_key: &str,
    access_token: Option<&str>,
) -> Result<Room> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO rooms (id, access_key, access_token, state, created_at, updated_at)
        VALUES (?, ?, ?, 'idle', ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            access_key = excluded.access_key,
            access_token = excluded.access_token,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(id)
    .bind(access_key)
    .bind(access_token)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    find_room(pool, id)
        .await?
        .ok_or_else(|| AppError::Internal("room vanished after upsert".to_string()))
}

pub async fn find_room(pool: &SqlitePool, id: &str) -> Result<Option<Room>> {
    let room = sqlx::query_as::<_, Room>("SELECT * FROM rooms WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(room)
}

pub async fn find_room_by_token(pool: &SqlitePool, token: &str) -> Result<Option<Room>> {
    let room = sqlx::query_as::<_, Room>("SELECT * FROM rooms WHERE access_token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await?;
    Ok(room)
}

pub async fn list_rooms(pool: &SqlitePool) -> Result<Vec<Room>> {
    let rooms = sqlx::query_as::<_, Room>("SELECT * FROM rooms ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;
    Ok(rooms)
}

/// Fails if the room doesn't exist, per §4.3's "fails-if-missing" contract.
pub async fn update_room_state(pool: &SqlitePool, id: &str, state: &str) -> Result<Room> {
    let now = Utc::now();
    let result = sqlx::query("UPDATE rooms SET state = ?, updated_at = ? WHERE id = ?")
        .bind(state)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("room {} not found", id)));
    }

    find_room(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("room {} not found", id)))
}

/// Clears `recordingIds` on the `finished → idle` loop-back (§3) by
/// dropping membership rows; the recordings themselves are untouched.
pub async fn clear_room_recordings(pool: &SqlitePool, room_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM room_recordings WHERE room_id = ?")
        .bind(room_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn add_recording_to_room(pool: &SqlitePool, room_id: &str, recording_id: &str) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO room_recordings (room_id, recording_id) VALUES (?, ?)",
    )
    .bind(room_id)
    .bind(recording_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove_recording_from_room(
    pool: &SqlitePool,
    room_id: &str,
    recording_id: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM room_recordings WHERE room_id = ? AND recording_id = ?")
        .bind(room_id)
        .bind(recording_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_recording_ids_in_room(pool: &SqlitePool, room_id: &str) -> Result<Vec<String>> {
    let ids: Vec<(String,)> =
        sqlx::query_as("SELECT recording_id FROM room_recordings WHERE room_id = ?")
            .bind(room_id)
            .fetch_all(pool)
            .await?;
    Ok(ids.into_iter().map(|(id,)| id).collect())
}

/// Deletes the room and its `room_recordings` membership rows (§3:
/// "cascade-deletes membership links but not the underlying recordings").
/// Done as an explicit statement rather than relying on the schema's
/// `ON DELETE CASCADE`, since sqlite only honors foreign keys on
/// connections that have `PRAGMA foreign_keys = ON`, which a pooled
/// connection can't guarantee for every borrower.
pub async fn delete_room(pool: &SqlitePool, id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query("DELETE FROM rooms WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("room {} not found", id)));
    }

    sqlx::query("DELETE FROM room_recordings WHERE room_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────
// Recordings
// ─────────────────────────────────────────────────────────────────────────

pub async fn upsert_recording(
    pool: &SqlitePool,
    id: &str,
    room_id: Option<&str>,
) -> Result<Recording> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO recordings (id, room_id, state, start_time, created_at, updated_at)
        VALUES (?, ?, 'standby', ?, ?, ?)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(room_id)
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    find_recording(pool, id)
        .await?
        .ok_or_else(|| AppError::Internal("recording vanished after upsert".to_string()))
}

pub async fn find_recording(pool: &SqlitePool, id: &str) -> Result<Option<Recording>> {
    let recording = sqlx::query_as::<_, Recording>("SELECT * FROM recordings WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(recording)
}

pub async fn list_recordings_in_room(pool: &SqlitePool, room_id: &str) -> Result<Vec<Recording>> {
    let recordings = sqlx::query_as::<_, Recording>(
        r#"
        SELECT r.* FROM recordings r
        INNER JOIN room_recordings rr ON r.id = rr.recording_id
        WHERE rr.room_id = ?
        ORDER BY r.created_at ASC
        "#,
    )
    .bind(room_id)
    .fetch_all(pool)
    .await?;
    Ok(recordings)
}

pub async fn update_recording_state(pool: &SqlitePool, id: &str, state: &str) -> Result<Recording> {
    let now = Utc::now();
    let end_time = if state == "synced" { Some(now) } else { None };

    let result = sqlx::query(
        "UPDATE recordings SET state = ?, end_time = COALESCE(?, end_time), updated_at = ? WHERE id = ?",
    )
    .bind(state)
    .bind(end_time)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("recording {} not found", id)));
    }

    find_recording(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("recording {} not found", id)))
}

pub async fn update_recording_metadata(
    pool: &SqlitePool,
    id: &str,
    metadata_json: &str,
) -> Result<Recording> {
    let now = Utc::now();
    let result = sqlx::query("UPDATE recordings SET metadata = ?, updated_at = ? WHERE id = ?")
        .bind(metadata_json)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("recording {} not found", id)));
    }

    find_recording(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("recording {} not found", id)))
}

/// Monotonically increases `chunk_count`; fails if the recording is missing.
pub async fn increment_chunk_count(
    pool: &SqlitePool,
    id: &str,
    by_bytes: i64,
) -> Result<Recording> {
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE recordings SET chunk_count = chunk_count + 1, total_size = total_size + ?, updated_at = ? WHERE id = ?",
    )
    .bind(by_bytes)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("recording {} not found", id)));
    }

    find_recording(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("recording {} not found", id)))
}

pub async fn update_processing_state(
    pool: &SqlitePool,
    id: &str,
    state: &str,
    error: Option<&str>,
    mp4_key: Option<&str>,
    m4a_key: Option<&str>,
) -> Result<Recording> {
    let now = Utc::now();
    let processed_at = if state == "completed" || state == "failed" {
        Some(now)
    } else {
        None
    };

    let result = sqlx::query(
        r#"
        UPDATE recordings SET
            processing_state = ?,
            processing_error = ?,
            output_mp4_key = COALESCE(?, output_mp4_key),
            output_m4a_key = COALESCE(?, output_m4a_key),
            processed_at = COALESCE(?, processed_at),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(state)
    .bind(error)
    .bind(mp4_key)
    .bind(m4a_key)
    .bind(processed_at)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("recording {} not found", id)));
    }

    find_recording(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("recording {} not found", id)))
}

pub async fn update_transcription_state(
    pool: &SqlitePool,
    id: &str,
    state: &str,
    error: Option<&str>,
    vtt_key: Option<&str>,
) -> Result<Recording> {
    let now = Utc::now();
    let transcribed_at = if state == "completed" || state == "failed" {
        Some(now)
    } else {
        None
    };

    let result = sqlx::query(
        r#"
        UPDATE recordings SET
            transcription_state = ?,
            transcription_error = ?,
            output_vtt_key = COALESCE(?, output_vtt_key),
            transcribed_at = COALESCE(?, transcribed_at),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(state)
    .bind(error)
    .bind(vtt_key)
    .bind(transcribed_at)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("recording {} not found", id)));
    }

    find_recording(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("recording {} not found", id)))
}
