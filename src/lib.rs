pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod queue;
pub mod state_machine;
pub mod storage;
pub mod vtt;

pub use config::Config;
pub use error::{AppError, Result};

use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::OnceCell;

use coordinator::RoomCoordinator;
use queue::JobQueue;
use storage::ChunkStore;

/// Everything an HTTP handler or WebSocket event needs, handed down
/// explicitly from [`build_state`] rather than resolved through a global
/// registry (§9).
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    pub chunk_store: Arc<dyn ChunkStore>,
    pub coordinator: Arc<RoomCoordinator>,
    pub job_queue: Arc<JobQueue>,
    pub started_at: Instant,
}

/// Startup-time wiring function: constructs every component in
/// C1 → C2 → C3 → C4 → C5 order and passes handles down explicitly
/// (§9, "constructor-injected dependency container").
///
/// The room coordinator's two callbacks (`recording_linked`, `all_synced`)
/// close over the already-constructed C1/C2/C3 handles directly — no
/// circularity there. The one exception is `all_synced` needing to
/// broadcast through the coordinator it is itself invoked by; that's
/// resolved with a `OnceCell` published immediately after construction,
/// which is always populated before the coordinator can receive events.
pub async fn build_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    let chunk_store: Arc<dyn ChunkStore> = match config.storage_backend() {
        config::StorageBackend::Local => {
            Arc::new(storage::LocalChunkStore::new(config.storage_path.clone()))
        }
        config::StorageBackend::S3 => Arc::new(storage::S3ChunkStore::new(&config)?),
    };

    let db = SqlitePoolOptions::new()
        .max_connections(10)
        .idle_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;
    db::run_migrations(&db).await?;

    let job_queue = Arc::new(JobQueue::connect(config.redis_url().as_deref()).await?);

    let coordinator_cell: Arc<OnceCell<Arc<RoomCoordinator>>> = Arc::new(OnceCell::new());

    let recording_linked_db = db.clone();
    let recording_linked: coordinator::RecordingLinkedCallback =
        Arc::new(move |_room_id, recording_id, name| {
            let db = recording_linked_db.clone();
            Box::pin(async move {
                if let Err(e) = apply_recording_linked(&db, &recording_id, &name).await {
                    tracing::warn!(
                        "failed to persist participant name for {}: {}",
                        recording_id,
                        e
                    );
                }
            })
        });

    let all_synced_db = db.clone();
    let all_synced_queue = job_queue.clone();
    let all_synced_cell = coordinator_cell.clone();
    let all_synced: coordinator::AllSyncedCallback = Arc::new(move |room_id| {
        let db = all_synced_db.clone();
        let job_queue = all_synced_queue.clone();
        let cell = all_synced_cell.clone();
        Box::pin(async move {
            let Some(coordinator) = cell.get() else {
                return;
            };
            if let Err(e) = finalize_room(&db, &job_queue, coordinator, &room_id).await {
                tracing::warn!("failed to finalize room {}: {}", room_id, e);
            }
        })
    });

    let coordinator = Arc::new(RoomCoordinator::new(recording_linked, all_synced));
    let _ = coordinator_cell.set(coordinator.clone());

    Ok(Arc::new(AppState {
        db,
        config,
        chunk_store,
        coordinator,
        job_queue,
        started_at: Instant::now(),
    }))
}

/// Registered as the coordinator's `recording_linked` callback (§4.4):
/// persists the participant's display name into the recording's metadata
/// blob the first time a guest binds its `recordingId`.
async fn apply_recording_linked(db: &SqlitePool, recording_id: &str, name: &str) -> Result<()> {
    let Some(recording) = db::find_recording(db, recording_id).await? else {
        return Ok(());
    };
    let mut metadata = recording
        .metadata_json()
        .unwrap_or_else(|| serde_json::json!({}));
    if let Some(obj) = metadata.as_object_mut() {
        obj.insert(
            "participant_name".to_string(),
            serde_json::Value::String(name.to_string()),
        );
    }
    db::update_recording_metadata(db, recording_id, &metadata.to_string()).await?;
    Ok(())
}

/// Advances a room from `finalizing` to `finished`, broadcasts the new
/// state, and enqueues the batch `AudioExtractionJob` (§4.1, §4.4).
/// Idempotent at the state-machine layer — a second invocation while the
/// room is no longer `finalizing` fails `advance_to_finished` harmlessly,
/// satisfying the "at most once" invariant (§8) without extra bookkeeping
/// here.
///
/// Called from two places: the coordinator's `all_synced` callback (a
/// guest completing sync while the room is still `recording`, so the
/// predicate only becomes true later) and `PATCH /rooms/:id/state`'s
/// `stop` handler (a room with zero guest-recordings, where the predicate
/// is already vacuously true the moment `finalizing` is entered).
pub(crate) async fn finalize_room(
    db: &SqlitePool,
    job_queue: &JobQueue,
    coordinator: &RoomCoordinator,
    room_id: &str,
) -> Result<()> {
    let Some(room) = db::find_room(db, room_id).await? else {
        return Ok(());
    };
    let next = state_machine::advance_to_finished(room.state_enum())?;
    db::update_room_state(db, room_id, next.as_str()).await?;

    coordinator
        .broadcast_room_state_changed(room_id, next.as_str())
        .await;

    let recording_ids = db::list_recording_ids_in_room(db, room_id).await?;
    job_queue
        .enqueue(
            queue::AUDIO_EXTRACTION_QUEUE,
            queue::AudioExtractionJob {
                room_id: room_id.to_string(),
                recording_ids,
                created_at: chrono::Utc::now(),
            },
        )
        .await?;

    Ok(())
}
