//! Post-production worker (§4.5): pulls `AudioExtractionJob`s and
//! `TranscriptionJob`s off the job queue and runs them with bounded
//! per-queue concurrency. A separate binary from the HTTP server so it can
//! be scaled and deployed independently.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use castcoord::jobs::transcription_provider::{self, TranscriptionProvider};
use castcoord::jobs::{chain_to_transcription, extraction, transcription};
use castcoord::queue::{
    AudioExtractionJob, JobEnvelope, JobQueue, TranscriptionJob, AUDIO_EXTRACTION_QUEUE,
    DEFAULT_POLICY, TRANSCRIPTION_QUEUE,
};
use castcoord::storage::ChunkStore;
use castcoord::{config, db, storage, Config};

/// How long to sleep between empty polls of a queue.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("missing required config: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("{},worker=debug", config.log_level)),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = check_ffmpeg_available().await {
        tracing::error!("ffmpeg is required for audio extraction but is not usable: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config).await {
        tracing::error!("worker exited with error: {}", e);
        std::process::exit(1);
    }
}

async fn check_ffmpeg_available() -> anyhow::Result<()> {
    Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("failed to invoke ffmpeg: {}", e))?;
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(10)
        .idle_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;
    db::run_migrations(&db_pool).await?;

    let chunk_store: Arc<dyn ChunkStore> = match config.storage_backend() {
        config::StorageBackend::Local => Arc::new(storage::LocalChunkStore::new(config.storage_path.clone())),
        config::StorageBackend::S3 => Arc::new(storage::S3ChunkStore::new(&config)?),
    };

    let job_queue = Arc::new(JobQueue::connect(config.redis_url().as_deref()).await?);
    if !job_queue.is_enabled() {
        tracing::warn!("job queue disabled (REDIS_HOST unset); worker will idle with nothing to process");
    }

    let temp_root = PathBuf::from(&config.worker_temp_dir);
    tokio::fs::create_dir_all(&temp_root).await.ok();

    let provider: Option<Arc<dyn TranscriptionProvider>> =
        transcription_provider::from_config(&config).map(Arc::from);
    if provider.is_none() {
        tracing::warn!(
            "no transcription provider configured (DEEPGRAM_API_KEY/GEMINI_API_KEY unset); \
             transcription worker will not start"
        );
    }

    let shutting_down = Arc::new(AtomicBool::new(false));

    let extraction_task = tokio::spawn(run_extraction_loop(
        db_pool.clone(),
        chunk_store.clone(),
        job_queue.clone(),
        temp_root,
        config.worker_concurrency.max(1),
        shutting_down.clone(),
    ));

    let transcription_task = provider.map(|provider| {
        tokio::spawn(run_transcription_loop(
            db_pool.clone(),
            chunk_store.clone(),
            job_queue.clone(),
            provider,
            1,
            shutting_down.clone(),
        ))
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received, finishing in-flight jobs");
    shutting_down.store(true, Ordering::SeqCst);

    let _ = extraction_task.await;
    if let Some(task) = transcription_task {
        let _ = task.await;
    }

    db_pool.close().await;
    tracing::info!("worker shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Audio-extraction queue loop: default concurrency 2 (§4.5), polling with
/// a 2s backoff when the queue is empty.
async fn run_extraction_loop(
    db_pool: sqlx::SqlitePool,
    chunk_store: Arc<dyn ChunkStore>,
    job_queue: Arc<JobQueue>,
    temp_root: PathBuf,
    concurrency: usize,
    shutting_down: Arc<AtomicBool>,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency));

    while !shutting_down.load(Ordering::SeqCst) {
        let envelope: Option<JobEnvelope<AudioExtractionJob>> =
            match job_queue.dequeue(AUDIO_EXTRACTION_QUEUE).await {
                Ok(e) => e,
                Err(e) => {
                    tracing::error!("failed to poll audio-extraction queue: {}", e);
                    tokio::time::sleep(POLL_INTERVAL).await;
                    continue;
                }
            };

        let Some(envelope) = envelope else {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        };

        let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
        let db_pool = db_pool.clone();
        let chunk_store = chunk_store.clone();
        let job_queue = job_queue.clone();
        let temp_root = temp_root.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let job_id = envelope.id;
            match extraction::run(&db_pool, chunk_store.as_ref(), &temp_root, &envelope.payload).await {
                Ok(result) => {
                    tracing::info!(
                        job_id = %job_id,
                        room_id = %envelope.payload.room_id,
                        recordings = envelope.payload.recording_ids.len(),
                        "audio extraction batch completed"
                    );
                    if let Err(e) =
                        chain_to_transcription(&db_pool, &job_queue, &result).await
                    {
                        tracing::error!("failed to chain transcription jobs: {}", e);
                    }
                    let result_json = serde_json::to_value(&result).unwrap_or_default();
                    let _ = job_queue
                        .record_completed(AUDIO_EXTRACTION_QUEUE, job_id, result_json, DEFAULT_POLICY)
                        .await;
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, "audio extraction job failed: {}", e);
                    let _ = job_queue
                        .retry_or_fail(AUDIO_EXTRACTION_QUEUE, envelope, DEFAULT_POLICY, &e.to_string())
                        .await;
                }
            }
        });
    }
}

/// Transcription queue loop: default concurrency 1 (§4.5). Errors rethrow
/// from `transcription::run` so the queue applies backoff (§4.5, §7).
async fn run_transcription_loop(
    db_pool: sqlx::SqlitePool,
    chunk_store: Arc<dyn ChunkStore>,
    job_queue: Arc<JobQueue>,
    provider: Arc<dyn TranscriptionProvider>,
    concurrency: usize,
    shutting_down: Arc<AtomicBool>,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency));

    while !shutting_down.load(Ordering::SeqCst) {
        let envelope: Option<JobEnvelope<TranscriptionJob>> =
            match job_queue.dequeue(TRANSCRIPTION_QUEUE).await {
                Ok(e) => e,
                Err(e) => {
                    tracing::error!("failed to poll transcription queue: {}", e);
                    tokio::time::sleep(POLL_INTERVAL).await;
                    continue;
                }
            };

        let Some(envelope) = envelope else {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        };

        let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
        let db_pool = db_pool.clone();
        let chunk_store = chunk_store.clone();
        let job_queue = job_queue.clone();
        let provider = provider.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let job_id = envelope.id;
            match transcription::run(&db_pool, chunk_store.as_ref(), provider.as_ref(), &envelope.payload).await {
                Ok(vtt_key) => {
                    tracing::info!(job_id = %job_id, recording_id = %envelope.payload.recording_id, vtt_key, "transcription completed");
                    let _ = job_queue
                        .record_completed(
                            TRANSCRIPTION_QUEUE,
                            job_id,
                            serde_json::json!({ "vttKey": vtt_key }),
                            DEFAULT_POLICY,
                        )
                        .await;
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, "transcription job failed: {}", e);
                    let _ = job_queue
                        .retry_or_fail(TRANSCRIPTION_QUEUE, envelope, DEFAULT_POLICY, &e.to_string())
                        .await;
                }
            }
        });
    }
}
