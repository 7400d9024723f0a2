//! Job Queue (C3) — durable FIFO-per-priority queues with retry/backoff
//! (§4.5). Backed by a Redis sorted set (`zadd`/`zrangebyscore`/`zrem`)
//! used as a delayed work queue: the score is a ready-at timestamp rather
//! than a join time, which gives retry backoff for free.
//!
//! `REDIS_HOST` absent means queues are disabled (§6) — jobs are silently
//! skipped rather than failing the caller, since post-production is
//! optional infrastructure (§7, "Queue-unavailable").

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, Result};

/// Per-queue policy (§4.5): three attempts, exponential backoff off a 30s
/// base, retaining a bounded trail of completed/failed records for
/// operator visibility.
#[derive(Debug, Clone, Copy)]
pub struct QueuePolicy {
    pub max_attempts: u32,
    pub backoff_base_secs: i64,
    pub retain_completed: isize,
    pub retain_failed: isize,
}

pub const AUDIO_EXTRACTION_QUEUE: &str = "audio-extraction";
pub const TRANSCRIPTION_QUEUE: &str = "transcription";

pub const DEFAULT_POLICY: QueuePolicy = QueuePolicy {
    max_attempts: 3,
    backoff_base_secs: 30,
    retain_completed: 100,
    retain_failed: 200,
};

/// An enqueued unit of work plus its retry bookkeeping. `id` doubles as the
/// sorted-set member's uniqueness key so a claim (`ZREM`) only ever removes
/// the exact job being processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope<T> {
    pub id: Uuid,
    pub payload: T,
    pub attempts: u32,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioExtractionJob {
    pub room_id: String,
    pub recording_ids: Vec<String>,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionJob {
    pub room_id: String,
    pub recording_id: String,
    pub m4a_key: String,
    pub created_at: chrono::DateTime<Utc>,
}

/// C3's concrete backend, or `Disabled` when `REDIS_HOST` is unset. Every
/// public method on `JobQueue` is a no-op success when disabled, so
/// callers never need to branch on configuration.
pub enum JobQueue {
    Redis(ConnectionManager),
    Disabled,
}

impl JobQueue {
    pub async fn connect(redis_url: Option<&str>) -> Result<Self> {
        let Some(url) = redis_url else {
            tracing::warn!("REDIS_HOST not set; job queue is disabled, post-production jobs will be skipped");
            return Ok(JobQueue::Disabled);
        };
        let client = redis::Client::open(url)
            .map_err(|e| AppError::Internal(format!("invalid redis url: {}", e)))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::Internal(format!("failed to connect to redis: {}", e)))?;
        tracing::info!(url = %url, "connected to job queue");
        Ok(JobQueue::Redis(conn))
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, JobQueue::Redis(_))
    }

    fn pending_key(queue: &str) -> String {
        format!("queue:{}:pending", queue)
    }

    fn completed_key(queue: &str) -> String {
        format!("queue:{}:completed", queue)
    }

    fn failed_key(queue: &str) -> String {
        format!("queue:{}:failed", queue)
    }

    /// Enqueues a job ready to run immediately. Silently returns `Ok(())`
    /// when the queue is disabled (§7, "Queue-unavailable") — the caller's
    /// room/recording transition has already durably committed by the
    /// time this is invoked.
    pub async fn enqueue<T: Serialize + Send + Sync>(&self, queue: &str, payload: T) -> Result<()> {
        let JobQueue::Redis(conn) = self else {
            tracing::info!(queue, "job queue disabled, skipping enqueue");
            return Ok(());
        };
        let envelope = JobEnvelope {
            id: Uuid::new_v4(),
            payload,
            attempts: 0,
            created_at: Utc::now(),
        };
        self.push(conn, queue, &envelope, Utc::now().timestamp_millis())
            .await
    }

    async fn push<T: Serialize>(
        &self,
        conn: &ConnectionManager,
        queue: &str,
        envelope: &JobEnvelope<T>,
        ready_at_ms: i64,
    ) -> Result<()> {
        let member = serde_json::to_string(envelope)
            .map_err(|e| AppError::Internal(format!("failed to encode job: {}", e)))?;
        let mut conn = conn.clone();
        conn.zadd::<_, _, _, ()>(Self::pending_key(queue), member, ready_at_ms as f64)
            .await
            .map_err(|e| AppError::Storage(format!("failed to enqueue job: {}", e)))?;
        Ok(())
    }

    /// Claims the oldest ready job, if any. Not linearizable against
    /// concurrent dequeuers of the same queue — two workers racing the
    /// same `ZRANGEBYSCORE` window could both see the same member before
    /// either issues `ZREM`; only one `ZREM` succeeds, so at most one
    /// claim wins, but a false read is possible under contention. A Lua
    /// script would close that gap; not done here since this deployment's
    /// worker counts (§4.5: 2 and 1) make the race exceedingly rare.
    pub async fn dequeue<T: DeserializeOwned + Clone>(
        &self,
        queue: &str,
    ) -> Result<Option<JobEnvelope<T>>> {
        let JobQueue::Redis(conn) = self else {
            return Ok(None);
        };
        let mut conn = conn.clone();
        let now = Utc::now().timestamp_millis();
        let candidates: Vec<String> = conn
            .zrangebyscore_limit(Self::pending_key(queue), 0, now, 0, 8)
            .await
            .map_err(|e| AppError::Storage(format!("failed to poll queue: {}", e)))?;

        for member in candidates {
            let removed: i64 = conn
                .zrem(Self::pending_key(queue), &member)
                .await
                .map_err(|e| AppError::Storage(format!("failed to claim job: {}", e)))?;
            if removed == 0 {
                continue; // another worker claimed it first
            }
            match serde_json::from_str::<JobEnvelope<T>>(&member) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(e) => {
                    tracing::error!("failed to decode job envelope, dropping: {}", e);
                    continue;
                }
            }
        }
        Ok(None)
    }

    /// Reschedules a failed job with exponential backoff, or moves it to
    /// the failed trail once attempts are exhausted (§4.5).
    pub async fn retry_or_fail<T: Serialize + Clone>(
        &self,
        queue: &str,
        mut envelope: JobEnvelope<T>,
        policy: QueuePolicy,
        error: &str,
    ) -> Result<()> {
        let JobQueue::Redis(conn) = self else {
            return Ok(());
        };
        envelope.attempts += 1;
        if envelope.attempts >= policy.max_attempts {
            tracing::error!(queue, job_id = %envelope.id, attempts = envelope.attempts, "job exhausted retries: {}", error);
            return self.record_failed(conn, queue, &envelope, error, policy).await;
        }

        let backoff_secs = policy.backoff_base_secs * (1i64 << (envelope.attempts - 1));
        let ready_at_ms = Utc::now().timestamp_millis() + backoff_secs * 1000;
        tracing::warn!(
            queue,
            job_id = %envelope.id,
            attempts = envelope.attempts,
            backoff_secs,
            "job failed, scheduling retry: {}",
            error
        );
        self.push(conn, queue, &envelope, ready_at_ms).await
    }

    async fn record_failed<T: Serialize>(
        &self,
        conn: &ConnectionManager,
        queue: &str,
        envelope: &JobEnvelope<T>,
        error: &str,
        policy: QueuePolicy,
    ) -> Result<()> {
        let record = serde_json::json!({
            "id": envelope.id,
            "attempts": envelope.attempts,
            "error": error,
            "failed_at": Utc::now(),
        });
        let mut conn = conn.clone();
        let key = Self::failed_key(queue);
        conn.lpush::<_, _, ()>(&key, record.to_string())
            .await
            .map_err(|e| AppError::Storage(format!("failed to record failed job: {}", e)))?;
        conn.ltrim::<_, ()>(&key, 0, policy.retain_failed - 1)
            .await
            .map_err(|e| AppError::Storage(format!("failed to trim failed trail: {}", e)))?;
        Ok(())
    }

    /// Records a successful completion, trimmed to the retention window.
    pub async fn record_completed(
        &self,
        queue: &str,
        job_id: Uuid,
        result: serde_json::Value,
        policy: QueuePolicy,
    ) -> Result<()> {
        let JobQueue::Redis(conn) = self else {
            return Ok(());
        };
        let record = serde_json::json!({
            "id": job_id,
            "result": result,
            "completed_at": Utc::now(),
        });
        let mut conn = conn.clone();
        let key = Self::completed_key(queue);
        conn.lpush::<_, _, ()>(&key, record.to_string())
            .await
            .map_err(|e| AppError::Storage(format!("failed to record completed job: {}", e)))?;
        conn.ltrim::<_, ()>(&key, 0, policy.retain_completed - 1)
            .await
            .map_err(|e| AppError::Storage(format!("failed to trim completed trail: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_queue_enqueue_is_a_silent_no_op() {
        let queue = JobQueue::Disabled;
        assert!(!queue.is_enabled());
        let result = queue
            .enqueue(
                AUDIO_EXTRACTION_QUEUE,
                AudioExtractionJob {
                    room_id: "R1".to_string(),
                    recording_ids: vec!["rec-a".to_string()],
                    created_at: Utc::now(),
                },
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn disabled_queue_dequeue_returns_none() {
        let queue = JobQueue::Disabled;
        let job = queue.dequeue::<AudioExtractionJob>(AUDIO_EXTRACTION_QUEUE).await.unwrap();
        assert!(job.is_none());
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = DEFAULT_POLICY;
        let first = policy.backoff_base_secs * (1i64 << (1 - 1));
        let second = policy.backoff_base_secs * (1i64 << (2 - 1));
        assert_eq!(first, 30);
        assert_eq!(second, 60);
    }
}
