use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Idle,
    Recording,
    Finalizing,
    Finished,
}

impl RoomState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomState::Idle => "idle",
            RoomState::Recording => "recording",
            RoomState::Finalizing => "finalizing",
            RoomState::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "recording" => Some(Self::Recording),
            "finalizing" => Some(Self::Finalizing),
            "finished" => Some(Self::Finished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Standby,
    Recording,
    Finalizing,
    Synced,
    Interrupted,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::Standby => "standby",
            RecordingState::Recording => "recording",
            RecordingState::Finalizing => "finalizing",
            RecordingState::Synced => "synced",
            RecordingState::Interrupted => "interrupted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standby" => Some(Self::Standby),
            "recording" => Some(Self::Recording),
            "finalizing" => Some(Self::Finalizing),
            "synced" => Some(Self::Synced),
            "interrupted" => Some(Self::Interrupted),
            _ => None,
        }
    }

    /// The terminal success state; no further mutation is allowed once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordingState::Synced)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Pending => "pending",
            ProcessingState::Processing => "processing",
            ProcessingState::Completed => "completed",
            ProcessingState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

pub type TranscriptionState = ProcessingState;

// Per-guest sync state (`SyncState`) lives in `coordinator` rather than
// here: `GuestPresence` is owned exclusively by C4 and is never persisted
// through this module's `FromRow` types (§3).

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Room {
    pub id: String,
    pub access_key: String,
    pub access_token: Option<String>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    pub fn state_enum(&self) -> RoomState {
        RoomState::parse(&self.state).unwrap_or(RoomState::Idle)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Recording {
    pub id: String,
    pub room_id: Option<String>,
    pub state: String,
    pub metadata: Option<String>,
    pub chunk_count: i64,
    pub total_size: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub processing_state: String,
    pub processing_error: Option<String>,
    pub output_mp4_key: Option<String>,
    pub output_m4a_key: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub transcription_state: String,
    pub transcription_error: Option<String>,
    pub output_vtt_key: Option<String>,
    pub transcribed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recording {
    pub fn state_enum(&self) -> RecordingState {
        RecordingState::parse(&self.state).unwrap_or(RecordingState::Standby)
    }

    pub fn processing_state_enum(&self) -> ProcessingState {
        ProcessingState::parse(&self.processing_state)
    }

    pub fn transcription_state_enum(&self) -> TranscriptionState {
        ProcessingState::parse(&self.transcription_state)
    }

    pub fn metadata_json(&self) -> Option<serde_json::Value> {
        self.metadata
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }
}

/// Device/codec/participant info attached to a recording; free-form beyond
/// the fields the coordinator itself reads (participant name).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecordingMetadata {
    pub display_name: Option<String>,
    pub participant_name: Option<String>,
    pub device_info: Option<serde_json::Value>,
    pub codec_info: Option<serde_json::Value>,
    pub clock_sync: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
