//! Chunk Store (C1) — two interchangeable backends behind one contract (§4.2).

mod local;
mod s3;

pub use local::LocalChunkStore;
pub use s3::S3ChunkStore;

use async_trait::async_trait;

use crate::Result;

/// One chunk identifier: the init segment, or a numbered media segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChunkKind {
    Init,
    Index(u64),
}

/// A presigned URL plus the chunk it belongs to (ordering matters for
/// assembly).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedChunk {
    pub chunk_id: Option<u64>,
    pub url: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DownloadUrls {
    pub direct_download: bool,
    pub init_segment: Option<PresignedChunk>,
    pub chunks: Vec<PresignedChunk>,
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrl {
    pub direct_upload: bool,
    pub url: Option<String>,
    pub expires_in: Option<u64>,
}

/// Key layout is bit-exact across backends (§4.2, tested in `key_layout`).
pub fn object_key(recording_id: &str, room_id: Option<&str>, kind: ChunkKind) -> String {
    let file_name = match kind {
        ChunkKind::Init => "init.fmp4".to_string(),
        ChunkKind::Index(n) => format!("{}.fmp4", n),
    };
    match room_id {
        Some(room_id) => format!("rooms/{}/{}/{}", room_id, recording_id, file_name),
        None => format!("{}/{}", recording_id, file_name),
    }
}

pub fn prefix(recording_id: &str, room_id: Option<&str>) -> String {
    match room_id {
        Some(room_id) => format!("rooms/{}/{}/", room_id, recording_id),
        None => format!("{}/", recording_id),
    }
}

pub fn output_key(recording_id: &str, room_id: &str, file: &str) -> String {
    format!("rooms/{}/{}/{}", room_id, recording_id, file)
}

/// Extracts the numeric chunk id from an object-store key's final path
/// segment, excluding `init.fmp4` and anything not matching `<N>.fmp4`.
/// Shared by both backends so listing order/exclusion rules stay bit-exact.
pub fn parse_chunk_file_name(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(".fmp4")?;
    if stem == "init" {
        return None;
    }
    stem.parse::<u64>().ok()
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn save_init(&self, recording_id: &str, room_id: Option<&str>, bytes: Vec<u8>) -> Result<()>;

    async fn save_chunk(
        &self,
        recording_id: &str,
        room_id: Option<&str>,
        index: u64,
        bytes: Vec<u8>,
    ) -> Result<()>;

    async fn get_init(&self, recording_id: &str, room_id: Option<&str>) -> Result<Option<Vec<u8>>>;

    async fn get_chunk(
        &self,
        recording_id: &str,
        room_id: Option<&str>,
        index: u64,
    ) -> Result<Option<Vec<u8>>>;

    /// Ascending, distinct, numeric chunk ids only (§8 listing order invariant).
    async fn list_chunk_ids(&self, recording_id: &str, room_id: Option<&str>) -> Result<Vec<u64>>;

    async fn delete_all(&self, recording_id: &str, room_id: Option<&str>) -> Result<u64>;

    /// `None` means the backend doesn't support presigned URLs (local
    /// filesystem) and the caller must fall back to the proxy path.
    async fn issue_download_urls(
        &self,
        recording_id: &str,
        room_id: Option<&str>,
        ttl_secs: u64,
    ) -> Result<DownloadUrls>;

    async fn issue_upload_url(
        &self,
        recording_id: &str,
        room_id: Option<&str>,
        kind: ChunkKind,
        ttl_secs: u64,
    ) -> Result<UploadUrl>;

    /// Upload an already-produced output object (extraction/transcription
    /// results) under its deterministic key.
    async fn put_output(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    async fn presign_get(&self, key: &str, ttl_secs: u64) -> Result<Option<String>>;
}

/// Assembles init + every chunk in ascending order into one contiguous
/// buffer, for the proxy-download path and for the extraction job's input.
pub async fn assemble(store: &dyn ChunkStore, recording_id: &str, room_id: Option<&str>) -> Result<Vec<u8>> {
    let mut buf = match store.get_init(recording_id, room_id).await? {
        Some(bytes) => bytes,
        None => {
            return Err(crate::AppError::NotFound(format!(
                "init segment missing for recording {}",
                recording_id
            )))
        }
    };

    let ids = store.list_chunk_ids(recording_id, room_id).await?;
    for id in ids {
        if let Some(bytes) = store.get_chunk(recording_id, room_id, id).await? {
            buf.extend_from_slice(&bytes);
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_room_scoped() {
        assert_eq!(
            object_key("rec-a", Some("R1"), ChunkKind::Init),
            "rooms/R1/rec-a/init.fmp4"
        );
        assert_eq!(
            object_key("rec-a", Some("R1"), ChunkKind::Index(3)),
            "rooms/R1/rec-a/3.fmp4"
        );
    }

    #[test]
    fn key_layout_standalone() {
        assert_eq!(object_key("rec-a", None, ChunkKind::Init), "rec-a/init.fmp4");
        assert_eq!(object_key("rec-a", None, ChunkKind::Index(0)), "rec-a/0.fmp4");
    }

    #[test]
    fn chunk_file_name_parsing_excludes_init_and_non_numeric() {
        assert_eq!(parse_chunk_file_name("init.fmp4"), None);
        assert_eq!(parse_chunk_file_name("7.fmp4"), Some(7));
        assert_eq!(parse_chunk_file_name("notanumber.fmp4"), None);
        assert_eq!(parse_chunk_file_name("manifest.json"), None);
    }
}
