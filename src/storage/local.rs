use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{parse_chunk_file_name, ChunkKind, ChunkStore, DownloadUrls, UploadUrl};
use crate::{AppError, Result};

/// Filesystem-backed chunk store. Mirrors the object-store key layout as a
/// nested directory tree rooted at `root`.
pub struct LocalChunkStore {
    root: PathBuf,
}

impl LocalChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir_for(&self, recording_id: &str, room_id: Option<&str>) -> PathBuf {
        match room_id {
            Some(room_id) => self.root.join("rooms").join(room_id).join(recording_id),
            None => self.root.join(recording_id),
        }
    }

    fn file_for(&self, recording_id: &str, room_id: Option<&str>, kind: ChunkKind) -> PathBuf {
        let file_name = match kind {
            ChunkKind::Init => "init.fmp4".to_string(),
            ChunkKind::Index(n) => format!("{}.fmp4", n),
        };
        self.dir_for(recording_id, room_id).join(file_name)
    }

    async fn write(&self, path: &Path, bytes: Vec<u8>) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Storage(format!("failed to create directory: {}", e)))?;
        }
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| AppError::Storage(format!("failed to write {}: {}", path.display(), e)))
    }

    async fn read_opt(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Storage(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl ChunkStore for LocalChunkStore {
    async fn save_init(&self, recording_id: &str, room_id: Option<&str>, bytes: Vec<u8>) -> Result<()> {
        let path = self.file_for(recording_id, room_id, ChunkKind::Init);
        self.write(&path, bytes).await
    }

    async fn save_chunk(
        &self,
        recording_id: &str,
        room_id: Option<&str>,
        index: u64,
        bytes: Vec<u8>,
    ) -> Result<()> {
        if bytes.is_empty() {
            return Err(AppError::ChunkInvalid("chunk payload must be non-empty".to_string()));
        }
        let path = self.file_for(recording_id, room_id, ChunkKind::Index(index));
        self.write(&path, bytes).await
    }

    async fn get_init(&self, recording_id: &str, room_id: Option<&str>) -> Result<Option<Vec<u8>>> {
        self.read_opt(&self.file_for(recording_id, room_id, ChunkKind::Init)).await
    }

    async fn get_chunk(
        &self,
        recording_id: &str,
        room_id: Option<&str>,
        index: u64,
    ) -> Result<Option<Vec<u8>>> {
        self.read_opt(&self.file_for(recording_id, room_id, ChunkKind::Index(index)))
            .await
    }

    async fn list_chunk_ids(&self, recording_id: &str, room_id: Option<&str>) -> Result<Vec<u64>> {
        let dir = self.dir_for(recording_id, room_id);
        let mut ids = Vec::new();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "failed to list {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Storage(format!("failed to read directory entry: {}", e)))?
        {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = parse_chunk_file_name(name) {
                    ids.push(id);
                }
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    async fn delete_all(&self, recording_id: &str, room_id: Option<&str>) -> Result<u64> {
        let dir = self.dir_for(recording_id, room_id);
        let mut count = 0u64;

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "failed to list {} for deletion: {}",
                    dir.display(),
                    e
                )))
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Storage(format!("failed to read directory entry: {}", e)))?
        {
            if tokio::fs::remove_file(entry.path()).await.is_ok() {
                count += 1;
            }
        }

        let _ = tokio::fs::remove_dir(&dir).await;
        Ok(count)
    }

    async fn issue_download_urls(
        &self,
        _recording_id: &str,
        _room_id: Option<&str>,
        _ttl_secs: u64,
    ) -> Result<DownloadUrls> {
        Ok(DownloadUrls {
            direct_download: false,
            init_segment: None,
            chunks: Vec::new(),
            expires_in: None,
        })
    }

    async fn issue_upload_url(
        &self,
        _recording_id: &str,
        _room_id: Option<&str>,
        _kind: ChunkKind,
        _ttl_secs: u64,
    ) -> Result<UploadUrl> {
        Ok(UploadUrl {
            direct_upload: false,
            url: None,
            expires_in: None,
        })
    }

    async fn put_output(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        self.write(&self.root.join(key), bytes).await
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.read_opt(&self.root.join(key))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("object {} not found", key)))
    }

    async fn presign_get(&self, _key: &str, _ttl_secs: u64) -> Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_then_get_round_trips_exact_bytes() {
        let dir = TempDir::new().unwrap();
        let store = LocalChunkStore::new(dir.path());

        store
            .save_init("rec-a", Some("R1"), b"init-bytes".to_vec())
            .await
            .unwrap();
        store
            .save_chunk("rec-a", Some("R1"), 0, b"chunk-0".to_vec())
            .await
            .unwrap();

        assert_eq!(
            store.get_init("rec-a", Some("R1")).await.unwrap(),
            Some(b"init-bytes".to_vec())
        );
        assert_eq!(
            store.get_chunk("rec-a", Some("R1"), 0).await.unwrap(),
            Some(b"chunk-0".to_vec())
        );
    }

    #[tokio::test]
    async fn rejects_empty_chunk() {
        let dir = TempDir::new().unwrap();
        let store = LocalChunkStore::new(dir.path());
        let result = store.save_chunk("rec-a", None, 0, Vec::new()).await;
        assert!(matches!(result, Err(AppError::ChunkInvalid(_))));
    }

    #[tokio::test]
    async fn list_chunk_ids_is_ascending_and_excludes_init() {
        let dir = TempDir::new().unwrap();
        let store = LocalChunkStore::new(dir.path());

        store.save_init("rec-a", None, b"x".to_vec()).await.unwrap();
        for n in [5u64, 0, 2, 1] {
            store
                .save_chunk("rec-a", None, n, format!("chunk-{n}").into_bytes())
                .await
                .unwrap();
        }

        let ids = store.list_chunk_ids("rec-a", None).await.unwrap();
        assert_eq!(ids, vec![0, 1, 2, 5]);
    }

    #[tokio::test]
    async fn delete_all_then_list_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = LocalChunkStore::new(dir.path());

        store.save_init("rec-a", None, b"x".to_vec()).await.unwrap();
        store.save_chunk("rec-a", None, 0, b"y".to_vec()).await.unwrap();

        let deleted = store.delete_all("rec-a", None).await.unwrap();
        assert_eq!(deleted, 2);

        let ids = store.list_chunk_ids("rec-a", None).await.unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn presigned_urls_unsupported_locally() {
        let dir = TempDir::new().unwrap();
        let store = LocalChunkStore::new(dir.path());
        let urls = store.issue_download_urls("rec-a", None, 3600).await.unwrap();
        assert!(!urls.direct_download);
        let upload = store
            .issue_upload_url("rec-a", None, ChunkKind::Init, 3600)
            .await
            .unwrap();
        assert!(!upload.direct_upload);
    }
}
