use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use std::time::Duration;

use super::{object_key, prefix, ChunkKind, ChunkStore, DownloadUrls, PresignedChunk, UploadUrl};
use crate::config::Config;
use crate::{AppError, Result};

/// S3-compatible object store backend (works against AWS S3 and any
/// S3-compatible service reachable via a custom endpoint, e.g. MinIO or R2).
pub struct S3ChunkStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ChunkStore {
    pub fn new(config: &Config) -> Result<Self> {
        let bucket = config
            .s3_bucket
            .clone()
            .ok_or_else(|| AppError::Internal("S3_BUCKET is required for the s3 storage backend".to_string()))?;
        let access_key_id = config
            .s3_access_key_id
            .clone()
            .ok_or_else(|| AppError::Internal("S3_ACCESS_KEY_ID is required for the s3 storage backend".to_string()))?;
        let secret_access_key = config.s3_secret_access_key.clone().ok_or_else(|| {
            AppError::Internal("S3_SECRET_ACCESS_KEY is required for the s3 storage backend".to_string())
        })?;
        let region = config.s3_region.clone().unwrap_or_else(|| "auto".to_string());

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                &access_key_id,
                &secret_access_key,
                None,
                None,
                "castcoord",
            ))
            .region(aws_sdk_s3::config::Region::new(region))
            .force_path_style(config.s3_force_path_style);

        if let Some(endpoint) = &config.s3_endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = aws_sdk_s3::Client::from_conf(builder.build());

        Ok(Self { client, bucket })
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("failed to upload {}: {}", key, e)))?;
        Ok(())
    }

    async fn get_opt(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(response) => {
                let data = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| AppError::Storage(format!("failed to read {}: {}", key, e)))?
                    .into_bytes()
                    .to_vec();
                Ok(Some(data))
            }
            Err(e) => {
                let service_err = e.as_service_error();
                if service_err.map(|e| e.is_no_such_key()).unwrap_or(false) {
                    Ok(None)
                } else {
                    Err(AppError::Storage(format!("failed to fetch {}: {}", key, e)))
                }
            }
        }
    }

    async fn presign(&self, key: &str, ttl_secs: u64) -> Result<String> {
        let presigning_config = PresigningConfig::builder()
            .expires_in(Duration::from_secs(ttl_secs))
            .build()
            .map_err(|e| AppError::Storage(format!("failed to build presigning config: {}", e)))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| AppError::Storage(format!("failed to presign GET for {}: {}", key, e)))?;

        Ok(presigned.uri().to_string())
    }

    async fn presign_put(&self, key: &str, ttl_secs: u64) -> Result<String> {
        let presigning_config = PresigningConfig::builder()
            .expires_in(Duration::from_secs(ttl_secs))
            .build()
            .map_err(|e| AppError::Storage(format!("failed to build presigning config: {}", e)))?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| AppError::Storage(format!("failed to presign PUT for {}: {}", key, e)))?;

        Ok(presigned.uri().to_string())
    }
}

#[async_trait]
impl ChunkStore for S3ChunkStore {
    async fn save_init(&self, recording_id: &str, room_id: Option<&str>, bytes: Vec<u8>) -> Result<()> {
        let key = object_key(recording_id, room_id, ChunkKind::Init);
        self.put(&key, bytes, "video/mp4").await
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
        let key = object_key(recording_id, room_id, ChunkKind::Index(index));
        self.put(&key, bytes, "video/mp4").await
    }

    async fn get_init(&self, recording_id: &str, room_id: Option<&str>) -> Result<Option<Vec<u8>>> {
        self.get_opt(&object_key(recording_id, room_id, ChunkKind::Init)).await
    }

    async fn get_chunk(
        &self,
        recording_id: &str,
        room_id: Option<&str>,
        index: u64,
    ) -> Result<Option<Vec<u8>>> {
        self.get_opt(&object_key(recording_id, room_id, ChunkKind::Index(index)))
            .await
    }

    async fn list_chunk_ids(&self, recording_id: &str, room_id: Option<&str>) -> Result<Vec<u64>> {
        let prefix = prefix(recording_id, room_id);
        let mut ids = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut req = self.client.list_objects_v2().bucket(&self.bucket).prefix(&prefix);
            if let Some(token) = &continuation_token {
                req = req.continuation_token(token);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| AppError::Storage(format!("failed to list {}: {}", prefix, e)))?;

            for object in resp.contents() {
                if let Some(key) = object.key() {
                    if let Some(file_name) = key.rsplit('/').next() {
                        if let Some(id) = super::parse_chunk_file_name(file_name) {
                            ids.push(id);
                        }
                    }
                }
            }

            continuation_token = resp.next_continuation_token().map(|s| s.to_string());
            if continuation_token.is_none() {
                break;
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    async fn delete_all(&self, recording_id: &str, room_id: Option<&str>) -> Result<u64> {
        let prefix = prefix(recording_id, room_id);
        let mut deleted: u64 = 0;
        let mut continuation_token: Option<String> = None;

        loop {
            let mut req = self.client.list_objects_v2().bucket(&self.bucket).prefix(&prefix);
            if let Some(token) = &continuation_token {
                req = req.continuation_token(token);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| AppError::Storage(format!("failed to list {} for deletion: {}", prefix, e)))?;

            let keys: Vec<String> = resp
                .contents()
                .iter()
                .filter_map(|o| o.key().map(|k| k.to_string()))
                .collect();

            // S3's delete_objects API accepts at most 1000 keys per request.
            for chunk in keys.chunks(1000) {
                let mut objects: Vec<ObjectIdentifier> = Vec::with_capacity(chunk.len());
                for key in chunk {
                    let obj = ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|e| AppError::Storage(format!("failed to build object identifier: {}", e)))?;
                    objects.push(obj);
                }

                let delete = Delete::builder()
                    .set_objects(Some(objects))
                    .quiet(true)
                    .build()
                    .map_err(|e| AppError::Storage(format!("failed to build delete request: {}", e)))?;

                let out = self
                    .client
                    .delete_objects()
                    .bucket(&self.bucket)
                    .delete(delete)
                    .send()
                    .await
                    .map_err(|e| AppError::Storage(format!("failed to delete objects: {}", e)))?;

                deleted = deleted.saturating_add(out.deleted().len() as u64);

                let errors = out.errors();
                if !errors.is_empty() {
                    let msg = errors
                        .iter()
                        .map(|e| {
                            format!(
                                "{}: {}",
                                e.key().unwrap_or("(unknown)"),
                                e.message().unwrap_or("delete failed")
                            )
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(AppError::Storage(format!("failed to delete some objects: {}", msg)));
                }
            }

            continuation_token = resp.next_continuation_token().map(|s| s.to_string());
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(deleted)
    }

    async fn issue_download_urls(
        &self,
        recording_id: &str,
        room_id: Option<&str>,
        ttl_secs: u64,
    ) -> Result<DownloadUrls> {
        let init_key = object_key(recording_id, room_id, ChunkKind::Init);
        let init_segment = if self.get_init(recording_id, room_id).await?.is_some() {
            Some(PresignedChunk {
                chunk_id: None,
                url: self.presign(&init_key, ttl_secs).await?,
            })
        } else {
            None
        };

        let ids = self.list_chunk_ids(recording_id, room_id).await?;
        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            let key = object_key(recording_id, room_id, ChunkKind::Index(id));
            chunks.push(PresignedChunk {
                chunk_id: Some(id),
                url: self.presign(&key, ttl_secs).await?,
            });
        }

        Ok(DownloadUrls {
            direct_download: true,
            init_segment,
            chunks,
            expires_in: Some(ttl_secs),
        })
    }

    async fn issue_upload_url(
        &self,
        recording_id: &str,
        room_id: Option<&str>,
        kind: ChunkKind,
        ttl_secs: u64,
    ) -> Result<UploadUrl> {
        let key = object_key(recording_id, room_id, kind);
        let url = self.presign_put(&key, ttl_secs).await?;
        Ok(UploadUrl {
            direct_upload: true,
            url: Some(url),
            expires_in: Some(ttl_secs),
        })
    }

    async fn put_output(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.put(key, bytes, content_type).await
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.get_opt(key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("object {} not found", key)))
    }

    async fn presign_get(&self, key: &str, ttl_secs: u64) -> Result<Option<String>> {
        Ok(Some(self.presign(key, ttl_secs).await?))
    }
}
