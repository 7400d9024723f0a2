use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origin: Option<String>,

    pub database_url: String,

    #[serde(default = "default_storage_backend")]
    pub storage_backend: String,
    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    pub s3_endpoint: Option<String>,
    pub s3_region: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    #[serde(default)]
    pub s3_force_path_style: bool,

    pub redis_host: Option<String>,
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_worker_temp_dir")]
    pub worker_temp_dir: String,

    pub deepgram_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_storage_path() -> String {
    "./data/chunks".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_worker_temp_dir() -> String {
    std::env::temp_dir().to_string_lossy().into_owned()
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    S3,
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn storage_backend(&self) -> StorageBackend {
        match self.storage_backend.to_ascii_lowercase().as_str() {
            "s3" => StorageBackend::S3,
            _ => StorageBackend::Local,
        }
    }

    pub fn redis_url(&self) -> Option<String> {
        self.redis_host
            .as_ref()
            .map(|host| format!("redis://{}:{}", host, self.redis_port))
    }

    /// Transcription is started only when a provider key is configured.
    pub fn transcription_enabled(&self) -> bool {
        self.deepgram_api_key.is_some() || self.gemini_api_key.is_some()
    }

    pub fn default_presign_ttl_secs(&self) -> u64 {
        3600
    }

    /// Chunk uploads are proxied through this process on the local
    /// backend, so the body limit has to comfortably exceed one fMP4
    /// segment; 64 MiB matches the teacher's overhead-plus-margin
    /// calculation in spirit (`max_upload_size_mb + 10`).
    pub fn max_request_body_bytes(&self) -> usize {
        64 * 1024 * 1024
    }
}
