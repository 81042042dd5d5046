use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Object store backend: `fs` (local directory) or `s3`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Root directory for the `fs` backend.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Bucket name for the `s3` backend.
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Transient upload/delete failures are retried this many times.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

fn default_backend() -> String {
    "fs".to_string()
}
fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/objects")
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Generous per-upload timeout; large files over slow links are expected.
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    /// Relation type recorded for the attach-to-parent flow.
    #[serde(default = "default_relation_type")]
    pub default_relation_type: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            upload_timeout_secs: default_upload_timeout_secs(),
            default_relation_type: default_relation_type(),
        }
    }
}

fn default_upload_timeout_secs() -> u64 {
    1800
}
fn default_relation_type() -> String {
    "attached".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Delay before the forced refetch wave.
    #[serde(default = "default_invalidate_delay_ms")]
    pub invalidate_delay_ms: u64,
    /// Delay before the final defensive invalidation wave.
    #[serde(default = "default_refetch_delay_ms")]
    pub refetch_delay_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            invalidate_delay_ms: default_invalidate_delay_ms(),
            refetch_delay_ms: default_refetch_delay_ms(),
        }
    }
}

fn default_invalidate_delay_ms() -> u64 {
    120
}
fn default_refetch_delay_ms() -> u64 {
    180
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    match config.storage.backend.as_str() {
        "fs" => {}
        "s3" => {
            if config.storage.bucket.as_deref().unwrap_or("").is_empty() {
                anyhow::bail!("storage.bucket must be set when backend is 's3'");
            }
        }
        other => anyhow::bail!("Unknown storage backend: '{}'. Must be fs or s3.", other),
    }

    if config.storage.max_retries == 0 {
        anyhow::bail!("storage.max_retries must be >= 1");
    }

    if config.ingest.upload_timeout_secs == 0 {
        anyhow::bail!("ingest.upload_timeout_secs must be > 0");
    }

    Ok(config)
}
