//! Object storage abstraction.
//!
//! File bytes live in a bucketed object store behind the [`ObjectStore`]
//! trait so the ingestion pipeline (and its tests) can swap backends. Two
//! backends ship with the crate: a local directory store ([`FsStore`]) and an
//! S3-compatible store ([`crate::store_s3::S3Store`]).
//!
//! Buckets are selected from the file's declared MIME type (see
//! [`FileCategory::from_mime`]); unrecognized types land in the `misc`
//! bucket. Storage keys are generated from a timestamp plus a random suffix,
//! so uniqueness holds by construction — no uniqueness check is made.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use crate::config::StorageConfig;
use crate::models::{FileCategory, StoredFileRef};

/// Construct the configured backend: a local directory store by default, or
/// the S3 store when `storage.backend = "s3"`.
pub fn build_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config.backend.as_str() {
        "s3" => Ok(Arc::new(crate::store_s3::S3Store::new(config.clone())?)),
        _ => Ok(Arc::new(FsStore::new(config.root.clone()))),
    }
}

/// A file handed to the store: raw bytes plus declared identity. Bytes are
/// transmitted as-is — never re-encoded as text, which corrupts binary
/// payloads.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub original_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Object-store failure classes.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Credential or signature rejection. Cached authorization state is
    /// invalidated so the next attempt re-authenticates.
    #[error("storage auth failure: {0}")]
    Auth(String),
    /// Network-level or 5xx failure worth retrying.
    #[error("transient storage failure: {0}")]
    Transient(String),
    /// Non-retryable failure (quota, invalid request, corrupt state).
    #[error("storage failure: {0}")]
    Terminal(String),
    /// One or more uploads in a batch failed. Successful uploads are not
    /// rolled back.
    #[error("batch upload failed: {}", format_batch_failures(.0))]
    Batch(Vec<BatchFailure>),
}

/// A single failed entry within a batch upload.
#[derive(Debug)]
pub struct BatchFailure {
    pub index: usize,
    pub original_name: String,
    pub reason: String,
}

fn format_batch_failures(failures: &[BatchFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("#{} '{}': {}", f.index, f.original_name, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload one file, returning its storage reference. A single attempt;
    /// callers wanting retry semantics use [`upload_with_retry`].
    async fn upload(&self, file: &FileUpload) -> Result<StoredFileRef, StoreError>;

    /// Fetch an object's raw bytes.
    async fn fetch(&self, bucket: &str, filename: &str) -> Result<Vec<u8>, StoreError>;

    /// Best-effort removal. Returns whether the object is known to be gone.
    /// Failures are logged, not raised — a missing storage-side file is not a
    /// worse outcome than a failed delete attempt.
    async fn delete(&self, bucket: &str, filename: &str) -> bool;

    /// Invalidate any cached authorization state after an auth failure.
    /// Default: nothing cached, nothing to do.
    fn invalidate_auth(&self) {}

    /// Upload several files sequentially. If any upload fails the batch
    /// fails with the list of failures; earlier successes stay in place.
    async fn upload_many(
        &self,
        files: &[FileUpload],
    ) -> Result<Vec<StoredFileRef>, StoreError> {
        let mut refs = Vec::with_capacity(files.len());
        let mut failures = Vec::new();
        for (index, file) in files.iter().enumerate() {
            match self.upload(file).await {
                Ok(r) => refs.push(r),
                Err(e) => failures.push(BatchFailure {
                    index,
                    original_name: file.original_name.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        if failures.is_empty() {
            Ok(refs)
        } else {
            Err(StoreError::Batch(failures))
        }
    }
}

/// Upload with bounded exponential backoff on transient failures.
///
/// Auth failures invalidate the store's cached authorization and are retried
/// once more with fresh credentials; terminal failures surface immediately.
pub async fn upload_with_retry(
    store: &dyn ObjectStore,
    file: &FileUpload,
    max_attempts: u32,
    base_delay_ms: u64,
) -> Result<StoredFileRef, StoreError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match store.upload(file).await {
            Ok(r) => return Ok(r),
            Err(StoreError::Transient(msg)) if attempt < max_attempts => {
                let delay = base_delay_ms * 2u64.pow(attempt - 1);
                tracing::debug!(
                    "transient upload failure (attempt {}/{}): {}; retrying in {}ms",
                    attempt,
                    max_attempts,
                    msg,
                    delay
                );
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
            Err(StoreError::Auth(msg)) if attempt < max_attempts => {
                tracing::warn!("storage auth failure, re-authenticating: {}", msg);
                store.invalidate_auth();
            }
            Err(e) => return Err(e),
        }
    }
}

/// Generate a collision-resistant storage key: millisecond timestamp, short
/// random token, then the sanitized original name.
pub fn generate_storage_key(original_name: &str) -> String {
    let stamp = Utc::now().timestamp_millis();
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", stamp, &token[..8], sanitize_filename(original_name))
}

/// Detect a MIME type from a file extension. Used by the CLI, where no
/// declared content type accompanies the file.
pub fn detect_mime(name: &str) -> String {
    match name.rsplit('.').next().map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Keep ASCII alphanumerics, dots, dashes, and underscores; everything else
/// becomes a dash. Lowercased for predictable keys across backends.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Local filesystem backend
// ═══════════════════════════════════════════════════════════════════════

/// Object store backed by a local directory tree: `<root>/<bucket>/<key>`.
pub struct FsStore {
    root: std::path::PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn upload(&self, file: &FileUpload) -> Result<StoredFileRef, StoreError> {
        let bucket = FileCategory::from_mime(&file.mime_type).bucket();
        let key = generate_storage_key(&file.original_name);

        let dir = self.root.join(bucket);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Terminal(format!("create bucket dir: {}", e)))?;

        let path = dir.join(&key);
        tokio::fs::write(&path, &file.bytes)
            .await
            .map_err(|e| StoreError::Transient(format!("write object: {}", e)))?;

        Ok(StoredFileRef {
            filename: key,
            original_name: file.original_name.clone(),
            bucket: bucket.to_string(),
            file_path: path.display().to_string(),
            file_size: file.bytes.len() as i64,
            mime_type: file.mime_type.clone(),
        })
    }

    async fn fetch(&self, bucket: &str, filename: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.root.join(bucket).join(filename);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::Terminal(
                format!("object {}/{} not found", bucket, filename),
            )),
            Err(e) => Err(StoreError::Transient(format!("read object: {}", e))),
        }
    }

    async fn delete(&self, bucket: &str, filename: &str) -> bool {
        let path = self.root.join(bucket).join(filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Already gone; treat as success.
                true
            }
            Err(e) => {
                tracing::warn!("failed to delete object {}/{}: {}", bucket, filename, e);
                false
            }
        }
    }
}
