//! S3-compatible object store backend.
//!
//! Uploads and deletes objects using the S3 REST API with AWS Signature V4
//! authentication. Works against Amazon S3 or any compatible service
//! (MinIO, LocalStack) via a custom endpoint.
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for AWS signing — no
//! C library dependencies, so it builds everywhere the rest of the crate
//! does.
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! backend = "s3"
//! bucket = "city-archive"
//! region = "us-east-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! # Environment Variables
//!
//! Credentials are read from environment variables and cached per store
//! instance. An authentication failure drops the cache so the next attempt
//! re-reads them:
//! - `AWS_ACCESS_KEY_ID` — required
//! - `AWS_SECRET_ACCESS_KEY` — required
//! - `AWS_SESSION_TOKEN` — optional (temporary credentials / IAM roles)
//!
//! # Layout
//!
//! Objects are keyed `<category-bucket>/<generated-key>` inside the single
//! configured S3 bucket, mirroring the per-category directory layout of the
//! filesystem backend.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::sync::Mutex;

use crate::config::StorageConfig;
use crate::models::{FileCategory, StoredFileRef};
use crate::store::{generate_storage_key, FileUpload, ObjectStore, StoreError};

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self, StoreError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| StoreError::Auth("AWS_ACCESS_KEY_ID not set".to_string()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| StoreError::Auth("AWS_SECRET_ACCESS_KEY not set".to_string()))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Object store backed by an S3-compatible bucket.
pub struct S3Store {
    config: StorageConfig,
    bucket: String,
    client: reqwest::Client,
    creds: Mutex<Option<AwsCredentials>>,
}

impl S3Store {
    pub fn new(config: StorageConfig) -> anyhow::Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| anyhow::anyhow!("storage.bucket is required for the s3 backend"))?;
        Ok(Self {
            config,
            bucket,
            client: reqwest::Client::new(),
            creds: Mutex::new(None),
        })
    }

    fn credentials(&self) -> Result<AwsCredentials, StoreError> {
        let mut guard = self.creds.lock().expect("creds lock poisoned");
        if let Some(ref creds) = *guard {
            return Ok(creds.clone());
        }
        let fresh = AwsCredentials::from_env()?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    fn host(&self) -> String {
        if let Some(ref endpoint) = self.config.endpoint_url {
            endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string()
        } else {
            format!("{}.s3.{}.amazonaws.com", self.bucket, self.config.region)
        }
    }

    fn scheme(&self) -> &'static str {
        match self.config.endpoint_url {
            Some(ref e) if e.starts_with("http://") => "http",
            _ => "https",
        }
    }

    /// Build the SigV4 `Authorization` header plus the signed amz headers
    /// for a request with no query string.
    fn sign(
        &self,
        creds: &AwsCredentials,
        method: &str,
        canonical_uri: &str,
        payload_hash: &str,
    ) -> Vec<(String, String)> {
        let host = self.host();
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method, canonical_uri, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        );

        // Return everything the request needs, minus `host` which reqwest sets.
        let mut out = vec![("Authorization".to_string(), authorization)];
        for (k, v) in headers {
            if k != "host" {
                out.push((k, v));
            }
        }
        out
    }

    fn object_url(&self, key: &str) -> (String, String) {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let canonical_uri = format!("/{}", encoded_key);
        let url = format!("{}://{}{}", self.scheme(), self.host(), canonical_uri);
        (canonical_uri, url)
    }
}

/// Classify an HTTP status into a [`StoreError`].
fn classify_status(status: reqwest::StatusCode, context: String) -> StoreError {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        StoreError::Auth(context)
    } else if status.is_server_error() {
        StoreError::Transient(context)
    } else {
        StoreError::Terminal(context)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn upload(&self, file: &FileUpload) -> Result<StoredFileRef, StoreError> {
        let creds = self.credentials()?;

        let category_bucket = FileCategory::from_mime(&file.mime_type).bucket();
        let filename = generate_storage_key(&file.original_name);
        let key = format!("{}/{}", category_bucket, filename);

        let payload_hash = hex_sha256(&file.bytes);
        let (canonical_uri, url) = self.object_url(&key);
        let headers = self.sign(&creds, "PUT", &canonical_uri, &payload_hash);

        let mut req = self
            .client
            .put(&url)
            .header("Content-Type", &file.mime_type)
            // Raw bytes on the wire; no text re-encoding.
            .body(file.bytes.clone());
        for (k, v) in &headers {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| StoreError::Transient(format!("PUT s3://{}/{}: {}", self.bucket, key, e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(
                status,
                format!(
                    "S3 PutObject failed (HTTP {}) for '{}': {}",
                    status,
                    key,
                    body.chars().take(300).collect::<String>()
                ),
            ));
        }

        Ok(StoredFileRef {
            filename,
            original_name: file.original_name.clone(),
            bucket: category_bucket.to_string(),
            file_path: format!("s3://{}/{}", self.bucket, key),
            file_size: file.bytes.len() as i64,
            mime_type: file.mime_type.clone(),
        })
    }

    async fn fetch(&self, bucket: &str, filename: &str) -> Result<Vec<u8>, StoreError> {
        let creds = self.credentials()?;
        let key = format!("{}/{}", bucket, filename);

        let payload_hash = hex_sha256(b"");
        let (canonical_uri, url) = self.object_url(&key);
        let headers = self.sign(&creds, "GET", &canonical_uri, &payload_hash);

        let mut req = self.client.get(&url);
        for (k, v) in &headers {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| StoreError::Transient(format!("GET s3://{}/{}: {}", self.bucket, key, e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(classify_status(
                status,
                format!("S3 GetObject failed (HTTP {}) for '{}'", status, key),
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StoreError::Transient(format!("read body for '{}': {}", key, e)))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, bucket: &str, filename: &str) -> bool {
        let key = format!("{}/{}", bucket, filename);

        let creds = match self.credentials() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("cannot delete s3://{}/{}: {}", self.bucket, key, e);
                return false;
            }
        };

        let payload_hash = hex_sha256(b"");
        let (canonical_uri, url) = self.object_url(&key);
        let headers = self.sign(&creds, "DELETE", &canonical_uri, &payload_hash);

        let mut req = self.client.delete(&url);
        for (k, v) in &headers {
            req = req.header(k, v);
        }

        match req.send().await {
            // S3 returns 204 for deletes, including of nonexistent keys.
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => true,
            Ok(resp) => {
                tracing::warn!(
                    "S3 DeleteObject failed (HTTP {}) for '{}'",
                    resp.status(),
                    key
                );
                false
            }
            Err(e) => {
                tracing::warn!("S3 DeleteObject request error for '{}': {}", key, e);
                false
            }
        }
    }

    fn invalidate_auth(&self) {
        *self.creds.lock().expect("creds lock poisoned") = None;
    }
}

// ============ AWS SigV4 Helpers ============

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute hex-encoded HMAC-SHA256.
fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986 (used in SigV4 canonical requests).
///
/// Encodes all characters except unreserved characters:
/// `A-Z a-z 0-9 - _ . ~`
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
