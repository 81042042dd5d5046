//! Core data models used throughout docshelf.
//!
//! These types represent the documents, stored files, relations, and users
//! that flow through the ingestion pipeline and the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current version of the structured metadata payload carried by a document.
///
/// Bump this when fields are added or change meaning; readers accept older
/// versions via serde defaults.
pub const META_VERSION: u32 = 1;

/// Controlled set of library categories, keyed off the uploaded file's MIME
/// type. Each category maps to its own storage bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Documents,
    Images,
    Videos,
    Audio,
    Other,
}

impl FileCategory {
    /// Map a declared MIME type to a category. Unrecognized types fall back
    /// to [`FileCategory::Other`].
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.to_ascii_lowercase();
        if mime.starts_with("image/") {
            FileCategory::Images
        } else if mime.starts_with("video/") {
            FileCategory::Videos
        } else if mime.starts_with("audio/") {
            FileCategory::Audio
        } else if mime.starts_with("application/pdf")
            || mime.starts_with("application/msword")
            || mime.starts_with("application/vnd")
            || mime.starts_with("text/")
        {
            FileCategory::Documents
        } else {
            FileCategory::Other
        }
    }

    /// Storage bucket name for this category.
    pub fn bucket(&self) -> &'static str {
        match self {
            FileCategory::Documents => "documents",
            FileCategory::Images => "images",
            FileCategory::Videos => "videos",
            FileCategory::Audio => "audio",
            FileCategory::Other => "misc",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Documents => "documents",
            FileCategory::Images => "images",
            FileCategory::Videos => "videos",
            FileCategory::Audio => "audio",
            FileCategory::Other => "other",
        }
    }
}

/// Denormalized pointer from a document's metadata to its stored file.
///
/// This duplicates fields from the `files` table on purpose: the document
/// record stays readable even if the file record is gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub original_name: String,
    pub size: i64,
    pub mime_type: String,
    /// Hex SHA-256 of the file bytes, or the hash sentinel when the digest
    /// could not be computed (see [`crate::hash`]).
    pub content_hash: String,
}

/// Structured archival metadata carried by a document.
///
/// Replaces the ad hoc serialized JSON blob of the original system with a
/// typed, versioned payload. All fields beyond `version` are optional so
/// older payloads and partial forms still deserialize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMeta {
    #[serde(default = "default_meta_version")]
    pub version: u32,
    #[serde(default)]
    pub digital_id: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub issuing_organ: Option<String>,
    #[serde(default)]
    pub responsible: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub confidentiality: Option<String>,
    #[serde(default)]
    pub legal_basis: Option<String>,
    #[serde(default)]
    pub document_date: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub file_info: Option<FileInfo>,
    /// Additional image references attached to the same document.
    #[serde(default)]
    pub extra_images: Vec<FileInfo>,
}

fn default_meta_version() -> u32 {
    META_VERSION
}

impl DocumentMeta {
    /// Parse a serialized metadata payload. Deserialization failure is "no
    /// structured metadata", never a fatal error.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// A document record as stored in the `documents` table.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    /// Structured metadata, `None` when absent or unparseable.
    pub meta: Option<DocumentMeta>,
    pub tags: Vec<String>,
    pub category: String,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Reference returned by an object store after a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct StoredFileRef {
    /// Generated collision-resistant storage key.
    pub filename: String,
    pub original_name: String,
    pub bucket: String,
    /// Full path or URL of the stored object.
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
}

/// A directed relation recording that `child_document_id` is attached to or
/// derived from `parent_document_id`.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRelation {
    pub id: i64,
    pub parent_document_id: i64,
    pub child_document_id: i64,
    pub relation_type: String,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Account role. Admins may manage other accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

/// A user account. The password is stored as a digest, never plaintext.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_digest: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_maps_to_expected_buckets() {
        assert_eq!(
            FileCategory::from_mime("application/pdf").bucket(),
            "documents"
        );
        assert_eq!(FileCategory::from_mime("image/png").bucket(), "images");
        assert_eq!(FileCategory::from_mime("video/mp4").bucket(), "videos");
        assert_eq!(FileCategory::from_mime("audio/mpeg").bucket(), "audio");
        assert_eq!(
            FileCategory::from_mime("application/x-blob").bucket(),
            "misc"
        );
    }

    #[test]
    fn meta_parse_failure_is_none() {
        assert!(DocumentMeta::parse("not json").is_none());
        assert!(DocumentMeta::parse("[1,2,3]").is_none());
    }

    #[test]
    fn meta_parse_accepts_partial_payloads() {
        let meta = DocumentMeta::parse(r#"{"document_type":"decree"}"#).unwrap();
        assert_eq!(meta.version, META_VERSION);
        assert_eq!(meta.document_type.as_deref(), Some("decree"));
        assert!(meta.file_info.is_none());
    }
}
