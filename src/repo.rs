//! Document repository: CRUD and search against the SQLite store.
//!
//! All operations are plain request/response with no partial-success states.
//! Errors distinguish "not found" from "invalid input" from backend failure
//! so callers and the HTTP layer can map them to the right status.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::models::{Document, DocumentMeta, StoredFileRef};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("backend failure: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Fields accepted when creating or fully replacing a document.
#[derive(Debug, Clone)]
pub struct DocumentDraft {
    pub title: String,
    pub description: Option<String>,
    pub meta: Option<DocumentMeta>,
    pub tags: Vec<String>,
    pub category: String,
    pub author: Option<String>,
}

pub async fn create_document(pool: &SqlitePool, draft: &DocumentDraft) -> Result<Document, RepoError> {
    if draft.title.trim().is_empty() {
        return Err(RepoError::InvalidInput("title must not be empty".to_string()));
    }

    let content = serialize_meta(draft.meta.as_ref())?;
    let tags_json = serde_json::to_string(&draft.tags)
        .map_err(|e| RepoError::InvalidInput(format!("unserializable tags: {}", e)))?;
    let now = Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO documents (title, description, content, tags_json, category, author, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&draft.title)
    .bind(&draft.description)
    .bind(&content)
    .bind(&tags_json)
    .bind(&draft.category)
    .bind(&draft.author)
    .bind(now)
    .execute(pool)
    .await?;

    get_document(pool, result.last_insert_rowid()).await
}

pub async fn get_document(pool: &SqlitePool, id: i64) -> Result<Document, RepoError> {
    let row = sqlx::query(
        "SELECT id, title, description, content, tags_json, category, author, created_at FROM documents WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(row_to_document(&row)),
        None => Err(RepoError::NotFound(format!("document {}", id))),
    }
}

pub async fn list_documents(pool: &SqlitePool) -> Result<Vec<Document>, RepoError> {
    let rows = sqlx::query(
        "SELECT id, title, description, content, tags_json, category, author, created_at FROM documents ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_document).collect())
}

/// Full replacement of the mutable fields; the id and creation timestamp are
/// preserved. Field-level patches are not supported — clients resubmit the
/// whole form.
pub async fn update_document(
    pool: &SqlitePool,
    id: i64,
    draft: &DocumentDraft,
) -> Result<Document, RepoError> {
    if draft.title.trim().is_empty() {
        return Err(RepoError::InvalidInput("title must not be empty".to_string()));
    }

    let content = serialize_meta(draft.meta.as_ref())?;
    let tags_json = serde_json::to_string(&draft.tags)
        .map_err(|e| RepoError::InvalidInput(format!("unserializable tags: {}", e)))?;

    let result = sqlx::query(
        r#"
        UPDATE documents
        SET title = ?, description = ?, content = ?, tags_json = ?, category = ?, author = ?
        WHERE id = ?
        "#,
    )
    .bind(&draft.title)
    .bind(&draft.description)
    .bind(&content)
    .bind(&tags_json)
    .bind(&draft.category)
    .bind(&draft.author)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound(format!("document {}", id)));
    }

    get_document(pool, id).await
}

/// Hard delete. Relations referencing the document are removed with it.
pub async fn delete_document(pool: &SqlitePool, id: i64) -> Result<(), RepoError> {
    sqlx::query("DELETE FROM document_relations WHERE parent_document_id = ? OR child_document_id = ?")
        .bind(id)
        .bind(id)
        .execute(pool)
        .await?;

    let result = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound(format!("document {}", id)));
    }
    Ok(())
}

/// Case-insensitive keyword match over title, description, and tags, with an
/// optional category filter. The query is matched literally: `%` and `_` in
/// user input are not LIKE wildcards.
pub async fn search_documents(
    pool: &SqlitePool,
    query: &str,
    category: Option<&str>,
) -> Result<Vec<Document>, RepoError> {
    let pattern = format!("%{}%", escape_like(&query.trim().to_lowercase()));

    let rows = if let Some(cat) = category {
        sqlx::query(
            r#"
            SELECT id, title, description, content, tags_json, category, author, created_at
            FROM documents
            WHERE category = ?
              AND (LOWER(title) LIKE ? ESCAPE '\'
                   OR LOWER(COALESCE(description, '')) LIKE ? ESCAPE '\'
                   OR LOWER(tags_json) LIKE ? ESCAPE '\')
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(cat)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query(
            r#"
            SELECT id, title, description, content, tags_json, category, author, created_at
            FROM documents
            WHERE LOWER(title) LIKE ? ESCAPE '\'
               OR LOWER(COALESCE(description, '')) LIKE ? ESCAPE '\'
               OR LOWER(tags_json) LIKE ? ESCAPE '\'
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(pool)
        .await?
    };

    Ok(rows.iter().map(row_to_document).collect())
}

/// Escape the LIKE metacharacters so user input matches literally.
fn escape_like(query: &str) -> String {
    query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

// ============ Stored file records ============

/// Record a stored file in the `files` table. The record is logically
/// independent of any document that references it.
pub async fn insert_file_record(
    pool: &SqlitePool,
    stored: &StoredFileRef,
    content_hash: &str,
    category: Option<&str>,
    description: Option<&str>,
    tags: &[String],
) -> Result<i64, RepoError> {
    let tags_json = serde_json::to_string(tags)
        .map_err(|e| RepoError::InvalidInput(format!("unserializable tags: {}", e)))?;
    let now = Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO files (filename, original_name, file_path, file_size, mime_type, bucket,
                           category, description, tags_json, content_hash, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&stored.filename)
    .bind(&stored.original_name)
    .bind(&stored.file_path)
    .bind(stored.file_size)
    .bind(&stored.mime_type)
    .bind(&stored.bucket)
    .bind(category)
    .bind(description)
    .bind(&tags_json)
    .bind(content_hash)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Bump the download counter and last-accessed timestamp for a file.
pub async fn record_file_access(pool: &SqlitePool, filename: &str) -> Result<(), RepoError> {
    let now = Utc::now().timestamp();
    sqlx::query(
        "UPDATE files SET download_count = download_count + 1, last_accessed_at = ? WHERE filename = ?",
    )
    .bind(now)
    .bind(filename)
    .execute(pool)
    .await?;
    Ok(())
}

/// Remove a file record by generated filename. Returns whether a row existed.
pub async fn delete_file_record(pool: &SqlitePool, filename: &str) -> Result<bool, RepoError> {
    let result = sqlx::query("DELETE FROM files WHERE filename = ?")
        .bind(filename)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn serialize_meta(meta: Option<&DocumentMeta>) -> Result<Option<String>, RepoError> {
    match meta {
        Some(m) => serde_json::to_string(m)
            .map(Some)
            .map_err(|e| RepoError::InvalidInput(format!("unserializable metadata: {}", e))),
        None => Ok(None),
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Document {
    let content: Option<String> = row.get("content");
    let tags_json: String = row.get("tags_json");
    let created_at: i64 = row.get("created_at");

    Document {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        // Unparseable content is "no structured metadata", not an error.
        meta: content.as_deref().and_then(DocumentMeta::parse),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        category: row.get("category"),
        author: row.get("author"),
        created_at: timestamp_to_datetime(created_at),
    }
}

pub(crate) fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}
