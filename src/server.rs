//! HTTP JSON API.
//!
//! Exposes the document library and ingestion pipeline over REST.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/documents` | List all documents (served from the query cache when fresh) |
//! | `POST` | `/documents` | Create a document from metadata only |
//! | `GET`  | `/documents/{id}` | Fetch one document |
//! | `PUT`  | `/documents/{id}` | Full replacement of a document's mutable fields |
//! | `DELETE` | `/documents/{id}` | Hard delete |
//! | `GET`  | `/documents/search?q=…&category=…` | Case-insensitive keyword search |
//! | `GET`  | `/documents/{id}/related` | Relations where the document is parent or child |
//! | `POST` | `/documents/{id}/relate` | Create a parent → child relation |
//! | `POST` | `/ingest` | Full ingestion: multipart file + metadata form (+ optional parent) |
//! | `POST` | `/files` | Raw multipart upload to the object store |
//! | `GET`  | `/files/{bucket}/{filename}` | Download an object (bumps the download counter) |
//! | `POST` | `/files/delete` | Best-effort object delete, returns `{ "success": bool }` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "title is required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `timeout` (408),
//! `upload_failed` (502), `internal` (500). Validation failures carry the
//! individual messages joined in `message`.
//!
//! File uploads are multipart form data — raw bytes on the wire. Base64-in-
//! JSON transport is deliberately not offered; it corrupts binary payloads.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::{self, QueryCache};
use crate::config::Config;
use crate::db;
use crate::ingest::{AttachTarget, IngestError, IngestPipeline, IngestRequest};
use crate::migrate;
use crate::models::{DocumentMeta, FileCategory};
use crate::relations;
use crate::repo::{self, DocumentDraft, RepoError};
use crate::store::{build_store, upload_with_retry, FileUpload, StoreError};
use crate::validate::DocumentForm;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<IngestPipeline>,
    query_cache: Arc<QueryCache>,
    storage_max_retries: u32,
    storage_retry_base_ms: u64,
}

/// Starts the HTTP server. Runs migrations first so a fresh database works
/// out of the box, then serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    let store = build_store(&config.storage)?;
    let query_cache = Arc::new(QueryCache::new());
    let coordinator = Arc::new(cache::CacheCoordinator::new(
        query_cache.clone(),
        config.cache.clone(),
    ));
    let pipeline = Arc::new(IngestPipeline::new(
        pool,
        store,
        coordinator,
        config.ingest.clone(),
        config.storage.clone(),
    ));

    let state = AppState {
        pipeline,
        query_cache,
        storage_max_retries: config.storage.max_retries,
        storage_retry_base_ms: config.storage.retry_base_ms,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/documents", get(handle_list_documents).post(handle_create_document))
        .route("/documents/search", get(handle_search_documents))
        .route(
            "/documents/{id}",
            get(handle_get_document)
                .put(handle_update_document)
                .delete(handle_delete_document),
        )
        .route("/documents/{id}/related", get(handle_list_related))
        .route("/documents/{id}/relate", post(handle_relate))
        .route("/ingest", post(handle_ingest))
        .route("/files", post(handle_upload_file))
        .route("/files/{bucket}/{filename}", get(handle_download_file))
        .route("/files/delete", post(handle_delete_file))
        .layer(cors)
        .with_state(state);

    tracing::info!("docshelf API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(msg) => not_found(msg),
            RepoError::InvalidInput(msg) => bad_request(msg),
            RepoError::Backend(e) => internal(e.to_string()),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(errors) => bad_request(errors.join("; ")),
            IngestError::Upload(e) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "upload_failed".to_string(),
                message: e.to_string(),
            },
            IngestError::UploadTimeout(secs) => AppError {
                status: StatusCode::REQUEST_TIMEOUT,
                code: "timeout".to_string(),
                message: format!("upload timed out after {} seconds", secs),
            },
            IngestError::Persistence(e) => internal(e.to_string()),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Documents ============

#[derive(Deserialize)]
struct DocumentBody {
    title: String,
    #[serde(default)]
    description: Option<String>,
    /// Serialized metadata payload. Unparseable content degrades to "no
    /// structured metadata" rather than an error.
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    author: Option<String>,
}

impl DocumentBody {
    fn into_draft(self) -> DocumentDraft {
        DocumentDraft {
            title: self.title,
            description: self.description,
            meta: self.content.as_deref().and_then(DocumentMeta::parse),
            tags: self.tags,
            category: self
                .category
                .unwrap_or_else(|| FileCategory::Documents.as_str().to_string()),
            author: self.author,
        }
    }
}

async fn handle_list_documents(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let key = cache::key_all_documents();
    if let Some(cached) = state.query_cache.get(&key).await {
        return Ok(Json(cached));
    }

    let docs = repo::list_documents(state.pipeline.pool()).await?;
    let value = serde_json::to_value(&docs).map_err(|e| internal(e.to_string()))?;
    state.query_cache.put(&key, value.clone()).await;
    Ok(Json(value))
}

async fn handle_create_document(
    State(state): State<AppState>,
    Json(body): Json<DocumentBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let draft = body.into_draft();
    let doc = repo::create_document(state.pipeline.pool(), &draft).await?;

    spawn_cache_waves(&state, vec![cache::key_all_documents(), cache::key_document_stats()]);

    let value = serde_json::to_value(&doc).map_err(|e| internal(e.to_string()))?;
    Ok((StatusCode::CREATED, Json(value)))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let doc = repo::get_document(state.pipeline.pool(), id).await?;
    Ok(Json(serde_json::to_value(&doc).map_err(|e| internal(e.to_string()))?))
}

async fn handle_update_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<DocumentBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let draft = body.into_draft();
    let doc = repo::update_document(state.pipeline.pool(), id, &draft).await?;

    spawn_cache_waves(
        &state,
        vec![
            cache::key_all_documents(),
            cache::key_document(id),
            cache::key_document_stats(),
        ],
    );

    Ok(Json(serde_json::to_value(&doc).map_err(|e| internal(e.to_string()))?))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    repo::delete_document(state.pipeline.pool(), id).await?;

    spawn_cache_waves(
        &state,
        vec![
            cache::key_all_documents(),
            cache::key_document(id),
            cache::key_related(id),
            cache::key_document_stats(),
        ],
    );

    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
    #[serde(default)]
    category: Option<String>,
}

async fn handle_search_documents(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    if params.q.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let docs =
        repo::search_documents(state.pipeline.pool(), &params.q, params.category.as_deref())
            .await?;
    Ok(Json(serde_json::to_value(&docs).map_err(|e| internal(e.to_string()))?))
}

// ============ Relations ============

#[derive(Deserialize)]
struct RelateBody {
    child_document_id: i64,
    #[serde(default)]
    relation_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    created_by: Option<String>,
}

async fn handle_relate(
    State(state): State<AppState>,
    Path(parent_id): Path<i64>,
    Json(body): Json<RelateBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let relation = relations::link(
        state.pipeline.pool(),
        parent_id,
        body.child_document_id,
        body.relation_type.as_deref().unwrap_or("attached"),
        body.description.as_deref(),
        body.created_by.as_deref(),
    )
    .await?;

    spawn_cache_waves(&state, vec![cache::key_related(parent_id)]);

    let value = serde_json::to_value(&relation).map_err(|e| internal(e.to_string()))?;
    Ok((StatusCode::CREATED, Json(value)))
}

async fn handle_list_related(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let rels = relations::list_related(state.pipeline.pool(), id).await?;
    Ok(Json(serde_json::to_value(&rels).map_err(|e| internal(e.to_string()))?))
}

// ============ Ingestion ============

#[derive(Serialize)]
struct IngestResponse {
    document: serde_json::Value,
    file: serde_json::Value,
    content_hash: String,
    relation: Option<serde_json::Value>,
    warnings: Vec<String>,
}

/// Full pipeline over multipart form data: one `file` part plus text parts
/// for the metadata form and the optional attach target.
async fn handle_ingest(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    let mut form = DocumentForm::default();
    let mut file: Option<FileUpload> = None;
    let mut parent_id: Option<i64> = None;
    let mut relation_type: Option<String> = None;
    let mut relation_description: Option<String> = None;
    let mut created_by: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let original_name = field
                    .file_name()
                    .unwrap_or("upload")
                    .to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read file part: {}", e)))?;
                file = Some(FileUpload {
                    original_name,
                    mime_type,
                    bytes: bytes.to_vec(),
                });
            }
            other => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("failed to read field '{}': {}", other, e)))?;
                match other {
                    "title" => form.title = text,
                    "description" => form.description = text,
                    "document_type" => form.document_type = text,
                    "issuing_organ" => form.issuing_organ = text,
                    "responsible" => form.responsible = text,
                    "subject" => form.subject = text,
                    "confidentiality" => form.confidentiality = Some(text),
                    "legal_basis" => form.legal_basis = Some(text),
                    "document_date" => form.document_date = Some(text),
                    "author" => form.author = Some(text),
                    "tags" => {
                        form.tags = text
                            .split(',')
                            .map(|t| t.trim().to_string())
                            .filter(|t| !t.is_empty())
                            .collect();
                    }
                    "parent_id" => {
                        parent_id = Some(text.parse().map_err(|_| {
                            bad_request(format!("parent_id '{}' is not an integer", text))
                        })?);
                    }
                    "relation_type" => relation_type = Some(text),
                    "relation_description" => relation_description = Some(text),
                    "created_by" => created_by = Some(text),
                    _ => {} // unknown fields are ignored
                }
            }
        }
    }

    let file = file.ok_or_else(|| bad_request("missing 'file' part"))?;

    let request = IngestRequest {
        form,
        file,
        attach_to: parent_id.map(|parent_id| AttachTarget {
            parent_id,
            relation_type,
            description: relation_description,
            created_by,
        }),
    };

    let outcome = state.pipeline.run(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            document: serde_json::to_value(&outcome.document)
                .map_err(|e| internal(e.to_string()))?,
            file: serde_json::to_value(&outcome.stored).map_err(|e| internal(e.to_string()))?,
            content_hash: outcome.content_hash,
            relation: outcome
                .relation
                .map(|r| serde_json::to_value(&r))
                .transpose()
                .map_err(|e| internal(e.to_string()))?,
            warnings: outcome.warnings,
        }),
    ))
}

// ============ Files ============

/// Raw object-store upload: `file` part plus optional `description` and
/// `tags` text parts. Returns the stored reference and its record id.
async fn handle_upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let mut file: Option<FileUpload> = None;
    let mut description: Option<String> = None;
    let mut tags: Vec<String> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {}", e)))?
    {
        match field.name().unwrap_or("") {
            "file" => {
                let original_name = field.file_name().unwrap_or("upload").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read file part: {}", e)))?;
                file = Some(FileUpload {
                    original_name,
                    mime_type,
                    bytes: bytes.to_vec(),
                });
            }
            "description" => {
                description = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?);
            }
            "tags" => {
                let text = field.text().await.map_err(|e| bad_request(e.to_string()))?;
                tags = text
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| bad_request("missing 'file' part"))?;

    let content_hash = crate::hash::sha256_hex(&file.bytes);
    let stored = upload_with_retry(
        state.pipeline.store(),
        &file,
        state.storage_max_retries,
        state.storage_retry_base_ms,
    )
    .await
    .map_err(IngestError::Upload)?;

    let id = repo::insert_file_record(
        state.pipeline.pool(),
        &stored,
        &content_hash,
        Some(FileCategory::from_mime(&stored.mime_type).as_str()),
        description.as_deref(),
        &tags,
    )
    .await?;

    let mut value = serde_json::to_value(&stored).map_err(|e| internal(e.to_string()))?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("id".to_string(), serde_json::json!(id));
        obj.insert("content_hash".to_string(), serde_json::json!(content_hash));
    }
    Ok((StatusCode::CREATED, Json(value)))
}

async fn handle_download_file(
    State(state): State<AppState>,
    Path((bucket, filename)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let bytes = state
        .pipeline
        .store()
        .fetch(&bucket, &filename)
        .await
        .map_err(|e| match e {
            StoreError::Terminal(msg) if msg.contains("not found") => not_found(msg),
            other => internal(other.to_string()),
        })?;

    let mime: Option<String> =
        sqlx::query("SELECT mime_type FROM files WHERE filename = ? AND bucket = ?")
            .bind(&filename)
            .bind(&bucket)
            .fetch_optional(state.pipeline.pool())
            .await
            .map_err(|e| internal(e.to_string()))?
            .map(|row| row.get("mime_type"));

    if let Err(e) = repo::record_file_access(state.pipeline.pool(), &filename).await {
        tracing::warn!("failed to record file access for {}: {}", filename, e);
    }

    let content_type = mime.unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

#[derive(Deserialize)]
struct DeleteFileBody {
    file_name: String,
    bucket: String,
}

#[derive(Serialize)]
struct DeleteFileResponse {
    success: bool,
}

async fn handle_delete_file(
    State(state): State<AppState>,
    Json(body): Json<DeleteFileBody>,
) -> Result<Json<DeleteFileResponse>, AppError> {
    let success = state
        .pipeline
        .store()
        .delete(&body.bucket, &body.file_name)
        .await;

    if success {
        if let Err(e) = repo::delete_file_record(state.pipeline.pool(), &body.file_name).await {
            tracing::warn!("object deleted but file record removal failed: {}", e);
        }
    }

    Ok(Json(DeleteFileResponse { success }))
}

// ============ Helpers ============

/// Run the invalidation waves off the request path; the response does not
/// wait for cache convergence.
fn spawn_cache_waves(state: &AppState, keys: Vec<String>) {
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        pipeline.cache().after_mutation(&keys).await;
    });
}
