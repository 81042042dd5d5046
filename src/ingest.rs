//! Ingestion pipeline orchestration.
//!
//! Coordinates the full attach/upload flow: validation → hashing → object
//! upload → document persistence → relation linking → cache invalidation.
//! Each run is one isolated unit of async work; the steps execute strictly
//! in sequence and every network call is a suspension point.
//!
//! Failure policy (one class per step):
//! - validation errors block before any I/O happens;
//! - upload errors halt the run — no document record is ever created for a
//!   file that is not in storage;
//! - persistence errors after a successful upload trigger a compensating
//!   delete of the uploaded object so no orphan is left behind;
//! - link errors are non-fatal — the document exists, a warning is recorded;
//! - cache errors are invisible — the wave mechanism absorbs them.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use thiserror::Error;

use crate::cache::{self, CacheCoordinator};
use crate::config::{IngestConfig, StorageConfig};
use crate::hash;
use crate::models::{Document, DocumentMeta, DocumentRelation, FileCategory, FileInfo, StoredFileRef};
use crate::relations;
use crate::repo::{self, DocumentDraft, RepoError};
use crate::store::{upload_with_retry, FileUpload, ObjectStore, StoreError};
use crate::validate::{self, DocumentForm};

/// States of one ingestion run, in order. `Failed` terminates the trace
/// whenever a step errors; `Done` when the run completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Idle,
    Hashing,
    Uploading,
    ValidatingMetadata,
    PersistingDocument,
    LinkingRelation,
    InvalidatingCache,
    Done,
    Failed,
}

/// Where to attach the new document, for the attach-to-parent flow.
#[derive(Debug, Clone)]
pub struct AttachTarget {
    pub parent_id: i64,
    /// Relation type tag; defaults to the configured one when empty.
    pub relation_type: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

/// One ingestion request: a file plus its metadata form, optionally attached
/// to a parent document.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub form: DocumentForm,
    pub file: FileUpload,
    pub attach_to: Option<AttachTarget>,
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// Blocking form problems. No network call was made.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    /// Object-store write failed after retries. No document was created.
    #[error(transparent)]
    Upload(#[from] StoreError),
    /// Upload exceeded the configured deadline. Timed-out uploads restart
    /// from scratch; there is no partial-upload resume.
    #[error("upload timed out after {0} seconds")]
    UploadTimeout(u64),
    /// Document write failed after the upload succeeded. The uploaded object
    /// is deleted by compensation (best-effort).
    #[error("persistence failed: {0}")]
    Persistence(#[source] RepoError),
}

/// Result of a completed ingestion. Link failure and hash unavailability
/// show up as warnings, not errors.
#[derive(Debug)]
pub struct IngestOutcome {
    pub document: Document,
    pub stored: StoredFileRef,
    pub content_hash: String,
    pub relation: Option<DocumentRelation>,
    pub warnings: Vec<String>,
}

/// The ingestion orchestrator. Holds its collaborators by injection so tests
/// can substitute stub stores and recording caches.
pub struct IngestPipeline {
    pool: SqlitePool,
    store: Arc<dyn ObjectStore>,
    cache: Arc<CacheCoordinator>,
    ingest: IngestConfig,
    storage: StorageConfig,
}

impl IngestPipeline {
    pub fn new(
        pool: SqlitePool,
        store: Arc<dyn ObjectStore>,
        cache: Arc<CacheCoordinator>,
        ingest: IngestConfig,
        storage: StorageConfig,
    ) -> Self {
        Self {
            pool,
            store,
            cache,
            ingest,
            storage,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn cache(&self) -> &CacheCoordinator {
        &self.cache
    }

    /// Run one ingestion from form submission to cache convergence.
    pub async fn run(&self, request: IngestRequest) -> Result<IngestOutcome, IngestError> {
        let (result, stages) = self.run_traced(request).await;
        if result.is_err() {
            tracing::warn!("ingestion failed; stages traversed: {:?}", stages);
        }
        result
    }

    /// Like [`IngestPipeline::run`], but also returns the stage trace. The
    /// trace ends in [`IngestStage::Done`] on success and
    /// [`IngestStage::Failed`] on error.
    pub async fn run_traced(
        &self,
        request: IngestRequest,
    ) -> (Result<IngestOutcome, IngestError>, Vec<IngestStage>) {
        let mut stages = vec![IngestStage::Idle];
        let result = self.run_stages(request, &mut stages).await;
        if result.is_err() {
            stages.push(IngestStage::Failed);
        }
        (result, stages)
    }

    async fn run_stages(
        &self,
        request: IngestRequest,
        stages: &mut Vec<IngestStage>,
    ) -> Result<IngestOutcome, IngestError> {
        let mut warnings = Vec::new();

        // Validation is pure, so blocking errors fail fast here — before any
        // hashing or upload I/O. The ValidatingMetadata state below re-checks
        // the same report.
        let report = validate::validate(&request.form);
        if report.is_blocking() {
            return Err(IngestError::Validation(report.errors));
        }
        warnings.extend(report.warnings.iter().cloned());

        // Hashing. A sentinel digest does not block the upload; the document
        // is flagged as unverifiable instead.
        stages.push(IngestStage::Hashing);
        let content_hash = hash::hash_file_bytes(Ok(&request.file.bytes));
        if !hash::is_valid_digest(&content_hash) {
            warnings.push("content hash unavailable; file integrity cannot be verified".to_string());
        }

        // Upload, with bounded retries and a generous overall deadline.
        stages.push(IngestStage::Uploading);
        let stored = match tokio::time::timeout(
            Duration::from_secs(self.ingest.upload_timeout_secs),
            upload_with_retry(
                self.store.as_ref(),
                &request.file,
                self.storage.max_retries,
                self.storage.retry_base_ms,
            ),
        )
        .await
        {
            Ok(Ok(stored)) => stored,
            Ok(Err(e)) => return Err(IngestError::Upload(e)),
            Err(_) => {
                return Err(IngestError::UploadTimeout(self.ingest.upload_timeout_secs));
            }
        };

        stages.push(IngestStage::ValidatingMetadata);
        debug_assert!(!report.is_blocking());

        stages.push(IngestStage::PersistingDocument);
        let document = match self.persist(&request, &stored, &content_hash).await {
            Ok(doc) => doc,
            Err(e) => {
                // Compensating action: the upload succeeded but the document
                // does not exist, so remove the object and its file record
                // rather than leaving an orphan. Deletion is best-effort.
                if !self.store.delete(&stored.bucket, &stored.filename).await {
                    tracing::warn!(
                        "compensating delete failed; orphan object {}/{}",
                        stored.bucket,
                        stored.filename
                    );
                }
                if let Err(cleanup_err) =
                    repo::delete_file_record(&self.pool, &stored.filename).await
                {
                    tracing::warn!(
                        "compensating file-record cleanup failed for {}: {}",
                        stored.filename,
                        cleanup_err
                    );
                }
                return Err(IngestError::Persistence(e));
            }
        };

        // Relation linking is best-effort: the document already exists, so a
        // failed link degrades to a warning rather than failing the run.
        let mut relation = None;
        let mut cache_keys = vec![
            cache::key_all_documents(),
            cache::key_document_stats(),
            cache::key_document(document.id),
        ];

        if let Some(ref target) = request.attach_to {
            stages.push(IngestStage::LinkingRelation);
            let relation_type = target
                .relation_type
                .clone()
                .unwrap_or_else(|| self.ingest.default_relation_type.clone());
            match relations::link(
                &self.pool,
                target.parent_id,
                document.id,
                &relation_type,
                target.description.as_deref(),
                target.created_by.as_deref(),
            )
            .await
            {
                Ok(rel) => {
                    cache_keys.push(cache::key_related(target.parent_id));
                    relation = Some(rel);
                }
                Err(e) => {
                    tracing::warn!(
                        "failed to link document {} to parent {}: {}",
                        document.id,
                        target.parent_id,
                        e
                    );
                    warnings.push(format!(
                        "document created, but linking to parent {} failed: {}",
                        target.parent_id, e
                    ));
                }
            }
        }

        stages.push(IngestStage::InvalidatingCache);
        self.cache.after_mutation(&cache_keys).await;

        stages.push(IngestStage::Done);
        Ok(IngestOutcome {
            document,
            stored,
            content_hash,
            relation,
            warnings,
        })
    }

    /// Write the file record and the document record. Both belong to the
    /// persistence step: a failure in either triggers the compensating
    /// delete in `run`.
    async fn persist(
        &self,
        request: &IngestRequest,
        stored: &StoredFileRef,
        content_hash: &str,
    ) -> Result<Document, RepoError> {
        let form = &request.form;

        repo::insert_file_record(
            &self.pool,
            stored,
            content_hash,
            Some(FileCategory::from_mime(&stored.mime_type).as_str()),
            non_empty(&form.description),
            &form.tags,
        )
        .await?;

        let category = form
            .category
            .unwrap_or_else(|| FileCategory::from_mime(&stored.mime_type));

        let meta = DocumentMeta {
            digital_id: Some(validate::generate_digital_id()),
            document_type: non_empty(&form.document_type).map(str::to_string),
            issuing_organ: non_empty(&form.issuing_organ).map(str::to_string),
            responsible: non_empty(&form.responsible).map(str::to_string),
            subject: non_empty(&form.subject).map(str::to_string),
            confidentiality: form.confidentiality.clone(),
            legal_basis: form.legal_basis.clone(),
            document_date: form.document_date.clone(),
            tags: form.tags.clone(),
            file_info: Some(FileInfo {
                path: stored.file_path.clone(),
                original_name: stored.original_name.clone(),
                size: stored.file_size,
                mime_type: stored.mime_type.clone(),
                content_hash: content_hash.to_string(),
            }),
            ..Default::default()
        };

        let draft = DocumentDraft {
            title: form.title.trim().to_string(),
            description: non_empty(&form.description).map(str::to_string),
            meta: Some(meta),
            tags: form.tags.clone(),
            category: category.as_str().to_string(),
            author: form.author.clone(),
        };

        repo::create_document(&self.pool, &draft).await
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
