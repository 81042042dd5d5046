//! End-to-end ingestion pipeline tests against an in-memory SQLite database
//! and stub or filesystem object stores.

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::SqlitePool;

use docshelf::cache::{self, CacheCoordinator, CacheInvalidator};
use docshelf::config::{CacheConfig, IngestConfig, StorageConfig};
use docshelf::db;
use docshelf::hash;
use docshelf::ingest::{AttachTarget, IngestError, IngestPipeline, IngestRequest, IngestStage};
use docshelf::migrate;
use docshelf::models::StoredFileRef;
use docshelf::relations;
use docshelf::repo::{self, DocumentDraft};
use docshelf::store::{FileUpload, FsStore, ObjectStore, StoreError};
use docshelf::validate::DocumentForm;

// ============ Test fixtures ============

async fn memory_pool() -> SqlitePool {
    let pool = db::connect_memory().await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    pool
}

fn storage_cfg(root: &Path) -> StorageConfig {
    StorageConfig {
        backend: "fs".to_string(),
        root: root.to_path_buf(),
        bucket: None,
        region: "us-east-1".to_string(),
        endpoint_url: None,
        max_retries: 3,
        retry_base_ms: 1,
    }
}

fn fast_cache_cfg() -> CacheConfig {
    CacheConfig {
        invalidate_delay_ms: 1,
        refetch_delay_ms: 1,
    }
}

fn filled_form() -> DocumentForm {
    DocumentForm {
        title: "Decreto 001/2024".to_string(),
        description: "Municipal decree on archival policy".to_string(),
        document_type: "decree".to_string(),
        issuing_organ: "City Hall".to_string(),
        responsible: "Records Office".to_string(),
        subject: "archival policy".to_string(),
        tags: vec!["decree".to_string(), "2024".to_string()],
        author: Some("clerk".to_string()),
        ..Default::default()
    }
}

fn pdf_upload() -> FileUpload {
    FileUpload {
        original_name: "decreto-001.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        bytes: b"%PDF-1.4 fake body".to_vec(),
    }
}

fn pipeline(
    pool: SqlitePool,
    store: Arc<dyn ObjectStore>,
    root: &Path,
) -> (IngestPipeline, Arc<RecordingCache>) {
    let recorder = Arc::new(RecordingCache::default());
    let coordinator = Arc::new(CacheCoordinator::new(recorder.clone(), fast_cache_cfg()));
    let pipeline = IngestPipeline::new(
        pool,
        store,
        coordinator,
        IngestConfig::default(),
        storage_cfg(root),
    );
    (pipeline, recorder)
}

async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

// ============ Stubs ============

/// Records every invalidation call so tests can assert the exact wave order.
#[derive(Default)]
struct RecordingCache {
    events: Mutex<Vec<(&'static str, Vec<String>)>>,
}

impl RecordingCache {
    fn events(&self) -> Vec<(&'static str, Vec<String>)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl CacheInvalidator for RecordingCache {
    async fn invalidate(&self, keys: &[String]) {
        self.events.lock().unwrap().push(("invalidate", keys.to_vec()));
    }
    async fn refetch(&self, keys: &[String]) {
        self.events.lock().unwrap().push(("refetch", keys.to_vec()));
    }
}

/// Counts upload attempts and rejects every one with a terminal error.
#[derive(Default)]
struct RejectingStore {
    uploads: AtomicUsize,
}

#[async_trait]
impl ObjectStore for RejectingStore {
    async fn upload(&self, _file: &FileUpload) -> Result<StoredFileRef, StoreError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Terminal("bucket does not exist".to_string()))
    }
    async fn fetch(&self, bucket: &str, filename: &str) -> Result<Vec<u8>, StoreError> {
        Err(StoreError::Terminal(format!("{}/{} not stored", bucket, filename)))
    }
    async fn delete(&self, _bucket: &str, _filename: &str) -> bool {
        true
    }
}

/// Fails the first N uploads with a transient error, then delegates to a
/// real filesystem store.
struct FlakyStore {
    inner: FsStore,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn upload(&self, file: &FileUpload) -> Result<StoredFileRef, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            if n > 0 {
                Some(n - 1)
            } else {
                None
            }
        })
        .is_ok()
        {
            return Err(StoreError::Transient("connection reset".to_string()));
        }
        self.inner.upload(file).await
    }
    async fn fetch(&self, bucket: &str, filename: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.fetch(bucket, filename).await
    }
    async fn delete(&self, bucket: &str, filename: &str) -> bool {
        self.inner.delete(bucket, filename).await
    }
}

/// Never completes an upload within any realistic deadline.
struct SlowStore;

#[async_trait]
impl ObjectStore for SlowStore {
    async fn upload(&self, _file: &FileUpload) -> Result<StoredFileRef, StoreError> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Err(StoreError::Transient("never reached".to_string()))
    }
    async fn fetch(&self, _bucket: &str, _filename: &str) -> Result<Vec<u8>, StoreError> {
        Err(StoreError::Terminal("not stored".to_string()))
    }
    async fn delete(&self, _bucket: &str, _filename: &str) -> bool {
        true
    }
}

// ============ Scenarios ============

#[tokio::test]
async fn standalone_ingest_creates_document_object_and_file_record() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = memory_pool().await;
    let store = Arc::new(FsStore::new(tmp.path()));
    let (pipeline, _recorder) = pipeline(pool.clone(), store, tmp.path());

    let (result, stages) = pipeline
        .run_traced(IngestRequest {
            form: filled_form(),
            file: pdf_upload(),
            attach_to: None,
        })
        .await;
    let outcome = result.unwrap();

    assert_eq!(outcome.document.title, "Decreto 001/2024");
    assert_eq!(outcome.document.category, "documents");
    assert_eq!(outcome.stored.bucket, "documents");
    assert!(hash::is_valid_digest(&outcome.content_hash));
    assert!(outcome.relation.is_none());
    assert_eq!(stages.last(), Some(&IngestStage::Done));
    assert!(!stages.contains(&IngestStage::LinkingRelation));

    // The object is on disk and both records exist.
    let on_disk = std::fs::read(&outcome.stored.file_path).unwrap();
    assert_eq!(on_disk, pdf_upload().bytes);
    assert_eq!(count(&pool, "documents").await, 1);
    assert_eq!(count(&pool, "files").await, 1);

    // The persisted document carries the file identity in its metadata.
    let doc = repo::get_document(&pool, outcome.document.id).await.unwrap();
    let meta = doc.meta.expect("structured metadata");
    assert!(meta.digital_id.unwrap().starts_with("DOC-"));
    let info = meta.file_info.expect("file info");
    assert_eq!(info.content_hash, outcome.content_hash);
    assert_eq!(info.original_name, "decreto-001.pdf");
}

#[tokio::test]
async fn attach_flow_links_child_and_invalidates_related_key_in_waves() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = memory_pool().await;

    let parent = repo::create_document(
        &pool,
        &DocumentDraft {
            title: "Processo 42".to_string(),
            description: None,
            meta: None,
            tags: vec![],
            category: "documents".to_string(),
            author: None,
        },
    )
    .await
    .unwrap();

    let store = Arc::new(FsStore::new(tmp.path()));
    let (pipeline, recorder) = pipeline(pool.clone(), store, tmp.path());

    let outcome = pipeline
        .run(IngestRequest {
            form: filled_form(),
            file: pdf_upload(),
            attach_to: Some(AttachTarget {
                parent_id: parent.id,
                relation_type: None,
                description: Some("annex".to_string()),
                created_by: Some("clerk".to_string()),
            }),
        })
        .await
        .unwrap();

    let rel = outcome.relation.expect("relation created");
    assert_eq!(rel.parent_document_id, parent.id);
    assert_eq!(rel.child_document_id, outcome.document.id);
    // No relation type given, so the configured default applies.
    assert_eq!(rel.relation_type, "attached");

    let related = relations::list_related(&pool, parent.id).await.unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].child_document_id, outcome.document.id);

    // Waves: invalidate, refetch, invalidate — each touching the same keys,
    // including the parent's related-documents key.
    let events = recorder.events();
    assert_eq!(
        events.iter().map(|(op, _)| *op).collect::<Vec<_>>(),
        vec!["invalidate", "refetch", "invalidate"]
    );
    for (_, keys) in &events {
        assert!(keys.contains(&cache::key_all_documents()));
        assert!(keys.contains(&cache::key_document(outcome.document.id)));
        assert!(keys.contains(&cache::key_related(parent.id)));
    }
}

#[tokio::test]
async fn blocking_validation_fails_before_any_upload() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = memory_pool().await;
    let store = Arc::new(RejectingStore::default());
    let (pipeline, recorder) = pipeline(pool.clone(), store.clone(), tmp.path());

    let mut form = filled_form();
    form.title = "   ".to_string();

    let err = pipeline
        .run(IngestRequest {
            form,
            file: pdf_upload(),
            attach_to: None,
        })
        .await
        .unwrap_err();

    match err {
        IngestError::Validation(errors) => {
            assert!(errors.iter().any(|e| e.contains("title")));
        }
        other => panic!("expected validation error, got {:?}", other),
    }

    // No upload attempt, no records, no cache activity.
    assert_eq!(store.uploads.load(Ordering::SeqCst), 0);
    assert_eq!(count(&pool, "documents").await, 0);
    assert_eq!(count(&pool, "files").await, 0);
    assert!(recorder.events().is_empty());
}

#[tokio::test]
async fn terminal_upload_failure_halts_before_persistence() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = memory_pool().await;
    let store = Arc::new(RejectingStore::default());
    let (pipeline, recorder) = pipeline(pool.clone(), store.clone(), tmp.path());

    let (result, stages) = pipeline
        .run_traced(IngestRequest {
            form: filled_form(),
            file: pdf_upload(),
            attach_to: None,
        })
        .await;
    let err = result.unwrap_err();

    assert!(matches!(err, IngestError::Upload(StoreError::Terminal(_))));
    // Terminal errors are not retried, and the trace ends in Failed.
    assert_eq!(store.uploads.load(Ordering::SeqCst), 1);
    assert_eq!(
        stages,
        vec![
            IngestStage::Idle,
            IngestStage::Hashing,
            IngestStage::Uploading,
            IngestStage::Failed,
        ]
    );
    assert_eq!(count(&pool, "documents").await, 0);
    assert_eq!(count(&pool, "files").await, 0);
    assert!(recorder.events().is_empty());
}

#[tokio::test]
async fn transient_upload_failures_are_retried_until_success() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = memory_pool().await;
    let store = Arc::new(FlakyStore {
        inner: FsStore::new(tmp.path()),
        failures_left: AtomicU32::new(2),
        attempts: AtomicU32::new(0),
    });
    let (pipeline, _recorder) = pipeline(pool.clone(), store.clone(), tmp.path());

    let (result, stages) = pipeline
        .run_traced(IngestRequest {
            form: filled_form(),
            file: pdf_upload(),
            attach_to: None,
        })
        .await;
    result.unwrap();

    assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(count(&pool, "documents").await, 1);
    assert_eq!(stages.last(), Some(&IngestStage::Done));
}

#[tokio::test]
async fn upload_exceeding_the_deadline_times_out() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = memory_pool().await;
    let recorder = Arc::new(RecordingCache::default());
    let coordinator = Arc::new(CacheCoordinator::new(recorder.clone(), fast_cache_cfg()));
    let pipeline = IngestPipeline::new(
        pool.clone(),
        Arc::new(SlowStore),
        coordinator,
        IngestConfig {
            upload_timeout_secs: 1,
            default_relation_type: "attached".to_string(),
        },
        storage_cfg(tmp.path()),
    );

    let err = pipeline
        .run(IngestRequest {
            form: filled_form(),
            file: pdf_upload(),
            attach_to: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::UploadTimeout(1)));
    assert_eq!(count(&pool, "documents").await, 0);
}

#[tokio::test]
async fn link_failure_degrades_to_a_warning() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = memory_pool().await;
    let store = Arc::new(FsStore::new(tmp.path()));
    let (pipeline, recorder) = pipeline(pool.clone(), store, tmp.path());

    let (result, stages) = pipeline
        .run_traced(IngestRequest {
            form: filled_form(),
            file: pdf_upload(),
            attach_to: Some(AttachTarget {
                parent_id: 9999, // no such document
                relation_type: None,
                description: None,
                created_by: None,
            }),
        })
        .await;
    let outcome = result.unwrap();

    // The document exists despite the failed link.
    assert_eq!(count(&pool, "documents").await, 1);
    assert!(outcome.relation.is_none());
    assert!(outcome.warnings.iter().any(|w| w.contains("9999")));
    assert_eq!(stages.last(), Some(&IngestStage::Done));
    assert_eq!(count(&pool, "document_relations").await, 0);

    // Cache waves still run, but without the parent's related key.
    let events = recorder.events();
    assert_eq!(events.len(), 3);
    assert!(!events[0].1.contains(&cache::key_related(9999)));
}

#[tokio::test]
async fn persistence_failure_compensates_by_deleting_the_object() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = memory_pool().await;
    // Sabotage the document table so persistence fails after the upload.
    sqlx::query("DROP TABLE documents").execute(&pool).await.unwrap();

    let store = Arc::new(FsStore::new(tmp.path()));
    let (pipeline, recorder) = pipeline(pool.clone(), store, tmp.path());

    let err = pipeline
        .run(IngestRequest {
            form: filled_form(),
            file: pdf_upload(),
            attach_to: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Persistence(_)));
    // Compensation removed the uploaded object and its file record.
    assert_eq!(count(&pool, "files").await, 0);
    let leftovers: Vec<_> = walk_files(tmp.path());
    assert!(leftovers.is_empty(), "orphan objects left: {:?}", leftovers);
    assert!(recorder.events().is_empty());
}

fn walk_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                found.extend(walk_files(&path));
            } else {
                found.push(path);
            }
        }
    }
    found
}
