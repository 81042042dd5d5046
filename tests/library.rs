//! Document library and account-management tests against an in-memory
//! SQLite database.

use sqlx::SqlitePool;

use docshelf::db;
use docshelf::migrate;
use docshelf::models::Role;
use docshelf::relations;
use docshelf::repo::{self, DocumentDraft, RepoError};
use docshelf::users;

async fn memory_pool() -> SqlitePool {
    let pool = db::connect_memory().await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    pool
}

fn draft(title: &str, category: &str) -> DocumentDraft {
    DocumentDraft {
        title: title.to_string(),
        description: Some(format!("{} description", title)),
        meta: None,
        tags: vec!["archive".to_string()],
        category: category.to_string(),
        author: None,
    }
}

#[tokio::test]
async fn create_then_get_round_trips() {
    let pool = memory_pool().await;
    let created = repo::create_document(&pool, &draft("Decreto 001", "documents"))
        .await
        .unwrap();
    let fetched = repo::get_document(&pool, created.id).await.unwrap();
    assert_eq!(fetched.title, "Decreto 001");
    assert_eq!(fetched.tags, vec!["archive"]);
    assert_eq!(fetched.category, "documents");
}

#[tokio::test]
async fn get_missing_document_is_not_found() {
    let pool = memory_pool().await;
    let err = repo::get_document(&pool, 42).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound(_)));
}

#[tokio::test]
async fn empty_title_is_rejected_on_create_and_update() {
    let pool = memory_pool().await;
    let err = repo::create_document(&pool, &draft("  ", "documents"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidInput(_)));

    let doc = repo::create_document(&pool, &draft("Valid", "documents"))
        .await
        .unwrap();
    let err = repo::update_document(&pool, doc.id, &draft("", "documents"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidInput(_)));
}

#[tokio::test]
async fn update_replaces_all_mutable_fields() {
    let pool = memory_pool().await;
    let doc = repo::create_document(&pool, &draft("Before", "documents"))
        .await
        .unwrap();

    let mut replacement = draft("After", "images");
    replacement.tags = vec!["new".to_string()];
    replacement.description = None;
    let updated = repo::update_document(&pool, doc.id, &replacement)
        .await
        .unwrap();

    assert_eq!(updated.id, doc.id);
    assert_eq!(updated.title, "After");
    assert_eq!(updated.category, "images");
    assert_eq!(updated.tags, vec!["new"]);
    // Omitted fields are cleared, not preserved.
    assert!(updated.description.is_none());
    assert_eq!(updated.created_at, doc.created_at);
}

#[tokio::test]
async fn search_is_case_insensitive_over_title_description_and_tags() {
    let pool = memory_pool().await;
    repo::create_document(&pool, &draft("Decreto Municipal", "documents"))
        .await
        .unwrap();
    let mut tagged = draft("Untitled scan", "images");
    tagged.tags = vec!["orçamento".to_string()];
    repo::create_document(&pool, &tagged).await.unwrap();

    let hits = repo::search_documents(&pool, "DECRETO", None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Decreto Municipal");

    // Tag contents match too.
    let hits = repo::search_documents(&pool, "orçamento", None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Untitled scan");

    let none = repo::search_documents(&pool, "nonexistent", None).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn search_category_filter_narrows_results() {
    let pool = memory_pool().await;
    repo::create_document(&pool, &draft("Annual report", "documents"))
        .await
        .unwrap();
    repo::create_document(&pool, &draft("Annual report cover", "images"))
        .await
        .unwrap();

    let all = repo::search_documents(&pool, "annual", None).await.unwrap();
    assert_eq!(all.len(), 2);

    let docs_only = repo::search_documents(&pool, "annual", Some("documents"))
        .await
        .unwrap();
    assert_eq!(docs_only.len(), 1);
    assert_eq!(docs_only[0].category, "documents");
}

#[tokio::test]
async fn search_treats_like_wildcards_as_literals() {
    let pool = memory_pool().await;
    repo::create_document(&pool, &draft("100% cotton inventory", "documents"))
        .await
        .unwrap();
    repo::create_document(&pool, &draft("snake_case style guide", "documents"))
        .await
        .unwrap();
    repo::create_document(&pool, &draft("plain title", "documents"))
        .await
        .unwrap();

    // "%" is a literal percent sign, not match-everything.
    let hits = repo::search_documents(&pool, "100%", None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "100% cotton inventory");

    let hits = repo::search_documents(&pool, "%", None).await.unwrap();
    assert_eq!(hits.len(), 1);

    // "_" is a literal underscore, not match-any-character.
    let hits = repo::search_documents(&pool, "snake_case", None).await.unwrap();
    assert_eq!(hits.len(), 1);
    let hits = repo::search_documents(&pool, "snakeXcase", None).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn delete_document_removes_its_relations() {
    let pool = memory_pool().await;
    let parent = repo::create_document(&pool, &draft("Parent", "documents"))
        .await
        .unwrap();
    let child = repo::create_document(&pool, &draft("Child", "documents"))
        .await
        .unwrap();
    relations::link(&pool, parent.id, child.id, "attached", None, None)
        .await
        .unwrap();

    repo::delete_document(&pool, parent.id).await.unwrap();

    let err = repo::get_document(&pool, parent.id).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound(_)));
    // The child survives but no longer has relations.
    repo::get_document(&pool, child.id).await.unwrap();
    let related = relations::list_related(&pool, child.id).await.unwrap();
    assert!(related.is_empty());
}

#[tokio::test]
async fn self_relation_is_rejected() {
    let pool = memory_pool().await;
    let doc = repo::create_document(&pool, &draft("Solo", "documents"))
        .await
        .unwrap();
    let err = relations::link(&pool, doc.id, doc.id, "attached", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidInput(_)));
}

#[tokio::test]
async fn relation_requires_both_documents_to_exist() {
    let pool = memory_pool().await;
    let doc = repo::create_document(&pool, &draft("Lonely", "documents"))
        .await
        .unwrap();
    let err = relations::link(&pool, doc.id, 9999, "attached", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound(_)));
}

#[tokio::test]
async fn related_lookup_is_bidirectional() {
    let pool = memory_pool().await;
    let a = repo::create_document(&pool, &draft("A", "documents")).await.unwrap();
    let b = repo::create_document(&pool, &draft("B", "documents")).await.unwrap();
    relations::link(&pool, a.id, b.id, "attached", None, None)
        .await
        .unwrap();

    // The same relation is visible from both ends.
    assert_eq!(relations::list_related(&pool, a.id).await.unwrap().len(), 1);
    assert_eq!(relations::list_related(&pool, b.id).await.unwrap().len(), 1);
}

// ============ User accounts ============

#[tokio::test]
async fn create_user_hashes_password_and_rejects_duplicates() {
    let pool = memory_pool().await;
    let user = users::create_user(&pool, "alice", "alice@example.org", "correct horse", Role::Admin)
        .await
        .unwrap();
    assert_eq!(user.role, Role::Admin);
    // Digest, never the plaintext.
    assert_ne!(user.password_digest, "correct horse");
    assert_eq!(user.password_digest.len(), 64);

    let err = users::create_user(&pool, "alice", "other@example.org", "correct horse", Role::User)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidInput(_)));
}

#[tokio::test]
async fn short_passwords_are_rejected() {
    let pool = memory_pool().await;
    let err = users::create_user(&pool, "bob", "bob@example.org", "short", Role::User)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidInput(_)));
}

#[tokio::test]
async fn deleting_your_own_account_is_rejected() {
    let pool = memory_pool().await;
    let admin = users::create_user(&pool, "admin", "admin@example.org", "admin-pass-1", Role::Admin)
        .await
        .unwrap();
    let other = users::create_user(&pool, "clerk", "clerk@example.org", "clerk-pass-1", Role::User)
        .await
        .unwrap();

    let err = users::delete_user(&pool, admin.id, admin.id).await.unwrap_err();
    match err {
        RepoError::InvalidInput(msg) => assert!(msg.contains("own account")),
        other => panic!("expected invalid input, got {:?}", other),
    }

    // Deleting someone else works.
    users::delete_user(&pool, admin.id, other.id).await.unwrap();
    let err = users::get_user(&pool, other.id).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound(_)));
}
