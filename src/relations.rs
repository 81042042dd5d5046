//! Directed document relations.
//!
//! A relation records that one document (the child) is attached to or derived
//! from another (the parent). Relations are append-only history: they are
//! created during the attach flow and never updated.

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::models::DocumentRelation;
use crate::repo::{timestamp_to_datetime, RepoError};

/// Create a parent → child relation. Both documents must exist, and a
/// document cannot relate to itself.
pub async fn link(
    pool: &SqlitePool,
    parent_id: i64,
    child_id: i64,
    relation_type: &str,
    description: Option<&str>,
    created_by: Option<&str>,
) -> Result<DocumentRelation, RepoError> {
    if parent_id == child_id {
        return Err(RepoError::InvalidInput(
            "a document cannot be related to itself".to_string(),
        ));
    }

    for id in [parent_id, child_id] {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await?;
        if !exists {
            return Err(RepoError::NotFound(format!("document {}", id)));
        }
    }

    let now = Utc::now().timestamp();
    let result = sqlx::query(
        r#"
        INSERT INTO document_relations (parent_document_id, child_document_id, relation_type, description, created_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(parent_id)
    .bind(child_id)
    .bind(relation_type)
    .bind(description)
    .bind(created_by)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(DocumentRelation {
        id: result.last_insert_rowid(),
        parent_document_id: parent_id,
        child_document_id: child_id,
        relation_type: relation_type.to_string(),
        description: description.map(str::to_string),
        created_by: created_by.map(str::to_string),
        created_at: timestamp_to_datetime(now),
    })
}

/// All relations in which the given document appears as parent or child.
/// The model is directional; the lookup is bidirectional.
pub async fn list_related(pool: &SqlitePool, document_id: i64) -> Result<Vec<DocumentRelation>, RepoError> {
    let rows = sqlx::query(
        r#"
        SELECT id, parent_document_id, child_document_id, relation_type, description, created_by, created_at
        FROM document_relations
        WHERE parent_document_id = ? OR child_document_id = ?
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(document_id)
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| DocumentRelation {
            id: row.get("id"),
            parent_document_id: row.get("parent_document_id"),
            child_document_id: row.get("child_document_id"),
            relation_type: row.get("relation_type"),
            description: row.get("description"),
            created_by: row.get("created_by"),
            created_at: timestamp_to_datetime(row.get("created_at")),
        })
        .collect())
}
