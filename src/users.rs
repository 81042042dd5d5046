//! User account management.
//!
//! The "cannot delete your own account" rule lives here in the service
//! layer, not in any UI, so it holds for every entry point (HTTP, CLI,
//! tests).

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::hash::sha256_hex;
use crate::models::{Role, User};
use crate::repo::{timestamp_to_datetime, RepoError};

pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    email: &str,
    password: &str,
    role: Role,
) -> Result<User, RepoError> {
    if username.trim().is_empty() || email.trim().is_empty() {
        return Err(RepoError::InvalidInput(
            "username and email are required".to_string(),
        ));
    }
    if password.len() < 8 {
        return Err(RepoError::InvalidInput(
            "password must be at least 8 characters".to_string(),
        ));
    }

    let digest = sha256_hex(password.as_bytes());
    let now = Utc::now().timestamp();

    let result = sqlx::query(
        "INSERT INTO users (username, email, password_digest, role, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(username.trim())
    .bind(email.trim())
    .bind(&digest)
    .bind(role.as_str())
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            RepoError::InvalidInput("username or email already taken".to_string())
        }
        other => RepoError::Backend(other),
    })?;

    get_user(pool, result.last_insert_rowid()).await
}

pub async fn get_user(pool: &SqlitePool, id: i64) -> Result<User, RepoError> {
    let row = sqlx::query(
        "SELECT id, username, email, password_digest, role, created_at FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(row_to_user(&row)),
        None => Err(RepoError::NotFound(format!("user {}", id))),
    }
}

pub async fn list_users(pool: &SqlitePool) -> Result<Vec<User>, RepoError> {
    let rows = sqlx::query(
        "SELECT id, username, email, password_digest, role, created_at FROM users ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_user).collect())
}

/// Delete a user account. `actor_id` is the account performing the delete;
/// deleting oneself is rejected.
pub async fn delete_user(pool: &SqlitePool, actor_id: i64, target_id: i64) -> Result<(), RepoError> {
    if actor_id == target_id {
        return Err(RepoError::InvalidInput(
            "cannot delete your own account".to_string(),
        ));
    }

    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(target_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound(format!("user {}", target_id)));
    }
    Ok(())
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> User {
    let role: String = row.get("role");
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_digest: row.get("password_digest"),
        role: Role::parse(&role),
        created_at: timestamp_to_datetime(row.get("created_at")),
    }
}
