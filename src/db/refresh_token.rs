//! Refresh token storage.
//!
//! One row per live refresh token. Rotation, logout and expiry detection all
//! delete rows; a missing row is the only "revoked" state there is.
//! Access tokens are stateless and never stored.

use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;

/// A stored refresh token.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub token: String,
    pub owner_id: String,
    /// Unix seconds
    pub issued_at: i64,
    /// Unix seconds
    pub expires_at: i64,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

/// Store for managing refresh tokens.
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new refresh token record.
    pub async fn create(
        &self,
        token: &str,
        owner_id: &str,
        issued_at: i64,
        expires_at: i64,
    ) -> Result<i64, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::create_in(&mut conn, token, owner_id, issued_at, expires_at).await
    }

    /// Insert a record on an existing connection or transaction.
    pub async fn create_in(
        conn: &mut SqliteConnection,
        token: &str,
        owner_id: &str,
        issued_at: i64,
        expires_at: i64,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO refresh_tokens (token, owner_id, issued_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token)
        .bind(owner_id)
        .bind(issued_at)
        .bind(expires_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Get a record by exact token match.
    pub async fn find_by_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, token, owner_id, issued_at, expires_at FROM refresh_tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
    }

    /// Delete the record for `token` and return it, in one statement.
    ///
    /// Inside a transaction this takes the write lock first, so a concurrent
    /// caller presenting the same token waits and then finds nothing.
    pub async fn take_in(
        conn: &mut SqliteConnection,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        sqlx::query_as(
            "DELETE FROM refresh_tokens WHERE token = ? RETURNING id, token, owner_id, issued_at, expires_at",
        )
        .bind(token)
        .fetch_optional(&mut *conn)
        .await
    }

    /// Delete every record matching `token`. Returns the number removed.
    pub async fn delete_by_token(&self, token: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete a record by its row id.
    pub async fn delete_by_id(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a record by id, but only if it belongs to `owner_id`.
    pub async fn delete_owned(&self, id: i64, owner_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List unexpired records for an owner, newest first.
    pub async fn list_by_owner(
        &self,
        owner_id: &str,
        now: i64,
    ) -> Result<Vec<RefreshTokenRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, token, owner_id, issued_at, expires_at FROM refresh_tokens WHERE owner_id = ? AND expires_at >= ? ORDER BY issued_at DESC, id DESC",
        )
        .bind(owner_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
    }

    /// Delete all records for an owner (logout everywhere).
    pub async fn delete_all_by_owner(&self, owner_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
