use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::str::FromStr;
use uuid::Uuid;

use crate::password::{self, PasswordError};

#[derive(Clone)]
pub struct IdentityStore {
    pool: SqlitePool,
}

/// Identity role, embedded in access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// A registered identity. The password hash stays inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    pub active: bool,
}

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: String,
    email: String,
    name: Option<String>,
    role: String,
    active: i32,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            name: row.name,
            // Rows only ever hold values written by `Role::as_str`
            role: row.role.parse().unwrap_or(Role::User),
            active: row.active != 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("an identity with this email already exists")]
    Conflict,
    #[error("identity not found")]
    NotFound,
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error("identity store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl IdentityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new active identity from an already hashed password.
    pub async fn create(
        &self,
        email: &str,
        name: Option<&str>,
        password_hash: &str,
        role: Role,
    ) -> Result<Identity, IdentityError> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO users (id, email, name, password_hash, role, active) VALUES (?, ?, ?, ?, ?, 1)",
        )
        .bind(&id)
        .bind(email)
        .bind(name)
        .bind(password_hash)
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return IdentityError::Conflict;
                }
            }
            IdentityError::Store(e)
        })?;

        Ok(Identity {
            id,
            email: email.to_string(),
            name: name.map(str::to_string),
            role,
            active: true,
        })
    }

    /// Hash `password` and create the identity.
    pub async fn create_with_password(
        &self,
        email: &str,
        name: Option<&str>,
        password: &str,
        role: Role,
    ) -> Result<Identity, IdentityError> {
        let hash = password::hash_password(password)?;
        self.create(email, name, &hash, role).await
    }

    /// Get an identity by email (case-insensitive).
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, sqlx::Error> {
        let row: Option<IdentityRow> =
            sqlx::query_as("SELECT id, email, name, role, active FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Identity::from))
    }

    /// Get an identity by ID.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::find_by_id_in(&mut conn, id).await
    }

    /// Get an identity by ID on an existing connection or transaction.
    pub async fn find_by_id_in(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Option<Identity>, sqlx::Error> {
        let row: Option<IdentityRow> =
            sqlx::query_as("SELECT id, email, name, role, active FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(row.map(Identity::from))
    }

    /// Enable or disable an identity.
    pub async fn set_active(&self, id: &str, active: bool) -> Result<(), IdentityError> {
        let result = sqlx::query("UPDATE users SET active = ? WHERE id = ?")
            .bind(active as i32)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::NotFound);
        }
        Ok(())
    }

    /// Check `password` against the stored hash for `email`.
    /// Returns `None` for an unknown email or a wrong password.
    pub async fn validate_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<Identity>, IdentityError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT password_hash FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;

        let Some((hash,)) = row else {
            // Same argon2 cost as a wrong password for a known email
            password::verify_password(password, password::DUMMY_HASH);
            return Ok(None);
        };

        if !password::verify_password(password, &hash) {
            return Ok(None);
        }

        Ok(self.find_by_email(email).await?)
    }
}
