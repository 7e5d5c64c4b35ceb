//! Credential session manager.
//!
//! Issues access/refresh token pairs and drives the refresh token lifecycle:
//! `Issued -> Rotated-away | Revoked | Expired-and-purged`. Every terminal
//! state is a deleted row, so "no record" is the only revocation signal.
//!
//! Rotation runs in one transaction that deletes the presented record before
//! inserting its successor. Of two concurrent rotations of the same token,
//! exactly one succeeds and the other sees `NotFound`.

mod policy;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{
    Database, Identity, IdentityError, IdentityStore, RefreshTokenRecord, RefreshTokenStore, Role,
};
use crate::jwt::{AccessClaims, JwtConfig, JwtError, unix_now};
use crate::password::PasswordError;

pub use policy::{
    DEFAULT_ACCESS_TTL, DEFAULT_REFRESH_TTL_DAYS, SessionPolicy, parse_days, parse_duration,
};

/// Refresh token entropy in bytes.
const REFRESH_TOKEN_BYTES: usize = 32;

/// A freshly issued access/refresh token pair.
#[derive(Debug, Clone)]
pub struct SessionPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub access_expires_in: u64,
    pub identity: Identity,
    /// Refresh record issue time (Unix seconds)
    pub issued_at: i64,
    /// Refresh record expiry (Unix seconds)
    pub expires_at: i64,
}

/// Session failures. The first five are permanent, input-dependent outcomes;
/// the rest are infrastructure errors passed through untouched.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("refresh token not found")]
    NotFound,
    #[error("refresh token expired")]
    Expired,
    #[error("identity is inactive")]
    OwnerInactive,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("an identity with this email already exists")]
    Conflict,
    #[error("system clock is out of range")]
    Clock,
    #[error(transparent)]
    Signing(#[from] JwtError),
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error("session store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl From<IdentityError> for SessionError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::Conflict => SessionError::Conflict,
            IdentityError::NotFound => SessionError::NotFound,
            IdentityError::Password(e) => SessionError::Password(e),
            IdentityError::Store(e) => SessionError::Store(e),
        }
    }
}

/// Generate an opaque refresh token (256 random bits, base64url).
fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn now_secs() -> Result<i64, SessionError> {
    let now = unix_now().map_err(|_| SessionError::Clock)?;
    to_store_secs(now)
}

/// Refresh records store timestamps as SQLite integers (i64).
fn to_store_secs(secs: u64) -> Result<i64, SessionError> {
    i64::try_from(secs).map_err(|_| SessionError::Clock)
}

#[derive(Clone)]
pub struct SessionManager {
    db: Database,
    jwt: Arc<JwtConfig>,
    policy: SessionPolicy,
}

impl SessionManager {
    pub fn new(db: Database, jwt: Arc<JwtConfig>, policy: SessionPolicy) -> Self {
        Self { db, jwt, policy }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Issue a new session for `identity`: one signed access token and one
    /// persisted refresh record.
    pub async fn issue_session(&self, identity: &Identity) -> Result<SessionPair, SessionError> {
        let mut conn = self.db.pool().acquire().await?;
        let pair = self.issue_in(&mut conn, identity).await?;
        info!(owner_id = %identity.id, "Issued session");
        Ok(pair)
    }

    async fn issue_in(
        &self,
        conn: &mut SqliteConnection,
        identity: &Identity,
    ) -> Result<SessionPair, SessionError> {
        let access = self
            .jwt
            .generate_access_token(identity, self.policy.access_ttl)?;

        let refresh_token = generate_refresh_token();
        let issued_at = now_secs()?;
        let expires_at = issued_at + self.policy.refresh_ttl_secs();

        RefreshTokenStore::create_in(conn, &refresh_token, &identity.id, issued_at, expires_at)
            .await?;

        Ok(SessionPair {
            access_token: access.token,
            refresh_token,
            access_expires_in: access.duration,
            identity: identity.clone(),
            issued_at,
            expires_at,
        })
    }

    /// Exchange a refresh token for a new session.
    ///
    /// An expired record is deleted on detection. A record whose owner is
    /// inactive is left in place, so reactivating the owner revives it.
    pub async fn rotate(&self, presented: &str) -> Result<SessionPair, SessionError> {
        let now = now_secs()?;
        let mut tx = self.db.begin().await?;

        let Some(record) = RefreshTokenStore::take_in(&mut tx, presented).await? else {
            warn!("Refresh token not found");
            return Err(SessionError::NotFound);
        };

        if record.is_expired(now) {
            tx.commit().await?;
            warn!(owner_id = %record.owner_id, "Purged expired refresh token");
            return Err(SessionError::Expired);
        }

        let Some(identity) = IdentityStore::find_by_id_in(&mut tx, &record.owner_id).await? else {
            tx.commit().await?;
            warn!(owner_id = %record.owner_id, "Purged refresh token of missing identity");
            return Err(SessionError::NotFound);
        };

        if !identity.active {
            tx.rollback().await?;
            warn!(owner_id = %identity.id, "Refresh rejected for inactive identity");
            return Err(SessionError::OwnerInactive);
        }

        let pair = self.issue_in(&mut tx, &identity).await?;
        tx.commit().await?;

        info!(owner_id = %identity.id, "Rotated refresh token");
        Ok(pair)
    }

    /// Delete every record matching `presented`. Unknown tokens are not an error.
    pub async fn revoke(&self, presented: &str) -> Result<(), SessionError> {
        let removed = self.db.refresh_tokens().delete_by_token(presented).await?;
        if removed > 0 {
            info!("Revoked refresh token");
        }
        Ok(())
    }

    /// Delete all refresh records of an identity.
    pub async fn revoke_all(&self, owner_id: &str) -> Result<u64, SessionError> {
        let removed = self.db.refresh_tokens().delete_all_by_owner(owner_id).await?;
        info!(owner_id = %owner_id, count = removed, "Revoked all refresh tokens");
        Ok(removed)
    }

    /// Revoke one of the owner's sessions by record id. Returns whether a
    /// record was removed; records of other identities are never touched.
    pub async fn revoke_session(&self, owner_id: &str, id: i64) -> Result<bool, SessionError> {
        let removed = self.db.refresh_tokens().delete_owned(id, owner_id).await?;
        if removed {
            info!(owner_id = %owner_id, session_id = id, "Revoked session");
        }
        Ok(removed)
    }

    /// Unexpired refresh records of an identity, newest first.
    pub async fn list_sessions(
        &self,
        owner_id: &str,
    ) -> Result<Vec<RefreshTokenRecord>, SessionError> {
        let now = now_secs()?;
        Ok(self.db.refresh_tokens().list_by_owner(owner_id, now).await?)
    }

    /// Check an email/password pair. A mismatch is `Ok(None)`, not an error.
    pub async fn validate_credentials(
        &self,
        email: &str,
        secret: &str,
    ) -> Result<Option<Identity>, SessionError> {
        Ok(self.db.identities().validate_password(email, secret).await?)
    }

    /// Create an identity and issue its first session.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<SessionPair, SessionError> {
        let identity = self
            .db
            .identities()
            .create_with_password(email, name, password, Role::User)
            .await?;
        info!(owner_id = %identity.id, "Registered identity");

        self.issue_session(&identity).await
    }

    /// Validate credentials and issue a session.
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionPair, SessionError> {
        let Some(identity) = self.validate_credentials(email, password).await? else {
            warn!("Login failed: invalid credentials");
            return Err(SessionError::InvalidCredentials);
        };

        if !identity.active {
            warn!(owner_id = %identity.id, "Login rejected for inactive identity");
            return Err(SessionError::OwnerInactive);
        }

        self.issue_session(&identity).await
    }

    /// Verify an access token's signature and expiry. No store lookup.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, JwtError> {
        self.jwt.validate_access_token(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    async fn setup() -> (SessionManager, Database, Identity) {
        let db = Database::open(":memory:").await.unwrap();
        let jwt = Arc::new(JwtConfig::new(b"test-secret-key-for-testing"));
        let manager = SessionManager::new(db.clone(), jwt, SessionPolicy::default());
        let identity = db
            .identities()
            .create("u1@example.com", None, "hash", Role::User)
            .await
            .unwrap();
        (manager, db, identity)
    }

    async fn expire(db: &Database, token: &str) {
        sqlx::query("UPDATE refresh_tokens SET expires_at = ? WHERE token = ?")
            .bind(now_secs().unwrap() - 60)
            .bind(token)
            .execute(db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_issue_session_persists_one_record() {
        let (manager, db, identity) = setup().await;

        let pair = manager.issue_session(&identity).await.unwrap();

        assert_eq!(pair.identity, identity);
        assert_eq!(pair.access_expires_in, 15 * 60);
        assert_eq!(pair.expires_at - pair.issued_at, 7 * 86400);

        let record = db
            .refresh_tokens()
            .find_by_token(&pair.refresh_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.owner_id, identity.id);
        assert_eq!(record.expires_at, pair.expires_at);

        let claims = manager.verify_access(&pair.access_token).unwrap();
        assert_eq!(claims.sub, identity.id);
        assert_eq!(claims.email, identity.email);
        assert_eq!(claims.role, Role::User);
    }

    #[test]
    fn test_out_of_range_time_is_clock_error() {
        assert_eq!(to_store_secs(1_700_000_000).unwrap(), 1_700_000_000);
        assert!(matches!(to_store_secs(u64::MAX), Err(SessionError::Clock)));
        assert!(now_secs().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_refresh_tokens_are_unique() {
        let (manager, _, identity) = setup().await;

        let mut seen = HashSet::new();
        for _ in 0..20 {
            let pair = manager.issue_session(&identity).await.unwrap();
            assert!(seen.insert(pair.refresh_token));
        }
    }

    #[tokio::test]
    async fn test_rotate_once_then_not_found() {
        let (manager, db, identity) = setup().await;
        let first = manager.issue_session(&identity).await.unwrap();

        let second = manager.rotate(&first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert_eq!(second.identity.id, identity.id);

        let replay = manager.rotate(&first.refresh_token).await;
        assert!(matches!(replay, Err(SessionError::NotFound)));

        // The rotation chain is represented by exactly one live record
        let live = db.refresh_tokens().list_by_owner(&identity.id, 0).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].token, second.refresh_token);
    }

    #[tokio::test]
    async fn test_rotate_expired_purges_record() {
        let (manager, db, identity) = setup().await;
        let pair = manager.issue_session(&identity).await.unwrap();
        expire(&db, &pair.refresh_token).await;

        let result = manager.rotate(&pair.refresh_token).await;
        assert!(matches!(result, Err(SessionError::Expired)));

        let result = manager.rotate(&pair.refresh_token).await;
        assert!(matches!(result, Err(SessionError::NotFound)));
    }

    #[tokio::test]
    async fn test_rotate_inactive_owner_keeps_record() {
        let (manager, db, identity) = setup().await;
        let pair = manager.issue_session(&identity).await.unwrap();
        db.identities().set_active(&identity.id, false).await.unwrap();

        let result = manager.rotate(&pair.refresh_token).await;
        assert!(matches!(result, Err(SessionError::OwnerInactive)));
        assert!(
            db.refresh_tokens()
                .find_by_token(&pair.refresh_token)
                .await
                .unwrap()
                .is_some()
        );

        // Reactivation makes the untouched token usable again
        db.identities().set_active(&identity.id, true).await.unwrap();
        assert!(manager.rotate(&pair.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_rotate_unknown_token() {
        let (manager, _, _) = setup().await;
        let result = manager.rotate("does-not-exist").await;
        assert!(matches!(result, Err(SessionError::NotFound)));
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (manager, _, identity) = setup().await;
        let pair = manager.issue_session(&identity).await.unwrap();

        manager.revoke(&pair.refresh_token).await.unwrap();
        manager.revoke(&pair.refresh_token).await.unwrap();
        manager.revoke("never-issued").await.unwrap();

        let result = manager.rotate(&pair.refresh_token).await;
        assert!(matches!(result, Err(SessionError::NotFound)));
    }

    #[tokio::test]
    async fn test_revoke_all_and_list_sessions() {
        let (manager, _, identity) = setup().await;
        manager.issue_session(&identity).await.unwrap();
        let latest = manager.issue_session(&identity).await.unwrap();

        let sessions = manager.list_sessions(&identity.id).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().any(|s| s.token == latest.refresh_token));

        assert_eq!(manager.revoke_all(&identity.id).await.unwrap(), 2);
        assert!(manager.list_sessions(&identity.id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_rotation_has_single_winner() {
        let (manager, _, identity) = setup().await;
        let pair = manager.issue_session(&identity).await.unwrap();

        let (a, b) = tokio::join!(
            manager.rotate(&pair.refresh_token),
            manager.rotate(&pair.refresh_token)
        );

        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        let not_found = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(SessionError::NotFound)))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(not_found, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rotation_on_file_database() {
        const TASKS: usize = 4;
        const ROUNDS: usize = 20;

        let path = std::env::temp_dir().join(format!("turnstile-{}.db", uuid::Uuid::new_v4()));
        let path_str = path.to_string_lossy().into_owned();
        let db = Database::open(&path_str).await.unwrap();
        let jwt = Arc::new(JwtConfig::new(b"test-secret-key-for-testing"));
        let manager = SessionManager::new(db.clone(), jwt, SessionPolicy::default());
        let identity = db
            .identities()
            .create("race@example.com", None, "hash", Role::User)
            .await
            .unwrap();

        for round in 0..ROUNDS {
            let pair = manager.issue_session(&identity).await.unwrap();

            let handles: Vec<_> = (0..TASKS)
                .map(|_| {
                    let manager = manager.clone();
                    let token = pair.refresh_token.clone();
                    tokio::spawn(async move { manager.rotate(&token).await })
                })
                .collect();

            let mut successes = 0;
            let mut not_found = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => successes += 1,
                    Err(SessionError::NotFound) => not_found += 1,
                    Err(e) => panic!("round {}: unexpected rotation error: {}", round, e),
                }
            }
            assert_eq!(successes, 1, "round {}", round);
            assert_eq!(not_found, TASKS - 1, "round {}", round);
        }

        // One live record per round's winner, nothing else
        let live = db.refresh_tokens().list_by_owner(&identity.id, 0).await.unwrap();
        assert_eq!(live.len(), ROUNDS);

        db.pool().close().await;
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let _ = std::fs::remove_file(format!("{}{}", path_str, suffix));
        }
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let (manager, _, _) = setup().await;

        let registered = manager
            .register("carol@example.com", "correct horse", Some("Carol"))
            .await
            .unwrap();
        assert_eq!(registered.identity.name.as_deref(), Some("Carol"));

        let conflict = manager
            .register("CAROL@example.com", "another one", None)
            .await;
        assert!(matches!(conflict, Err(SessionError::Conflict)));

        let logged_in = manager
            .login("carol@example.com", "correct horse")
            .await
            .unwrap();
        assert_eq!(logged_in.identity.id, registered.identity.id);
        assert_ne!(logged_in.refresh_token, registered.refresh_token);

        let wrong = manager.login("carol@example.com", "wrong").await;
        assert!(matches!(wrong, Err(SessionError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_validate_credentials_returns_none_on_mismatch() {
        let (manager, _, _) = setup().await;
        manager
            .register("dave@example.com", "correct horse", None)
            .await
            .unwrap();

        assert!(
            manager
                .validate_credentials("dave@example.com", "nope")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            manager
                .validate_credentials("nobody@example.com", "correct horse")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_login_inactive_identity() {
        let (manager, db, _) = setup().await;
        let registered = manager
            .register("erin@example.com", "correct horse", None)
            .await
            .unwrap();
        db.identities()
            .set_active(&registered.identity.id, false)
            .await
            .unwrap();

        let result = manager.login("erin@example.com", "correct horse").await;
        assert!(matches!(result, Err(SessionError::OwnerInactive)));
    }
}
