//! Access token signing and verification.
//!
//! Access tokens are HS256 JWTs. They are never stored: validity depends on
//! the signature and the `exp` claim only, so revoking a refresh token does
//! not invalidate access tokens that were already handed out.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::db::{Identity, Role};

/// JWT claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (identity UUID)
    pub sub: String,
    pub email: String,
    pub role: Role,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Signing configuration shared by all request handlers.
#[derive(Clone)]
pub struct JwtConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

/// Result of generating an access token.
#[derive(Debug, Clone)]
pub struct AccessTokenResult {
    /// The JWT token string
    pub token: String,
    /// Token lifetime in seconds
    pub duration: u64,
}

/// Current Unix time in seconds.
pub fn unix_now() -> Result<u64, JwtError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}

impl JwtConfig {
    /// Create a new JWT configuration with the given secret.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Sign an access token for `identity` that expires after `ttl`.
    pub fn generate_access_token(
        &self,
        identity: &Identity,
        ttl: Duration,
    ) -> Result<AccessTokenResult, JwtError> {
        let now = unix_now()?;
        let duration = ttl.as_secs();

        let claims = AccessClaims {
            sub: identity.id.clone(),
            email: identity.email.clone(),
            role: identity.role,
            iat: now,
            exp: now + duration,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(JwtError::Encoding)?;

        Ok(AccessTokenResult { token, duration })
    }

    /// Validate and decode an access token.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let token_data =
            jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &validation)
                .map_err(JwtError::Decoding)?;

        Ok(token_data.claims)
    }
}

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
    #[error("Failed to decode token: {0}")]
    Decoding(jsonwebtoken::errors::Error),
    #[error("System time error")]
    TimeError,
}
