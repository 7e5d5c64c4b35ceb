//! Axum extractors for authentication.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};

use super::errors::{ApiAuthError, AuthErrorKind};
use super::state::HasSessionManager;
use crate::jwt::AccessClaims;

/// Identity asserted by a valid access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedIdentity {
    pub claims: AccessClaims,
}

impl AuthenticatedIdentity {
    pub fn id(&self) -> &str {
        &self.claims.sub
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
/// The scheme is matched case-insensitively.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Extractor for API endpoints that require a valid access token.
pub struct ApiAuth(pub AuthenticatedIdentity);

impl<S> FromRequestParts<S> for ApiAuth
where
    S: HasSessionManager + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or(ApiAuthError::new(AuthErrorKind::NotAuthenticated))?;

        let claims = state.sessions().verify_access(token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected access token");
            ApiAuthError::new(AuthErrorKind::InvalidToken)
        })?;

        Ok(ApiAuth(AuthenticatedIdentity { claims }))
    }
}
