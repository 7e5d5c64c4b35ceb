//! Session API endpoints.
//!
//! - POST `/register` - Create an identity and return its first session
//! - POST `/login` - Exchange email and password for a session
//! - POST `/refresh` - Rotate a refresh token into a new session
//! - POST `/logout` - Revoke a refresh token (idempotent)
//! - POST `/logout-all` - Revoke every refresh token of the caller
//! - GET `/sessions` - List the caller's live sessions
//! - DELETE `/sessions/{id}` - Revoke one of the caller's sessions
//! - GET `/me` - Identity asserted by the access token

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, validate_email, validate_password};
use crate::auth::{ApiAuth, HasSessionManager};
use crate::db::{Identity, Role};
use crate::rate_limit::{RateLimitConfig, rate_limit_credentials};
use crate::session::{SessionManager, SessionPair};

#[derive(Clone)]
pub struct AuthState {
    pub sessions: SessionManager,
}

impl HasSessionManager for AuthState {
    fn sessions(&self) -> &SessionManager {
        &self.sessions
    }
}

pub fn router(state: AuthState, no_signup: bool, rate_limit: Arc<RateLimitConfig>) -> Router {
    let credential_routes = Router::new().route("/login", post(login));
    let credential_routes = if no_signup {
        credential_routes
    } else {
        credential_routes.route("/register", post(register))
    };
    let credential_routes = credential_routes
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            rate_limit,
            rate_limit_credentials,
        ));

    Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/logout-all", post(logout_all))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", delete(revoke_session))
        .route("/me", get(me))
        .with_state(state)
        .merge(credential_routes)
}

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
    name: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokenRequest {
    refresh_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    access_token: String,
    refresh_token: String,
    token_type: &'static str,
    /// Access token lifetime in seconds
    expires_in: u64,
    user: Identity,
}

impl From<SessionPair> for SessionResponse {
    fn from(pair: SessionPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer",
            expires_in: pair.access_expires_in,
            user: pair.identity,
        }
    }
}

async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = validate_email(&payload.email)?;
    validate_password(&payload.password)?;

    let name = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    if name.is_some_and(|name| name.chars().count() > 100) {
        return Err(ApiError::bad_request(
            "Name cannot be longer than 100 characters",
        ));
    }

    let pair = state
        .sessions
        .register(&email, &payload.password, name)
        .await?;

    Ok((StatusCode::CREATED, Json(SessionResponse::from(pair))))
}

async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Malformed emails cannot match a stored identity
    let Ok(email) = validate_email(&payload.email) else {
        return Err(ApiError::unauthorized("Invalid email or password"));
    };

    let pair = state.sessions.login(&email, &payload.password).await?;
    Ok(Json(SessionResponse::from(pair)))
}

async fn refresh(
    State(state): State<AuthState>,
    Json(payload): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pair = state.sessions.rotate(&payload.refresh_token).await?;
    Ok(Json(SessionResponse::from(pair)))
}

async fn logout(
    State(state): State<AuthState>,
    Json(payload): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.revoke(&payload.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct RevokeAllResponse {
    revoked: u64,
}

async fn logout_all(
    State(state): State<AuthState>,
    ApiAuth(auth): ApiAuth,
) -> Result<impl IntoResponse, ApiError> {
    let revoked = state.sessions.revoke_all(auth.id()).await?;
    Ok(Json(RevokeAllResponse { revoked }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    id: i64,
    issued_at: i64,
    expires_at: i64,
}

#[derive(Serialize)]
struct ListSessionsResponse {
    sessions: Vec<SessionInfo>,
}

async fn list_sessions(
    State(state): State<AuthState>,
    ApiAuth(auth): ApiAuth,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state
        .sessions
        .list_sessions(auth.id())
        .await?
        .into_iter()
        .map(|record| SessionInfo {
            id: record.id,
            issued_at: record.issued_at,
            expires_at: record.expires_at,
        })
        .collect();

    Ok(Json(ListSessionsResponse { sessions }))
}

async fn revoke_session(
    State(state): State<AuthState>,
    ApiAuth(auth): ApiAuth,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    if state.sessions.revoke_session(auth.id(), id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Session not found"))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    id: String,
    email: String,
    role: Role,
    /// Access token expiry (Unix seconds)
    expires_at: u64,
}

async fn me(ApiAuth(auth): ApiAuth) -> impl IntoResponse {
    Json(MeResponse {
        id: auth.claims.sub,
        email: auth.claims.email,
        role: auth.claims.role,
        expires_at: auth.claims.exp,
    })
}
