mod auth;
mod error;
mod health;

use axum::Router;
use std::sync::Arc;

use crate::db::Database;
use crate::rate_limit::RateLimitConfig;
use crate::session::SessionManager;

pub use auth::AuthState;
pub use error::ApiError;

/// Create the API router.
pub fn create_api_router(
    db: Database,
    sessions: SessionManager,
    no_signup: bool,
    rate_limit: Arc<RateLimitConfig>,
) -> Router {
    let auth_state = auth::AuthState { sessions };
    let health_state = health::HealthState { db };

    Router::new()
        .nest("/auth", auth::router(auth_state, no_signup, rate_limit))
        .nest("/health", health::router(health_state))
}
