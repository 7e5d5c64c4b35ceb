//! Liveness endpoint.

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use serde_json::json;

use super::error::ApiError;
use crate::db::Database;

#[derive(Clone)]
pub struct HealthState {
    pub db: Database,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/", get(health)).with_state(state)
}

/// Reports ok when the database answers a trivial query.
async fn health(State(state): State<HealthState>) -> Result<impl IntoResponse, ApiError> {
    sqlx::query("SELECT 1")
        .execute(state.db.pool())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Health check failed");
            ApiError::ServiceUnavailable("Database unavailable".into())
        })?;

    Ok(Json(json!({ "status": "ok" })))
}
