pub mod api;
pub mod auth;
pub mod cli;
pub mod db;
pub mod jwt;
pub mod password;
pub mod rate_limit;
pub mod session;

use api::create_api_router;
use axum::Router;
use cli::ClientIpHeader;
use db::Database;
use jwt::JwtConfig;
use rate_limit::RateLimitConfig;
use session::{SessionManager, SessionPolicy};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing access tokens
    pub jwt_secret: Vec<u8>,
    /// Access and refresh token lifetimes
    pub policy: SessionPolicy,
    /// Whether the registration endpoint is disabled
    pub no_signup: bool,
    /// Login/registration attempts per client IP per minute
    pub login_attempts_per_minute: u32,
    /// Header to read the client IP from (requires running behind a proxy)
    pub ip_header: Option<ClientIpHeader>,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let jwt = Arc::new(JwtConfig::new(&config.jwt_secret));
    let sessions = SessionManager::new(config.db.clone(), jwt, config.policy);

    let per_minute = NonZeroU32::new(config.login_attempts_per_minute).unwrap_or(NonZeroU32::MIN);
    let rate_limit = Arc::new(RateLimitConfig::new(per_minute, config.ip_header));
    if tokio::runtime::Handle::try_current().is_ok() {
        rate_limit::spawn_pruner(&rate_limit, rate_limit::PRUNE_INTERVAL);
    }

    Router::new().nest(
        "/api",
        create_api_router(config.db.clone(), sessions, config.no_signup, rate_limit),
    )
}

/// Run the server on the given listener. This function blocks until the server exits.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> std::io::Result<(tokio::task::JoinHandle<()>, SocketAddr)> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
