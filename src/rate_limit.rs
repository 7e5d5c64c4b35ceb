//! Rate limiting for credential endpoints.
//!
//! Uses a token bucket with per-IP tracking to slow down password guessing
//! and signup spam.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{
    num::NonZeroU32,
    sync::{Arc, Weak},
    time::Duration,
};

use crate::auth::extract_client_ip;
use crate::cli::ClientIpHeader;

/// How often idle per-IP entries are dropped from the limiter.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Rate limiting configuration for credential endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Per-IP limiter shared by login and registration
    pub credentials: Arc<IpLimiter>,
    pub ip_header: Option<ClientIpHeader>,
}

impl RateLimitConfig {
    /// Allow `per_minute` attempts per IP per minute, with the full amount as burst.
    pub fn new(per_minute: NonZeroU32, ip_header: Option<ClientIpHeader>) -> Self {
        Self::with_quota(Quota::per_minute(per_minute), ip_header)
    }

    fn with_quota(quota: Quota, ip_header: Option<ClientIpHeader>) -> Self {
        Self {
            credentials: Arc::new(RateLimiter::keyed(quota)),
            ip_header,
        }
    }

    /// Forget IPs whose bucket has refilled completely.
    pub fn prune(&self) {
        self.credentials.retain_recent();
        self.credentials.shrink_to_fit();
    }
}

/// Prune `config` every `every` until the last strong reference is dropped.
pub fn spawn_pruner(
    config: &Arc<RateLimitConfig>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    let config: Weak<RateLimitConfig> = Arc::downgrade(config);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let Some(config) = config.upgrade() else {
                break;
            };
            let before = config.credentials.len();
            config.prune();
            let pruned = before.saturating_sub(config.credentials.len());
            if pruned > 0 {
                tracing::debug!(pruned, "Pruned idle rate limit entries");
            }
        }
    })
}

/// Middleware for rate limiting login and registration.
pub async fn rate_limit_credentials(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = match extract_client_ip(&request, config.ip_header) {
        Ok(ip) => ip,
        Err(reason) => {
            tracing::warn!(reason, "Unable to determine client IP");
            return (StatusCode::FORBIDDEN, "Unable to determine client IP.").into_response();
        }
    };

    match config.credentials.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(ip = %ip, "Credential rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many authentication attempts. Please wait before trying again.",
            )
                .into_response()
        }
    }
}
