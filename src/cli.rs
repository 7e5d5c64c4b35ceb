//! CLI argument parsing, validation, and startup helpers.

use std::net::IpAddr;
use std::time::Duration;

use crate::ServerConfig;
use crate::db::Database;
use crate::session::{SessionPolicy, parse_days, parse_duration};
use clap::Parser;
use tracing::{error, info};

const MIN_JWT_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Header carrying the client IP when running behind a reverse proxy.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientIpHeader {
    /// `X-Forwarded-For`, first (client-most) address wins
    XForwardedFor,
    /// `X-Real-IP`
    XRealIp,
}

impl ClientIpHeader {
    pub fn header_name(&self) -> &'static str {
        match self {
            ClientIpHeader::XForwardedFor => "x-forwarded-for",
            ClientIpHeader::XRealIp => "x-real-ip",
        }
    }

    /// Parse the header value into a normalized IP string.
    pub fn parse(&self, value: &str) -> Result<String, &'static str> {
        let candidate = match self {
            ClientIpHeader::XForwardedFor => value.split(',').next().unwrap_or_default(),
            ClientIpHeader::XRealIp => value,
        };

        candidate
            .trim()
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| "IP header does not contain a valid address")
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "turnstile",
    about = "Credential sessions with rotating refresh tokens"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3001")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "DATABASE_PATH", default_value = "turnstile.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Access token lifetime (e.g. 900s, 15m, 1h)
    #[arg(long, env = "JWT_EXPIRES_IN", default_value = "15m", value_parser = parse_duration)]
    pub access_token_expires_in: Duration,

    /// Refresh token lifetime in days (e.g. 7d)
    #[arg(long, env = "REFRESH_TOKEN_EXPIRES_IN", default_value = "7d", value_parser = parse_days)]
    pub refresh_token_expires_in: u32,

    /// Disable the registration endpoint
    #[arg(long)]
    pub no_signup: bool,

    /// Login and registration attempts allowed per client IP per minute
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..))]
    pub login_attempts_per_minute: u32,

    /// Read the client IP from this header (requires running behind a proxy)
    #[arg(long)]
    pub ip_header: Option<ClientIpHeader>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

impl Args {
    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            access_ttl: self.access_token_expires_in,
            refresh_ttl_days: self.refresh_token_expires_in,
        }
    }
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, db: Database, jwt_secret: String) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        policy: args.session_policy(),
        no_signup: args.no_signup,
        login_attempts_per_minute: args.login_attempts_per_minute,
        ip_header: args.ip_header,
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
