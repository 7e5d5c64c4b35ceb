//! Bearer authentication for API routes.
//!
//! Access tokens are checked by signature and expiry only. Refresh tokens
//! never authenticate a request; they are exchanged at `/api/auth/refresh`.

mod errors;
mod extractors;
mod ip;
mod state;

pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::{ApiAuth, AuthenticatedIdentity, bearer_token};
pub use ip::{HasHeadersAndExtensions, extract_client_ip};
pub use state::HasSessionManager;
