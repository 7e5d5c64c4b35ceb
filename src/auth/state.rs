//! Authentication state trait.

use crate::session::SessionManager;

/// Trait for router state types that can verify access tokens.
pub trait HasSessionManager {
    fn sessions(&self) -> &SessionManager;
}
