//! Daemon configuration.

use std::path::PathBuf;
use std::sync::Arc;

use bbus_stream::Peer;

/// Credential check run against every accepted connection before the
/// session opens. Returning `false` sends a session-open reject and closes.
pub type AuthHook = Arc<dyn Fn(&Peer) -> bool + Send + Sync>;

/// Daemon configuration.
#[derive(Default, Clone)]
pub struct Config {
    /// Socket path override. When unset, `BBUS_SOCKPATH` and then the
    /// default path apply.
    pub socket_path: Option<PathBuf>,
    /// Optional credential check; every peer is accepted when unset.
    pub auth: Option<AuthHook>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("socket_path", &self.socket_path)
            .field("auth", &self.auth.as_ref().map(|_| ".."))
            .finish()
    }
}
