//! Server configuration.

use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The only push version accepted.
    pub push_version: u32,
    /// Schema generation stamped into cookies; other generations resync.
    pub cookie_version: u32,
    /// Location returned when a push uses another version.
    pub push_redirect: String,
    /// Maximum mutations per push.
    pub max_push_batch: usize,
    /// Age after which superseded CVR snapshots are pruned.
    pub cvr_retention: Duration,
    /// Snapshots per client kept regardless of age.
    pub cvr_keep_latest: usize,
    /// Buffer of the poke broadcast channel.
    pub poke_capacity: usize,
}

impl ServerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            push_version: 1,
            cookie_version: 1,
            push_redirect: "/replicache/push".into(),
            max_push_batch: 1000,
            cvr_retention: Duration::from_secs(7 * 24 * 60 * 60),
            cvr_keep_latest: 10,
            poke_capacity: 64,
        }
    }

    /// Sets the cookie schema generation.
    pub fn with_cookie_version(mut self, version: u32) -> Self {
        self.cookie_version = version;
        self
    }

    /// Sets the redirect location for unsupported push versions.
    pub fn with_push_redirect(mut self, location: impl Into<String>) -> Self {
        self.push_redirect = location.into();
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Sets the CVR retention policy.
    pub fn with_cvr_retention(mut self, retention: Duration, keep_latest: usize) -> Self {
        self.cvr_retention = retention;
        self.cvr_keep_latest = keep_latest;
        self
    }

    /// Sets the poke channel buffer.
    pub fn with_poke_capacity(mut self, capacity: usize) -> Self {
        self.poke_capacity = capacity;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
