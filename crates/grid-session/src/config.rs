//! Configuration for the session repository.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default name of the region sessions are stored in.
pub const DEFAULT_REGION_NAME: &str = "Sessions";

/// Default max inactive interval (30 minutes).
pub const DEFAULT_MAX_INACTIVE_INTERVAL_SECS: i32 = 1800;

/// Default number of recently created session ids to remember.
pub const DEFAULT_RECENT_KEYS_CAPACITY: usize = 10_000;

/// Default time a recently created session id is remembered.
pub const DEFAULT_RECENT_KEYS_TTL_SECS: u64 = 10;

/// Configuration for the session repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Name of the region holding session entries.
    pub region_name: String,

    /// Max inactive interval applied to every session created through the
    /// repository. Negative values disable expiration.
    pub max_inactive_interval_secs: i32,

    /// Bounds of the recently-created-id memory used to suppress
    /// duplicate create notifications.
    pub recent_keys: RecentKeysConfig,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            region_name: DEFAULT_REGION_NAME.to_string(),
            max_inactive_interval_secs: DEFAULT_MAX_INACTIVE_INTERVAL_SECS,
            recent_keys: RecentKeysConfig::default(),
        }
    }
}

impl RepositoryConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text. Omitted fields take defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Set the region name.
    pub fn with_region_name(mut self, name: impl Into<String>) -> Self {
        self.region_name = name.into();
        self
    }

    /// Set the max inactive interval in seconds.
    pub fn with_max_inactive_interval(mut self, secs: i32) -> Self {
        self.max_inactive_interval_secs = secs;
        self
    }

    /// Set how many recently created ids are remembered.
    pub fn with_recent_keys_capacity(mut self, capacity: usize) -> Self {
        self.recent_keys.capacity = capacity;
        self
    }

    /// Set how long a recently created id is remembered.
    pub fn with_recent_keys_ttl(mut self, ttl: Duration) -> Self {
        self.recent_keys.ttl_secs = ttl.as_secs();
        self
    }
}

/// Bounds for the recently-created-id memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecentKeysConfig {
    /// Maximum number of ids held; the oldest is evicted past this.
    pub capacity: usize,

    /// Maximum age of a remembered id, in seconds.
    pub ttl_secs: u64,
}

impl Default for RecentKeysConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RECENT_KEYS_CAPACITY,
            ttl_secs: DEFAULT_RECENT_KEYS_TTL_SECS,
        }
    }
}

impl RecentKeysConfig {
    /// The configured max age as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Load a repository configuration from a TOML file.
pub fn load_config_file(path: &Path) -> Result<RepositoryConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::ReadConfig {
        path: path.display().to_string(),
        source: e,
    })?;
    RepositoryConfig::from_toml(&contents)
}
