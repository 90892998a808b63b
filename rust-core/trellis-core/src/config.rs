//! # Configuration
//!
//! Application settings loaded from TOML. Every section is optional.
//!
//! ```toml
//! [server]
//! address = "0.0.0.0:8080"
//! max_body_size = 2097152
//!
//! [routing]
//! base_path = "/app"
//!
//! [pools.default]
//! max_size = 8
//! on_exhausted = "wait"
//!
//! [pools.keys.main]
//! url = "sqlite:app.db"
//! max_size = 4
//!
//! [logging]
//! filter = "trellis=debug"
//! json = true
//!
//! [bootstrap]
//! cache_dir = "/var/cache/trellis"
//! ```

use crate::error::{Error, Result};
use crate::pool::{ExhaustionPolicy, IdlePolicy, PoolConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP server settings
    pub server: ServerConfig,
    /// Routing settings
    pub routing: RoutingConfig,
    /// Connection pool settings
    pub pools: PoolsConfig,
    /// Logging settings
    pub logging: LogConfig,
    /// Cross-worker bootstrap cache settings
    pub bootstrap: BootstrapConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Graceful shutdown drain timeout in seconds
    pub shutdown_timeout_secs: u64,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            keep_alive: true,
            shutdown_timeout_secs: 30,
            max_body_size: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Drain timeout as a duration
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Routing configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Path prefix stripped from every request before matching
    pub base_path: String,
}

/// Pool defaults plus per-key overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolsConfig {
    /// Settings applied to every key
    pub default: PoolConfig,
    /// Per-key settings, by pool key
    pub keys: BTreeMap<String, PoolEntry>,
}

/// One configured pool key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolEntry {
    /// Connection URL
    pub url: String,
    /// Overrides `default.max_size`
    pub max_size: Option<usize>,
    /// Overrides `default.idle_policy`
    pub idle_policy: Option<IdlePolicy>,
    /// Overrides `default.on_exhausted`
    pub on_exhausted: Option<ExhaustionPolicy>,
    /// Overrides `default.wait_timeout_ms`
    pub wait_timeout_ms: Option<u64>,
}

impl PoolsConfig {
    /// Effective settings for a key: its overrides on top of the defaults
    #[must_use]
    pub fn effective(&self, key: &str) -> PoolConfig {
        let mut config = self.default.clone();
        if let Some(entry) = self.keys.get(key) {
            if let Some(max_size) = entry.max_size {
                config.max_size = max_size;
            }
            if let Some(policy) = entry.idle_policy {
                config.idle_policy = policy;
            }
            if let Some(policy) = entry.on_exhausted {
                config.on_exhausted = policy;
            }
            if let Some(timeout) = entry.wait_timeout_ms {
                config.wait_timeout_ms = timeout;
            }
        }
        config
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "trellis=info".to_string(),
            json: false,
        }
    }
}

/// Bootstrap cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Directory holding the cache; caching is off when unset
    pub cache_dir: Option<PathBuf>,
    /// Age after which a leftover lock file is considered abandoned
    pub lock_stale_after_secs: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            lock_stale_after_secs: 30,
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on parse or validation failure.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming every violated constraint.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let base = &self.routing.base_path;
        if !base.is_empty() && !base.starts_with('/') {
            problems.push(format!("routing.base_path must start with '/': {base}"));
        }
        if base.contains(['?', '#', ':']) {
            problems.push(format!("routing.base_path must be a plain path: {base}"));
        }

        if self.pools.default.max_size == 0 {
            problems.push("pools.default.max_size must be at least 1".to_string());
        }
        for (key, entry) in &self.pools.keys {
            if entry.max_size == Some(0) {
                problems.push(format!("pools.keys.{key}.max_size must be at least 1"));
            }
            if entry.url.is_empty() {
                problems.push(format!("pools.keys.{key}.url is required"));
            }
        }

        if self.server.max_body_size == 0 {
            problems.push("server.max_body_size must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config {
                message: problems.join(", "),
            })
        }
    }
}
